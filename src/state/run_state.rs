use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permissions::PermissionRule;
use crate::runtime::event::{RunEvent, ToolCallRecord};
use crate::types::TokenUsage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    PermissionPending,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPermission {
    pub tool_id: String,
    pub resource: Option<String>,
    pub args: Value,
    pub rule: Option<PermissionRule>,
}

/// Caller-side fold of a run's events. The runtime never owns one of these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub events: Vec<RunEvent>,
    pub answer: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub token_usage: TokenUsage,
    pub pending_permission: Option<PendingPermission>,
    pub error: Option<String>,
    /// Set when the caller cancelled the run before `done`.
    pub interrupted: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a fresh run.
    pub fn start(&mut self) {
        *self = Self {
            status: RunStatus::Running,
            ..Self::default()
        };
    }

    pub fn apply(&mut self, event: &RunEvent) {
        self.events.push(event.clone());

        match event {
            RunEvent::AnswerDelta { delta } => {
                self.answer.push_str(delta);
            }
            RunEvent::PermissionRequest {
                tool_id,
                resource,
                args,
                rule,
            } => {
                self.status = RunStatus::PermissionPending;
                self.pending_permission = Some(PendingPermission {
                    tool_id: tool_id.clone(),
                    resource: resource.clone(),
                    args: args.clone(),
                    rule: rule.clone(),
                });
            }
            RunEvent::PermissionResponse { .. } => {
                self.pending_permission = None;
                self.status = RunStatus::Running;
            }
            RunEvent::Done {
                answer,
                tool_calls,
                token_usage,
                ..
            } => {
                self.status = RunStatus::Done;
                self.answer = answer.clone();
                self.tool_calls = tool_calls.clone();
                self.token_usage = *token_usage;
                self.pending_permission = None;
            }
            RunEvent::AnswerStart
            | RunEvent::Thinking { .. }
            | RunEvent::ToolStart { .. }
            | RunEvent::ToolProgress { .. }
            | RunEvent::ToolEnd { .. }
            | RunEvent::ToolError { .. }
            | RunEvent::ContextCleared { .. } => {
                if self.status == RunStatus::Idle {
                    self.status = RunStatus::Running;
                }
            }
        }
    }

    /// Record a fatal run error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Error;
        self.error = Some(message.into());
        self.pending_permission = None;
    }

    /// Mark the turn as cancelled by the caller.
    pub fn interrupt(&mut self) {
        self.status = RunStatus::Idle;
        self.interrupted = true;
        self.pending_permission = None;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Done | RunStatus::Error) || self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_tracks_permission_and_done() {
        let mut state = RunState::new();
        state.start();
        assert_eq!(state.status, RunStatus::Running);

        state.apply(&RunEvent::PermissionRequest {
            tool_id: "bash".to_string(),
            resource: None,
            args: json!({}),
            rule: None,
        });
        assert_eq!(state.status, RunStatus::PermissionPending);
        assert_eq!(
            state.pending_permission.as_ref().map(|p| p.tool_id.as_str()),
            Some("bash")
        );

        state.apply(&RunEvent::PermissionResponse {
            tool_id: "bash".to_string(),
            allowed: false,
            always_allow: false,
        });
        assert_eq!(state.status, RunStatus::Running);
        assert!(state.pending_permission.is_none());

        state.apply(&RunEvent::AnswerStart);
        state.apply(&RunEvent::AnswerDelta {
            delta: "Hi".to_string(),
        });
        assert_eq!(state.answer, "Hi");

        state.apply(&RunEvent::Done {
            answer: "Hi".to_string(),
            tool_calls: Vec::new(),
            iterations: 1,
            total_time_ms: 3,
            token_usage: TokenUsage::new(1, 1),
        });
        assert_eq!(state.status, RunStatus::Done);
        assert_eq!(state.token_usage.total_tokens, 2);
        assert_eq!(state.events.len(), 5);
        assert!(state.is_finished());
    }

    #[test]
    fn test_fail_and_interrupt() {
        let mut state = RunState::new();
        state.start();
        state.fail("model transport failed: reset");
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.error.as_deref(), Some("model transport failed: reset"));

        state.start();
        assert!(state.error.is_none());
        state.interrupt();
        assert!(state.interrupted);
        assert!(state.is_finished());
    }
}
