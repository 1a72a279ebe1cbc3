use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permissions::PermissionRule;
use crate::types::TokenUsage;

/// Everything a run reports, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Emitted once, right before the first answer delta.
    AnswerStart,
    AnswerDelta {
        delta: String,
    },
    /// Text the model produced before calling tools. Never part of the answer.
    Thinking {
        text: String,
    },
    ToolStart {
        tool_id: String,
        call_id: String,
        args: Value,
    },
    ToolProgress {
        tool_id: String,
        message: String,
    },
    ToolEnd {
        tool_id: String,
        call_id: String,
        result: String,
        duration_ms: u64,
    },
    ToolError {
        tool_id: String,
        call_id: String,
        error: String,
    },
    /// The run is suspended until `Runtime::respond_to_permission`.
    PermissionRequest {
        tool_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
        args: Value,
        /// Rule that asked; `None` when the default action did.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule: Option<PermissionRule>,
    },
    PermissionResponse {
        tool_id: String,
        allowed: bool,
        #[serde(default)]
        always_allow: bool,
    },
    /// Older transcript messages were dropped to stay within limits.
    ContextCleared {
        dropped_messages: usize,
    },
    Done {
        answer: String,
        tool_calls: Vec<ToolCallRecord>,
        iterations: usize,
        total_time_ms: u64,
        token_usage: TokenUsage,
    },
}

impl RunEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, RunEvent::Done { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok(String),
    Error(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Ok(text) | ToolOutcome::Error(text) => text,
        }
    }
}

/// One executed or refused tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_id: String,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub args: Value,
    pub outcome: ToolOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}
