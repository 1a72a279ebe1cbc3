use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    PreToolUse,
    PostToolUse,
}

/// What a hook gets to see about the tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    pub phase: HookPhase,
    pub tool_id: String,
    pub call_id: String,
    pub args: Value,
    pub resource: Option<String>,
    /// Set for `PostToolUse`: the tool's output or error message.
    pub outcome: Option<Result<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    /// Only honoured for `PreToolUse`.
    Block { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hook '{hook}' failed: {message}")]
pub struct HookError {
    pub hook: String,
    pub message: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Lifecycle callbacks around tool execution.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, phase: HookPhase, ctx: &HookContext) -> Result<HookOutcome, HookError>;
}

/// Runner used when no hooks are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl HookRunner for NoopHooks {
    async fn run(&self, _phase: HookPhase, _ctx: &HookContext) -> Result<HookOutcome, HookError> {
        Ok(HookOutcome::Continue)
    }
}

/// Holds several runners and dispatches to them in registration order.
/// The first block or error stops the dispatch.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn HookRunner>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register(&mut self, hook: Arc<dyn HookRunner>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl HookRunner for HookRegistry {
    async fn run(&self, phase: HookPhase, ctx: &HookContext) -> Result<HookOutcome, HookError> {
        for hook in &self.hooks {
            let outcome = hook.run(phase, ctx).await?;
            if matches!(outcome, HookOutcome::Block { .. }) {
                return Ok(outcome);
            }
        }
        Ok(HookOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        calls: AtomicUsize,
        outcome: Result<HookOutcome, HookError>,
    }

    impl CountingHook {
        fn new(outcome: Result<HookOutcome, HookError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
            })
        }
    }

    #[async_trait]
    impl HookRunner for CountingHook {
        async fn run(
            &self,
            _phase: HookPhase,
            _ctx: &HookContext,
        ) -> Result<HookOutcome, HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn ctx() -> HookContext {
        HookContext {
            phase: HookPhase::PreToolUse,
            tool_id: "bash".to_string(),
            call_id: "c1".to_string(),
            args: serde_json::json!({"command": "ls"}),
            resource: None,
            outcome: None,
        }
    }

    #[tokio::test]
    async fn test_first_block_stops_dispatch() {
        let first = CountingHook::new(Ok(HookOutcome::Continue));
        let blocker = CountingHook::new(Ok(HookOutcome::Block {
            reason: "no shell".to_string(),
        }));
        let last = CountingHook::new(Ok(HookOutcome::Continue));

        let mut registry = HookRegistry::new();
        registry.register(first.clone());
        registry.register(blocker.clone());
        registry.register(last.clone());
        assert_eq!(registry.len(), 3);

        let outcome = registry.run(HookPhase::PreToolUse, &ctx()).await;
        assert_eq!(
            outcome,
            Ok(HookOutcome::Block {
                reason: "no shell".to_string()
            })
        );
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(blocker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(last.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_propagate_to_caller() {
        let mut registry = HookRegistry::new();
        registry.register(CountingHook::new(Err(HookError::new("audit", "disk full"))));

        let err = registry
            .run(HookPhase::PostToolUse, &ctx())
            .await
            .expect_err("hook error");
        assert_eq!(err.to_string(), "hook 'audit' failed: disk full");
    }

    #[tokio::test]
    async fn test_empty_registry_and_noop_continue() {
        assert!(HookRegistry::default().is_empty());
        assert_eq!(
            HookRegistry::default()
                .run(HookPhase::PreToolUse, &ctx())
                .await,
            Ok(HookOutcome::Continue)
        );
        assert_eq!(
            NoopHooks.run(HookPhase::PreToolUse, &ctx()).await,
            Ok(HookOutcome::Continue)
        );
    }
}
