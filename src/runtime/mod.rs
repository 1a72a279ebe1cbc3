//! Session runtime: drives a run's model rounds and tool calls and reports
//! them as an ordered stream of [`RunEvent`]s.

mod context;
pub mod event;
mod r#loop;
mod permission;
mod stream;

pub use event::{RunEvent, ToolCallRecord, ToolOutcome};
pub use stream::RunStream;

use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::api::{BrokerError, ModelBroker};
use crate::config::RuntimeConfig;
use crate::hooks::{HookRunner, NoopHooks};
use crate::permissions::PermissionEngine;
use crate::state::Conversation;
use crate::tools::ToolRegistry;
use crate::types::ApiMessage;
use context::RunContext;
use permission::{PermissionGate, PermissionReply};
use r#loop::RunDriver;

/// Fatal run failures. Tool failures never show up here; they are reported
/// as `tool_error` events and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Model(#[from] BrokerError),

    #[error("model round timed out after {}s", .0.as_secs())]
    RoundTimeout(Duration),
}

/// Long-lived session: the broker, tools, permission engine and hooks every
/// run uses, plus the transcript of completed turns.
pub struct Runtime {
    broker: Arc<dyn ModelBroker>,
    tools: ToolRegistry,
    permissions: Arc<PermissionEngine>,
    hooks: Arc<dyn HookRunner>,
    config: Arc<RuntimeConfig>,
    gate: Arc<PermissionGate>,
    history: Arc<Mutex<Conversation>>,
    next_run_id: AtomicU64,
}

impl Runtime {
    pub fn new(
        broker: Arc<dyn ModelBroker>,
        tools: ToolRegistry,
        permissions: Arc<PermissionEngine>,
        config: RuntimeConfig,
    ) -> Self {
        let history = Conversation::new(config.max_tool_result_chars);
        Self {
            broker,
            tools,
            permissions,
            hooks: Arc::new(NoopHooks),
            config: Arc::new(config),
            gate: Arc::new(PermissionGate::default()),
            history: Arc::new(Mutex::new(history)),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Start a run for `utterance`. The returned stream is lazy; cancel the
    /// token or drop the stream to stop it.
    pub fn start_run(&self, utterance: impl Into<String>, cancel: CancellationToken) -> RunStream {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = RunDriver {
            broker: Arc::clone(&self.broker),
            tools: self.tools.clone(),
            permissions: Arc::clone(&self.permissions),
            hooks: Arc::clone(&self.hooks),
            config: Arc::clone(&self.config),
            gate: Arc::clone(&self.gate),
            history: Arc::clone(&self.history),
            cancel,
        };
        let utterance = utterance.into();
        let future = async move { driver.run(utterance, RunContext::new(tx)).await }
            .instrument(info_span!("run", run_id))
            .boxed();
        RunStream::new(future, rx)
    }

    /// Resume the oldest run waiting on a permission prompt for `tool_id`.
    /// Returns `false` when no run is waiting.
    pub fn respond_to_permission(&self, tool_id: &str, allowed: bool, always_allow: bool) -> bool {
        let resumed = self.gate.respond(
            tool_id,
            PermissionReply {
                allowed,
                always_allow,
            },
        );
        if !resumed {
            info!(tool = tool_id, "permission response with no pending request");
        }
        resumed
    }

    /// Tool ids with an unanswered permission request, oldest first.
    pub fn pending_permissions(&self) -> Vec<String> {
        self.gate.pending_tools()
    }

    pub fn permissions(&self) -> &Arc<PermissionEngine> {
        &self.permissions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Completed turns carried into the next run.
    pub fn history(&self) -> Vec<ApiMessage> {
        self.lock_history().messages().to_vec()
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
        info!("session history cleared");
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Conversation> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
