#![allow(dead_code)]

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vexcore::api::ScriptedBroker;
use vexcore::config::RuntimeConfig;
use vexcore::permissions::{
    PermissionAction, PermissionConfig, PermissionEngine, PermissionMode, PermissionRule,
};
use vexcore::tools::{FnTool, RiskLevel, Tool, ToolDescriptor, ToolRegistry};
use vexcore::{RunError, RunEvent, RunStream, Runtime};

pub fn engine(
    rules: Vec<PermissionRule>,
    default_action: PermissionAction,
) -> Arc<PermissionEngine> {
    Arc::new(
        PermissionEngine::new(
            PermissionConfig {
                rules,
                default_action,
            },
            PermissionMode::Default,
        )
        .expect("engine"),
    )
}

pub fn allow_all() -> Arc<PermissionEngine> {
    engine(Vec::new(), PermissionAction::Allow)
}

/// A tool that counts its invocations and echoes its arguments back.
pub struct CountingTool {
    pub calls: Arc<AtomicUsize>,
    pub tool: Arc<dyn Tool>,
}

pub fn echo_tool(id: &str) -> CountingTool {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let descriptor = ToolDescriptor::new(id, "test", RiskLevel::Low)
        .with_description("Echo the arguments back")
        .with_resource_key("path");
    let tool = FnTool::new(descriptor, move |args: Value, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, anyhow::Error>(format!("echo {args}")) }.boxed()
    });
    CountingTool {
        calls,
        tool: Arc::new(tool),
    }
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        tool_timeout: Duration::from_secs(5),
        ..RuntimeConfig::default()
    }
}

pub fn runtime(
    broker: &ScriptedBroker,
    tools: Vec<Arc<dyn Tool>>,
    permissions: Arc<PermissionEngine>,
    config: RuntimeConfig,
) -> Runtime {
    Runtime::new(
        Arc::new(broker.clone()),
        ToolRegistry::new(tools).expect("registry"),
        permissions,
        config,
    )
}

/// Drain a run, answering every permission prompt with `allowed`/`always_allow`.
pub async fn drive(
    runtime: &Runtime,
    mut stream: RunStream,
    allowed: bool,
    always_allow: bool,
) -> (Vec<RunEvent>, Option<RunError>) {
    let mut events = Vec::new();
    let mut error = None;
    let collect = async {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if let RunEvent::PermissionRequest { tool_id, .. } = &event {
                        assert!(runtime.respond_to_permission(tool_id, allowed, always_allow));
                    }
                    events.push(event);
                }
                Err(err) => error = Some(err),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("run finished in time");
    (events, error)
}

pub async fn collect(stream: RunStream) -> (Vec<RunEvent>, Option<RunError>) {
    let mut events = Vec::new();
    let mut error = None;
    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(10), stream.collect())
        .await
        .expect("run finished in time");
    for item in items {
        match item {
            Ok(event) => events.push(event),
            Err(err) => error = Some(err),
        }
    }
    (events, error)
}

pub fn answer_deltas(events: &[RunEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::AnswerDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

pub fn done(events: &[RunEvent]) -> &RunEvent {
    let last = events.last().expect("at least one event");
    assert!(last.is_done(), "last event should be done, got {last:?}");
    last
}
