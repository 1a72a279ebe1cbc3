//! Tool dispatch contract consumed by the runtime.
//!
//! Tools are opaque to the runtime: it only needs a descriptor to advertise
//! to the model, a resource to feed the permission engine, and `execute`.

mod registry;

pub use registry::{RegistryError, ToolRegistry};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub description: String,
    /// Grouping such as `finance`, `file`, `browser`.
    pub domain: String,
    pub risk_level: RiskLevel,
    /// JSON schema of the arguments object.
    pub schema: Value,
    /// Argument whose string value is the resource permission rules match on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>, domain: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            domain: domain.into(),
            risk_level,
            schema: serde_json::json!({"type": "object"}),
            resource_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_resource_key(mut self, key: impl Into<String>) -> Self {
        self.resource_key = Some(key.into());
        self
    }

    /// The call's resource, if this tool names one and the argument is a
    /// non-empty string.
    pub fn resource_from_args(&self, args: &Value) -> Option<String> {
        let key = self.resource_key.as_deref()?;
        args.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Forwards a running tool's progress messages to the run's event stream.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(String) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, message: impl Into<String>) {
        (self.sink)(message.into());
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Per-call context handed to `Tool::execute`.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
    pub config: Arc<RuntimeConfig>,
}

impl ToolContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool. An `Err` is reported to the model as a tool error; it
    /// never aborts the run.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;
}

type ToolFn = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<String>> + Send + Sync;

/// A tool backed by a closure.
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> BoxFuture<'static, Result<String>> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        (self.handler)(args, ctx.clone()).await
    }
}
