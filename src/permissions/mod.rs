//! Permission rules, modes and the engine that turns a tool call into
//! allow / ask / deny.

mod engine;
mod mode;
mod pattern;
mod store;

pub use engine::{Evaluation, PermissionEngine};
pub use mode::{
    is_file_edit_tool, is_read_only_tool, PermissionMode, FILE_EDIT_TOOLS, READ_ONLY_TOOLS,
};
pub use pattern::GlobPattern;
pub use store::{load_permission_config, save_permission_config, AlwaysAllowPersistence};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Allow,
    Ask,
    Deny,
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionAction::Allow => f.write_str("allow"),
            PermissionAction::Ask => f.write_str("ask"),
            PermissionAction::Deny => f.write_str("deny"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Glob over tool ids.
    pub tool: String,
    /// Optional glob over the call's resource (path, url, symbol...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub action: PermissionAction,
}

impl PermissionRule {
    pub fn new(tool: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            tool: tool.into(),
            resource: None,
            action,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Ordered rule list plus the fallback action. Rule order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionConfig {
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
    #[serde(default = "default_action")]
    pub default_action: PermissionAction,
}

fn default_action() -> PermissionAction {
    PermissionAction::Ask
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_action: default_action(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("invalid permission pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to persist permission rules to {}: {reason}", path.display())]
    Persist { path: PathBuf, reason: String },
}
