use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use tracing::{debug, info};

use super::pattern::GlobPattern;
use super::store::{load_permission_config, save_permission_config, AlwaysAllowPersistence};
use super::{PermissionAction, PermissionConfig, PermissionError, PermissionMode, PermissionRule};
use crate::config::RuntimeConfig;

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PermissionRule,
    tool: GlobPattern,
    resource: Option<GlobPattern>,
}

impl CompiledRule {
    fn compile(rule: PermissionRule) -> Result<Self, PermissionError> {
        let tool = GlobPattern::compile(&rule.tool)?;
        let resource = rule
            .resource
            .as_deref()
            .map(GlobPattern::compile)
            .transpose()?;
        Ok(Self {
            rule,
            tool,
            resource,
        })
    }

    fn matches(&self, tool_id: &str, resource: Option<&str>) -> bool {
        if !self.tool.matches(tool_id) {
            return false;
        }
        match (&self.resource, resource) {
            (None, _) => true,
            (Some(pattern), Some(resource)) => pattern.matches(resource),
            (Some(_), None) => false,
        }
    }
}

/// Outcome of a permission check, with the rule that produced the base decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Decision after the mode overlay.
    pub action: PermissionAction,
    /// Decision from rules / default action alone.
    pub base: PermissionAction,
    /// `None` when the default action applied.
    pub rule: Option<PermissionRule>,
    pub mode: PermissionMode,
}

/// Rule list + default action + active mode, shared by every run in a process.
///
/// Checks only read. The single mutation, installing an "always allow" rule,
/// inserts and never removes.
#[derive(Debug)]
pub struct PermissionEngine {
    rules: RwLock<Vec<CompiledRule>>,
    default_action: PermissionAction,
    mode: RwLock<PermissionMode>,
    persistence: AlwaysAllowPersistence,
}

impl PermissionEngine {
    pub fn new(config: PermissionConfig, mode: PermissionMode) -> Result<Self, PermissionError> {
        let rules = config
            .rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules: RwLock::new(rules),
            default_action: config.default_action,
            mode: RwLock::new(mode),
            persistence: AlwaysAllowPersistence::InMemory,
        })
    }

    pub fn with_persistence(mut self, persistence: AlwaysAllowPersistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Build the engine described by the runtime config, reading the rule file
    /// when one is configured.
    pub fn from_runtime_config(config: &RuntimeConfig) -> Result<Self> {
        let permission_config = match &config.permissions_path {
            Some(path) => load_permission_config(path)?,
            None => PermissionConfig::default(),
        };
        let engine = Self::new(permission_config, config.permission_mode)?
            .with_persistence(config.always_allow_persistence());
        Ok(engine)
    }

    pub fn evaluate(&self, tool_id: &str, resource: Option<&str>) -> Evaluation {
        let mode = self.mode();
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let matched = rules.iter().find(|rule| rule.matches(tool_id, resource));
        let base = matched.map_or(self.default_action, |rule| rule.rule.action);
        let action = mode.overlay(tool_id, base);

        debug!(
            tool = tool_id,
            resource = resource.unwrap_or(""),
            %base,
            %action,
            %mode,
            "permission check"
        );

        Evaluation {
            action,
            base,
            rule: matched.map(|rule| rule.rule.clone()),
            mode,
        }
    }

    pub fn check(&self, tool_id: &str, resource: Option<&str>) -> PermissionAction {
        self.evaluate(tool_id, resource).action
    }

    pub fn mode(&self) -> PermissionMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: PermissionMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
        info!(%mode, "permission mode changed");
    }

    /// Advance default → auto-accept → plan → delegate → default.
    pub fn cycle_mode(&self) -> PermissionMode {
        let mut mode = self.mode.write().unwrap_or_else(PoisonError::into_inner);
        *mode = mode.next();
        info!(mode = %*mode, "permission mode changed");
        *mode
    }

    pub fn default_action(&self) -> PermissionAction {
        self.default_action
    }

    pub fn persistence(&self) -> &AlwaysAllowPersistence {
        &self.persistence
    }

    pub fn rules(&self) -> Vec<PermissionRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|rule| rule.rule.clone())
            .collect()
    }

    pub fn config(&self) -> PermissionConfig {
        PermissionConfig {
            rules: self.rules(),
            default_action: self.default_action,
        }
    }

    /// Install an `allow` rule so later checks for `tool_id` stop asking.
    ///
    /// The rule goes directly in front of the rule that currently answers
    /// `ask` for this call and carries that rule's resource scope, so earlier
    /// rules keep precedence and later rules for other resources still apply.
    /// When the ask came from the default action an unscoped rule is appended.
    /// Returns `false` when the rules already allow the call.
    pub fn always_allow(
        &self,
        tool_id: &str,
        resource: Option<&str>,
    ) -> Result<bool, PermissionError> {
        let snapshot = {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            let position = rules.iter().position(|r| r.matches(tool_id, resource));
            match position {
                Some(index) if rules[index].rule.action == PermissionAction::Allow => {
                    return Ok(false);
                }
                Some(index) if rules[index].rule.action == PermissionAction::Ask => {
                    let mut rule = PermissionRule::new(tool_id, PermissionAction::Allow);
                    rule.resource = rules[index].rule.resource.clone();
                    rules.insert(index, CompiledRule::compile(rule)?);
                }
                None if self.default_action == PermissionAction::Allow => return Ok(false),
                Some(_) | None => {
                    let rule = PermissionRule::new(tool_id, PermissionAction::Allow);
                    rules.push(CompiledRule::compile(rule)?);
                }
            }
            PermissionConfig {
                rules: rules.iter().map(|r| r.rule.clone()).collect(),
                default_action: self.default_action,
            }
        };

        info!(tool = tool_id, "installed always-allow rule");

        if let AlwaysAllowPersistence::File(path) = &self.persistence {
            save_permission_config(path, &snapshot).map_err(|err| PermissionError::Persist {
                path: path.clone(),
                reason: format!("{err:#}"),
            })?;
            debug!(path = %path.display(), "persisted permission rules");
        }

        Ok(true)
    }
}
