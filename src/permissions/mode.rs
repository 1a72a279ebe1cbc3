use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::PermissionAction;

/// Tools `auto-accept` lets through without asking.
pub const FILE_EDIT_TOOLS: [&str; 5] = [
    "edit_file",
    "write_file",
    "multi_edit",
    "create_file",
    "rename_file",
];

/// The only tools `plan` mode allows.
pub const READ_ONLY_TOOLS: [&str; 9] = [
    "read_file",
    "list_files",
    "search_files",
    "glob",
    "grep",
    "git_status",
    "git_diff",
    "git_log",
    "git_show",
];

pub fn is_file_edit_tool(tool_id: &str) -> bool {
    FILE_EDIT_TOOLS.contains(&tool_id)
}

pub fn is_read_only_tool(tool_id: &str) -> bool {
    READ_ONLY_TOOLS.contains(&tool_id)
}

/// Session-wide override reshaping rule decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Default,
    AutoAccept,
    Plan,
    Delegate,
}

impl PermissionMode {
    pub const CYCLE: [PermissionMode; 4] = [
        PermissionMode::Default,
        PermissionMode::AutoAccept,
        PermissionMode::Plan,
        PermissionMode::Delegate,
    ];

    pub fn next(self) -> Self {
        match self {
            PermissionMode::Default => PermissionMode::AutoAccept,
            PermissionMode::AutoAccept => PermissionMode::Plan,
            PermissionMode::Plan => PermissionMode::Delegate,
            PermissionMode::Delegate => PermissionMode::Default,
        }
    }

    /// Apply this mode on top of a rule-derived decision.
    pub fn overlay(self, tool_id: &str, base: PermissionAction) -> PermissionAction {
        match self {
            PermissionMode::Default | PermissionMode::Delegate => base,
            PermissionMode::AutoAccept => {
                if is_file_edit_tool(tool_id) {
                    PermissionAction::Allow
                } else {
                    base
                }
            }
            PermissionMode::Plan => {
                if is_read_only_tool(tool_id) {
                    PermissionAction::Allow
                } else {
                    PermissionAction::Deny
                }
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AutoAccept => "auto-accept",
            PermissionMode::Plan => "plan",
            PermissionMode::Delegate => "delegate",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(PermissionMode::Default),
            "auto-accept" | "auto_accept" | "autoaccept" => Ok(PermissionMode::AutoAccept),
            "plan" => Ok(PermissionMode::Plan),
            "delegate" => Ok(PermissionMode::Delegate),
            other => anyhow::bail!(
                "unknown permission mode '{other}' \
                 (expected default, auto-accept, plan or delegate)"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_order_wraps() {
        let mut mode = PermissionMode::Default;
        let mut visited = vec![mode];
        for _ in 0..4 {
            mode = mode.next();
            visited.push(mode);
        }
        assert_eq!(
            visited,
            vec![
                PermissionMode::Default,
                PermissionMode::AutoAccept,
                PermissionMode::Plan,
                PermissionMode::Delegate,
                PermissionMode::Default,
            ]
        );
        for pair in PermissionMode::CYCLE.windows(2) {
            assert_eq!(pair[0].next(), pair[1]);
        }
    }

    #[test]
    fn test_plan_overlay_is_a_hard_sandbox() {
        let plan = PermissionMode::Plan;
        assert_eq!(
            plan.overlay("read_file", PermissionAction::Deny),
            PermissionAction::Allow
        );
        assert_eq!(
            plan.overlay("bash", PermissionAction::Allow),
            PermissionAction::Deny
        );
    }

    #[test]
    fn test_auto_accept_only_touches_file_edit_tools() {
        let mode = PermissionMode::AutoAccept;
        assert_eq!(
            mode.overlay("edit_file", PermissionAction::Deny),
            PermissionAction::Allow
        );
        assert_eq!(
            mode.overlay("bash", PermissionAction::Ask),
            PermissionAction::Ask
        );
        assert_eq!(
            PermissionMode::Delegate.overlay("bash", PermissionAction::Deny),
            PermissionAction::Deny
        );
    }

    #[test]
    fn test_mode_parses_and_displays() {
        for mode in PermissionMode::CYCLE {
            assert_eq!(mode.to_string().parse::<PermissionMode>().unwrap(), mode);
        }
        assert_eq!(
            "AUTO_ACCEPT".parse::<PermissionMode>().unwrap(),
            PermissionMode::AutoAccept
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
        assert_eq!(
            serde_json::to_string(&PermissionMode::AutoAccept).unwrap(),
            "\"auto-accept\""
        );
    }
}
