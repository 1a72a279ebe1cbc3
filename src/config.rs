use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::permissions::{AlwaysAllowPersistence, PermissionMode};
use crate::util::{env_override_u64, env_override_usize, env_string, parse_bool_flag};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a command-line research assistant.\n\
Use tools for facts you cannot derive from the conversation.\n\
After each tool result, reassess the task and either call the next needed tool \
or give the final answer.\n\
Never claim a tool succeeded unless its result says so.\n\
If a tool call is denied, do not retry it unchanged; explain what you could not do.";

const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_TRANSCRIPT_MESSAGES: usize = 32;
const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 6_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub system_prompt: String,
    /// Upper bound on model-streaming rounds per run.
    pub max_iterations: usize,
    pub tool_timeout: Duration,
    /// `None` leaves round streaming unbounded.
    pub round_timeout: Option<Duration>,
    pub max_transcript_messages: usize,
    pub max_tool_result_chars: usize,
    pub permissions_path: Option<PathBuf>,
    pub persist_always_allow: bool,
    pub permission_mode: PermissionMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            round_timeout: None,
            max_transcript_messages: DEFAULT_MAX_TRANSCRIPT_MESSAGES,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            permissions_path: None,
            persist_always_allow: false,
            permission_mode: PermissionMode::Default,
        }
    }
}

impl RuntimeConfig {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let round_timeout_secs = env_override_u64("VEX_ROUND_TIMEOUT_SECS", 0, 0, 3_600);
        let permission_mode = match env_string("VEX_PERMISSION_MODE") {
            Some(raw) => raw
                .parse::<PermissionMode>()
                .with_context(|| format!("Invalid VEX_PERMISSION_MODE '{raw}'"))?,
            None => defaults.permission_mode,
        };
        let persist_always_allow = std::env::var("VEX_PERSIST_ALWAYS_ALLOW")
            .ok()
            .and_then(parse_bool_flag)
            .unwrap_or(defaults.persist_always_allow);

        Ok(Self {
            system_prompt: env_string("VEX_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            max_iterations: env_override_usize(
                "VEX_MAX_ITERATIONS",
                defaults.max_iterations,
                1,
                64,
            ),
            tool_timeout: Duration::from_secs(env_override_u64(
                "VEX_TOOL_TIMEOUT_SECS",
                DEFAULT_TOOL_TIMEOUT_SECS,
                2,
                600,
            )),
            round_timeout: (round_timeout_secs > 0)
                .then(|| Duration::from_secs(round_timeout_secs)),
            max_transcript_messages: env_override_usize(
                "VEX_MAX_TRANSCRIPT_MESSAGES",
                defaults.max_transcript_messages,
                4,
                256,
            ),
            max_tool_result_chars: env_override_usize(
                "VEX_MAX_TOOL_RESULT_CHARS",
                defaults.max_tool_result_chars,
                200,
                100_000,
            ),
            permissions_path: env_string("VEX_PERMISSIONS_PATH").map(PathBuf::from),
            persist_always_allow,
            permission_mode,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            bail!("max_iterations must be at least 1");
        }

        if self.system_prompt.trim().is_empty() {
            bail!("system prompt must not be empty");
        }

        if self.persist_always_allow && self.permissions_path.is_none() {
            bail!("VEX_PERSIST_ALWAYS_ALLOW requires VEX_PERMISSIONS_PATH to be set");
        }

        if self.max_transcript_messages < 2 {
            bail!(
                "max_transcript_messages must keep at least 2 messages (got {})",
                self.max_transcript_messages
            );
        }

        Ok(())
    }

    pub fn always_allow_persistence(&self) -> AlwaysAllowPersistence {
        match (&self.permissions_path, self.persist_always_allow) {
            (Some(path), true) => AlwaysAllowPersistence::File(path.clone()),
            _ => AlwaysAllowPersistence::InMemory,
        }
    }
}
