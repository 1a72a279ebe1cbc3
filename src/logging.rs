//! Log output for embedders: a `tracing` subscriber filtered by `VEX_LOG`
//! and written to `VEX_LOG_PATH` when set, stderr otherwise.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::util::env_string;

const LOG_FILTER_ENV: &str = "VEX_LOG";
const LOG_PATH_ENV: &str = "VEX_LOG_PATH";
const DEFAULT_LOG_FILTER: &str = "info";

/// Install the global subscriber. Fails if one is already installed or the
/// log file cannot be opened.
pub fn init() -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter())
        .with_target(false)
        .with_level(true);

    match resolve_log_path() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    }
    .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))
}

/// `VEX_LOG` as an `EnvFilter` directive, falling back to `info` when unset
/// or unparseable.
fn resolve_filter() -> EnvFilter {
    env_string(LOG_FILTER_ENV)
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn resolve_log_path() -> Option<PathBuf> {
    env_string(LOG_PATH_ENV).map(PathBuf::from)
}
