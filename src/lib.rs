pub mod api;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod permissions;
pub mod runtime;
pub mod state;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;

pub use runtime::{RunError, RunEvent, RunStream, Runtime};
