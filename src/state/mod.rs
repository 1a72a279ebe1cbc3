mod conversation;
mod run_state;

pub use conversation::Conversation;
pub use run_state::{PendingPermission, RunState, RunStatus};
