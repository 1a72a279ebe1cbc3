use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// A consumer's answer to a `permission_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PermissionReply {
    pub allowed: bool,
    pub always_allow: bool,
}

impl PermissionReply {
    pub(super) const DENIED: PermissionReply = PermissionReply {
        allowed: false,
        always_allow: false,
    };
}

struct PendingEntry {
    id: u64,
    tool_id: String,
    reply: oneshot::Sender<PermissionReply>,
}

/// Runs suspended on a permission prompt, oldest first. Shared by every run a
/// `Runtime` starts.
#[derive(Default)]
pub(super) struct PermissionGate {
    next_id: AtomicU64,
    pending: Mutex<Vec<PendingEntry>>,
}

impl PermissionGate {
    pub(super) fn register(
        self: &Arc<Self>,
        tool_id: &str,
    ) -> (PendingTicket, oneshot::Receiver<PermissionReply>) {
        let (reply, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(PendingEntry {
            id,
            tool_id: tool_id.to_string(),
            reply,
        });
        let ticket = PendingTicket {
            gate: Arc::clone(self),
            id,
        };
        (ticket, rx)
    }

    /// Resolve the oldest wait for `tool_id`. Entries whose run already went
    /// away are skipped.
    pub(super) fn respond(&self, tool_id: &str, reply: PermissionReply) -> bool {
        let mut pending = self.lock();
        while let Some(index) = pending.iter().position(|entry| entry.tool_id == tool_id) {
            let entry = pending.remove(index);
            if entry.reply.send(reply).is_ok() {
                return true;
            }
        }
        false
    }

    pub(super) fn pending_tools(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|entry| entry.tool_id.clone())
            .collect()
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|entry| entry.id != id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its gate entry when dropped, whether the wait was answered,
/// cancelled, or the whole run was dropped mid-wait.
pub(super) struct PendingTicket {
    gate: Arc<PermissionGate>,
    id: u64,
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        self.gate.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOW: PermissionReply = PermissionReply {
        allowed: true,
        always_allow: false,
    };

    #[test]
    fn test_respond_resolves_oldest_matching_wait() {
        let gate = Arc::new(PermissionGate::default());
        let (_first_ticket, mut first) = gate.register("bash");
        let (_other_ticket, mut other) = gate.register("web_fetch");
        let (_second_ticket, mut second) = gate.register("bash");

        assert!(gate.respond("bash", ALLOW));
        assert_eq!(first.try_recv().ok(), Some(ALLOW));
        assert!(second.try_recv().is_err());
        assert!(other.try_recv().is_err());
        assert_eq!(gate.pending_tools(), vec!["web_fetch", "bash"]);
    }

    #[test]
    fn test_respond_without_pending_is_noop() {
        let gate = Arc::new(PermissionGate::default());
        assert!(!gate.respond("bash", ALLOW));
    }

    #[test]
    fn test_dropped_ticket_clears_entry() {
        let gate = Arc::new(PermissionGate::default());
        let (ticket, rx) = gate.register("bash");
        drop(ticket);
        drop(rx);
        assert!(gate.pending_tools().is_empty());
        assert!(!gate.respond("bash", PermissionReply::DENIED));
    }

    #[test]
    fn test_respond_skips_abandoned_receivers() {
        let gate = Arc::new(PermissionGate::default());
        let (_stale_ticket, stale) = gate.register("bash");
        drop(stale);
        let (_live_ticket, mut live) = gate.register("bash");

        assert!(gate.respond("bash", ALLOW));
        assert_eq!(live.try_recv().ok(), Some(ALLOW));
    }
}
