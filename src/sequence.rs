//! Latest-wins request sequencing
//!
//! Async detection calls are not cancellable. Each call takes a ticket when it
//! starts and only applies its result if no newer ticket was issued meanwhile.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ticket captured at the start of an async operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Monotonic generation counter
#[derive(Debug, Default)]
pub struct RequestGuard {
    latest: AtomicU64,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, superseding any in flight
    pub fn begin(&self) -> RequestTicket {
        RequestTicket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// True if no request was started after `ticket`
    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_ticket_supersedes() {
        let guard = RequestGuard::new();
        let first = guard.begin();
        assert!(guard.is_current(first));

        let second = guard.begin();
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));
        assert!(second.id() > first.id());
    }
}
