use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running byte totals for the status line. `sent` and `received` are
/// cleared independently.
#[derive(Debug, Default)]
pub struct TransferCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl TransferCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent(&self, n: usize) {
        self.sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_received(&self, n: usize) {
        self.received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn clear_sent(&self) {
        self.sent.store(0, Ordering::Relaxed);
    }

    pub fn clear_received(&self) {
        self.received.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for TransferCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Send: {}  |  Receive: {}", self.sent(), self.received())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_clear_independently() {
        let c = TransferCounters::new();
        c.add_sent(5);
        c.add_sent(3);
        c.add_received(7);
        assert_eq!((c.sent(), c.received()), (8, 7));

        c.clear_sent();
        assert_eq!((c.sent(), c.received()), (0, 7));
        c.add_sent(2);
        c.clear_received();
        assert_eq!((c.sent(), c.received()), (2, 0));
        assert_eq!(c.to_string(), "Send: 2  |  Receive: 0");
    }
}
