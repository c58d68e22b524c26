use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bridge_api::now_ms;

/// Monotonic sink counters. Reset only by creating a new instance.
#[derive(Debug)]
pub struct SinkCounter {
    name: String,
    batch_empty: AtomicU64,
    batch_underflow: AtomicU64,
    batch_complete: AtomicU64,
    drain_attempt: AtomicU64,
    drain_success: AtomicU64,
    /// Unix ms, 0 = never.
    start_time: AtomicI64,
    stop_time: AtomicI64,
}

/// Point-in-time copy of [`SinkCounter`], ready for logging as JSON.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    pub name: String,
    pub batch_empty: u64,
    pub batch_underflow: u64,
    pub batch_complete: u64,
    pub drain_attempt: u64,
    pub drain_success: u64,
    pub start_time: i64,
    pub stop_time: i64,
}

impl SinkCounter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_empty: AtomicU64::new(0),
            batch_underflow: AtomicU64::new(0),
            batch_complete: AtomicU64::new(0),
            drain_attempt: AtomicU64::new(0),
            drain_success: AtomicU64::new(0),
            start_time: AtomicI64::new(0),
            stop_time: AtomicI64::new(0),
        }
    }

    pub fn start(&self) {
        self.start_time.store(now_ms(), Ordering::Relaxed);
        self.stop_time.store(0, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stop_time.store(now_ms(), Ordering::Relaxed);
    }

    pub fn inc_batch_empty(&self) -> u64 {
        self.batch_empty.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_batch_underflow(&self) -> u64 {
        self.batch_underflow.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_batch_complete(&self) -> u64 {
        self.batch_complete.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_drain_attempt(&self, n: u64) -> u64 {
        self.drain_attempt.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_drain_success(&self, n: u64) -> u64 {
        self.drain_success.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn batch_empty(&self) -> u64 {
        self.batch_empty.load(Ordering::Relaxed)
    }

    pub fn batch_underflow(&self) -> u64 {
        self.batch_underflow.load(Ordering::Relaxed)
    }

    pub fn batch_complete(&self) -> u64 {
        self.batch_complete.load(Ordering::Relaxed)
    }

    pub fn drain_attempt(&self) -> u64 {
        self.drain_attempt.load(Ordering::Relaxed)
    }

    pub fn drain_success(&self) -> u64 {
        self.drain_success.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            name: self.name.clone(),
            batch_empty: self.batch_empty(),
            batch_underflow: self.batch_underflow(),
            batch_complete: self.batch_complete(),
            drain_attempt: self.drain_attempt(),
            drain_success: self.drain_success(),
            start_time: self.start_time.load(Ordering::Relaxed),
            stop_time: self.stop_time.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let c = SinkCounter::new("s1");
        c.start();
        c.inc_batch_complete();
        c.inc_batch_underflow();
        c.inc_batch_underflow();
        assert_eq!(c.add_drain_attempt(5), 5);
        assert_eq!(c.add_drain_attempt(3), 8);
        c.add_drain_success(5);

        let snap = c.snapshot();
        assert_eq!(snap.batch_complete, 1);
        assert_eq!(snap.batch_underflow, 2);
        assert_eq!(snap.batch_empty, 0);
        assert_eq!(snap.drain_attempt, 8);
        assert_eq!(snap.drain_success, 5);
        assert!(snap.start_time > 0);
        assert_eq!(snap.stop_time, 0);

        c.stop();
        assert!(c.snapshot().stop_time >= snap.start_time);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let c = SinkCounter::new("s1");
        c.inc_batch_empty();
        let json = serde_json::to_value(c.snapshot()).unwrap();
        assert_eq!(json["name"], "s1");
        assert_eq!(json["batch_empty"], 1);
    }
}
