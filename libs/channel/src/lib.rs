use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use bridge_api::{BridgeError, Channel, Event, Transaction, TransactionState};

// ═══════════════════════════════════════════════════════════════
//  MemoryChannelConfig
// ═══════════════════════════════════════════════════════════════

fn default_capacity() -> usize {
    10_000
}
fn default_keep_alive_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct MemoryChannelConfig {
    /// Max events held at once, queued plus taken-but-uncommitted.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Upper bound for a single `take` wait, regardless of what the
    /// caller asks for.
    #[serde(default = "default_keep_alive_ms", alias = "keepAlive")]
    pub keep_alive_ms: u64,
}

impl Default for MemoryChannelConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            keep_alive_ms: default_keep_alive_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryChannel
// ═══════════════════════════════════════════════════════════════

struct Queue {
    events: VecDeque<Event>,
    in_flight: usize,
}

/// In-process transactional queue.
///
/// Taken events stay reserved (counted against capacity) until the
/// transaction commits; a rollback puts them back at the head of the
/// queue in their original order, so redelivery keeps ordering.
pub struct MemoryChannel {
    name: String,
    capacity: usize,
    keep_alive: Duration,
    queue: Mutex<Queue>,
    available: Notify,
    open: AtomicUsize,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>, config: &MemoryChannelConfig) -> Self {
        Self {
            name: name.into(),
            capacity: config.capacity.max(1),
            keep_alive: Duration::from_millis(config.keep_alive_ms),
            queue: Mutex::new(Queue {
                events: VecDeque::with_capacity(config.capacity.min(65536)),
                in_flight: 0,
            }),
            available: Notify::new(),
            open: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue one event. Fails with an `Io` error when the channel is full.
    pub fn put(&self, event: Event) -> Result<(), BridgeError> {
        {
            let mut q = self.lock();
            if q.events.len() + q.in_flight >= self.capacity {
                return Err(BridgeError::io(format!(
                    "channel '{}' full ({} events)",
                    self.name, self.capacity
                )));
            }
            q.events.push_back(event);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Enqueue all events or none of them.
    pub fn put_all(&self, events: Vec<Event>) -> Result<(), BridgeError> {
        {
            let mut q = self.lock();
            if q.events.len() + q.in_flight + events.len() > self.capacity {
                return Err(BridgeError::io(format!(
                    "channel '{}' cannot accept {} events (capacity {})",
                    self.name,
                    events.len(),
                    self.capacity
                )));
            }
            q.events.extend(events);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Events waiting to be taken.
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events taken by a transaction that has not committed yet.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Transactions begun and not yet closed.
    pub fn open_transactions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn pop(&self) -> Option<Event> {
        let mut q = self.lock();
        let event = q.events.pop_front()?;
        q.in_flight += 1;
        Some(event)
    }

    fn release(&self, committed: usize) {
        let mut q = self.lock();
        q.in_flight = q.in_flight.saturating_sub(committed);
    }

    fn restore(&self, taken: Vec<Event>) {
        let n = taken.len();
        {
            let mut q = self.lock();
            for event in taken.into_iter().rev() {
                q.events.push_front(event);
            }
            q.in_flight = q.in_flight.saturating_sub(n);
        }
        if n > 0 {
            self.available.notify_one();
        }
    }
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn transaction(&self) -> Box<dyn Transaction + '_> {
        Box::new(MemoryTransaction {
            channel: self,
            state: TransactionState::NotStarted,
            taken: Vec::new(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransaction
// ═══════════════════════════════════════════════════════════════

struct MemoryTransaction<'a> {
    channel: &'a MemoryChannel,
    state: TransactionState,
    taken: Vec<Event>,
}

impl MemoryTransaction<'_> {
    fn expect_open(&self, op: &str) -> Result<(), BridgeError> {
        if self.state != TransactionState::Open {
            return Err(BridgeError::logic(format!(
                "{op} on channel '{}': transaction is {}",
                self.channel.name, self.state
            )));
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn begin(&mut self) -> Result<(), BridgeError> {
        if self.state != TransactionState::NotStarted {
            return Err(BridgeError::logic(format!(
                "begin on channel '{}': transaction is {}",
                self.channel.name, self.state
            )));
        }
        self.channel.open.fetch_add(1, Ordering::SeqCst);
        self.state = TransactionState::Open;
        Ok(())
    }

    fn take(
        &mut self,
        max_wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            self.expect_open("take")?;
            let deadline = Instant::now() + max_wait.min(self.channel.keep_alive);
            loop {
                // Register interest before checking, so a put() racing with
                // the check still wakes us.
                let notified = self.channel.available.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(event) = self.channel.pop() {
                    self.taken.push(event.clone());
                    return Ok(Some(event));
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn commit(&mut self) -> Result<(), BridgeError> {
        self.expect_open("commit")?;
        self.channel.release(self.taken.len());
        self.taken.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BridgeError> {
        self.expect_open("rollback")?;
        let taken = std::mem::take(&mut self.taken);
        if !taken.is_empty() {
            tracing::debug!(channel = %self.channel.name, events = taken.len(), "returning events to queue");
        }
        self.channel.restore(taken);
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    fn close(&mut self) {
        match self.state {
            TransactionState::Closed | TransactionState::NotStarted => {}
            TransactionState::Open => {
                tracing::warn!(channel = %self.channel.name, "closing open transaction, rolling back");
                let taken = std::mem::take(&mut self.taken);
                self.channel.restore(taken);
                self.channel.open.fetch_sub(1, Ordering::SeqCst);
            }
            TransactionState::Committed | TransactionState::RolledBack => {
                self.channel.open.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.state = TransactionState::Closed;
    }

    fn state(&self) -> TransactionState {
        self.state
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(capacity: usize) -> MemoryChannel {
        MemoryChannel::new("test", &MemoryChannelConfig { capacity, keep_alive_ms: 3_000 })
    }

    fn ev(body: &str) -> Event {
        Event::with_body(body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn commit_consumes_events() {
        let ch = channel(10);
        ch.put(ev("a")).unwrap();
        ch.put(ev("b")).unwrap();

        let mut tx = ch.transaction();
        tx.begin().unwrap();
        assert_eq!(tx.take(Duration::ZERO).await.unwrap(), Some(ev("a")));
        assert_eq!(ch.in_flight(), 1);
        tx.commit().unwrap();
        tx.close();

        assert_eq!(ch.len(), 1);
        assert_eq!(ch.in_flight(), 0);
        assert_eq!(ch.open_transactions(), 0);
    }

    #[tokio::test]
    async fn rollback_restores_order_at_head() {
        let ch = channel(10);
        for b in ["a", "b", "c"] {
            ch.put(ev(b)).unwrap();
        }

        let mut tx = ch.transaction();
        tx.begin().unwrap();
        tx.take(Duration::ZERO).await.unwrap();
        tx.take(Duration::ZERO).await.unwrap();
        tx.rollback().unwrap();
        tx.close();

        let mut tx = ch.transaction();
        tx.begin().unwrap();
        let mut bodies = Vec::new();
        while let Some(e) = tx.take(Duration::ZERO).await.unwrap() {
            bodies.push(String::from_utf8(e.body().to_vec()).unwrap());
        }
        assert_eq!(bodies, ["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn take_waits_for_a_late_put() {
        let ch = std::sync::Arc::new(channel(10));
        let producer = ch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            producer.put(ev("late")).unwrap();
        });

        let mut tx = ch.transaction();
        tx.begin().unwrap();
        let got = tx.take(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, Some(ev("late")));
        tx.commit().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn take_gives_up_after_keep_alive() {
        let ch = MemoryChannel::new("idle", &MemoryChannelConfig { capacity: 4, keep_alive_ms: 100 });
        let mut tx = ch.transaction();
        tx.begin().unwrap();

        let started = Instant::now();
        assert_eq!(tx.take(Duration::from_secs(10)).await.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(100));
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn capacity_counts_in_flight_events() {
        let ch = channel(2);
        ch.put(ev("a")).unwrap();
        ch.put(ev("b")).unwrap();
        assert!(ch.put(ev("c")).is_err());

        let mut tx = ch.transaction();
        tx.begin().unwrap();
        tx.take(Duration::ZERO).await.unwrap();
        // still reserved until commit
        assert!(ch.put(ev("c")).is_err());
        tx.commit().unwrap();
        drop(tx);
        ch.put(ev("c")).unwrap();
    }

    #[tokio::test]
    async fn put_all_is_all_or_nothing() {
        let ch = channel(3);
        ch.put(ev("a")).unwrap();
        assert!(ch.put_all(vec![ev("b"), ev("c"), ev("d")]).is_err());
        assert_eq!(ch.len(), 1);
        ch.put_all(vec![ev("b"), ev("c")]).unwrap();
        assert_eq!(ch.len(), 3);
    }

    #[tokio::test]
    async fn misuse_is_a_logic_error() {
        let ch = channel(2);
        let mut tx = ch.transaction();
        let err = tx.take(Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), bridge_api::ErrorKind::Logic);

        tx.begin().unwrap();
        assert!(tx.begin().is_err());
        tx.commit().unwrap();
        assert!(tx.commit().is_err());
        assert!(tx.rollback().is_err());
    }

    #[tokio::test]
    async fn dropping_an_open_transaction_rolls_back() {
        let ch = channel(4);
        ch.put(ev("a")).unwrap();
        {
            let mut tx = ch.transaction();
            tx.begin().unwrap();
            tx.take(Duration::ZERO).await.unwrap();
            assert_eq!(ch.open_transactions(), 1);
        }
        assert_eq!(ch.open_transactions(), 0);
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.in_flight(), 0);
    }
}
