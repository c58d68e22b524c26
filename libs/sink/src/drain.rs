use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use bridge_api::{BatchBroadcaster, BridgeError, Channel, Event, EventSerializer, Transaction, TransactionState};

use crate::SinkCounter;

/// Outcome of one drain iteration, used by the runner to pace itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Batch delivered; call again right away.
    Ready,
    /// Nothing delivered (empty batch or failure); back off before retrying.
    Backoff,
}

/// Closes the transaction on every exit path.
struct TxnGuard<'a>(Box<dyn Transaction + 'a>);

impl<'a> Deref for TxnGuard<'a> {
    type Target = dyn Transaction + 'a;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for TxnGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

// ═══════════════════════════════════════════════════════════════
//  BatchDrainLoop
// ═══════════════════════════════════════════════════════════════

/// One transaction per iteration: take → serialize → broadcast → commit,
/// or roll everything back.
///
/// Бюджет времени batch'а отсчитывается от последнего успешного commit'а,
/// а не от начала итерации.
pub struct BatchDrainLoop {
    name: String,
    channel: Arc<dyn Channel>,
    serializer: Arc<dyn EventSerializer>,
    broadcaster: Arc<dyn BatchBroadcaster>,
    counter: Arc<SinkCounter>,
    batch_size: usize,
    transaction_time: Duration,
    last_commit: Instant,
}

impl BatchDrainLoop {
    pub fn new(
        name: impl Into<String>,
        channel: Arc<dyn Channel>,
        serializer: Arc<dyn EventSerializer>,
        broadcaster: Arc<dyn BatchBroadcaster>,
        counter: Arc<SinkCounter>,
        batch_size: usize,
        transaction_time: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            serializer,
            broadcaster,
            counter,
            batch_size: batch_size.max(1),
            transaction_time,
            last_commit: Instant::now(),
        }
    }

    pub fn counter(&self) -> &Arc<SinkCounter> {
        &self.counter
    }

    /// Run one iteration. Failures are logged and reported as
    /// [`Status::Backoff`]; the transaction is rolled back before returning.
    pub async fn run_once(&mut self) -> Status {
        let channel = self.channel.clone();
        let mut txn = TxnGuard(channel.transaction());

        match self.drain(&mut txn).await {
            Ok(status) => status,
            Err(e) => {
                if txn.state() == TransactionState::Open {
                    if let Err(rb) = txn.rollback() {
                        tracing::error!(sink = %self.name, error = ?rb, "rollback failed");
                    }
                }
                tracing::error!(
                    sink = %self.name,
                    channel = %channel.name(),
                    error = ?e,
                    "batch failed, transaction rolled back"
                );
                Status::Backoff
            }
        }
    }

    async fn drain(&mut self, txn: &mut TxnGuard<'_>) -> Result<Status, BridgeError> {
        txn.begin()?;
        let batch = self.fill_batch(txn).await?;

        if batch.is_empty() {
            self.counter.inc_batch_empty();
            txn.commit()?;
            self.last_commit = Instant::now();
            return Ok(Status::Backoff);
        }

        if batch.len() < self.batch_size {
            self.counter.inc_batch_underflow();
        } else {
            self.counter.inc_batch_complete();
        }
        let size = batch.len() as u64;
        self.counter.add_drain_attempt(size);

        let buffers = batch
            .iter()
            .map(|event| self.serializer.serialize(event))
            .collect::<Result<Vec<_>, _>>()?;
        let clients = self.broadcaster.broadcast(&buffers).await?;

        txn.commit()?;
        self.last_commit = Instant::now();
        self.counter.add_drain_success(size);
        tracing::debug!(sink = %self.name, events = size, clients, "batch committed");
        Ok(Status::Ready)
    }

    /// Take until the batch is full, the time budget is spent, or the
    /// channel reports nothing available.
    async fn fill_batch(&self, txn: &mut TxnGuard<'_>) -> Result<Vec<Event>, BridgeError> {
        let mut batch = Vec::with_capacity(self.batch_size.min(1024));
        while batch.len() < self.batch_size {
            let elapsed = self.last_commit.elapsed();
            if elapsed >= self.transaction_time {
                break;
            }
            match txn.take(self.transaction_time - elapsed).await? {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use bridge_channel::{MemoryChannel, MemoryChannelConfig};

    use super::*;

    // ── test doubles ──

    /// Serializes the body as-is; fails on a body of `bad`.
    struct BodySerializer;

    impl EventSerializer for BodySerializer {
        fn serialize(&self, event: &Event) -> Result<Vec<u8>, BridgeError> {
            if event.body() == b"bad" {
                return Err(BridgeError::format_err("cannot serialize 'bad'"));
            }
            Ok(event.body().to_vec())
        }
    }

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<Vec<u8>>>>,
        fail: AtomicBool,
    }

    impl Recorder {
        fn batches(&self) -> Vec<Vec<Vec<u8>>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl BatchBroadcaster for Recorder {
        fn broadcast<'a>(
            &'a self,
            buffers: &'a [Vec<u8>],
        ) -> Pin<Box<dyn Future<Output = Result<usize, BridgeError>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(BridgeError::io("server stopped"));
                }
                self.batches.lock().unwrap().push(buffers.to_vec());
                Ok(1)
            })
        }
    }

    struct Fixture {
        channel: Arc<MemoryChannel>,
        recorder: Arc<Recorder>,
        counter: Arc<SinkCounter>,
        drain: BatchDrainLoop,
    }

    fn fixture(batch_size: usize, transaction_time_ms: u64) -> Fixture {
        let channel = Arc::new(MemoryChannel::new(
            "mem",
            &MemoryChannelConfig { capacity: 100, keep_alive_ms: 3_000 },
        ));
        let recorder = Arc::new(Recorder::default());
        let counter = Arc::new(SinkCounter::new("test"));
        let drain = BatchDrainLoop::new(
            "test",
            channel.clone(),
            Arc::new(BodySerializer),
            recorder.clone(),
            counter.clone(),
            batch_size,
            Duration::from_millis(transaction_time_ms),
        );
        Fixture { channel, recorder, counter, drain }
    }

    fn put(channel: &MemoryChannel, bodies: &[&str]) {
        for b in bodies {
            channel.put(Event::with_body(b.as_bytes().to_vec())).unwrap();
        }
    }

    fn bodies(batch: &[Vec<u8>]) -> Vec<String> {
        batch.iter().map(|b| String::from_utf8(b.clone()).unwrap()).collect()
    }

    // ── scenarios ──

    #[tokio::test(start_paused = true)]
    async fn full_batch_is_broadcast_in_take_order() {
        let mut f = fixture(3, 1_000);
        put(&f.channel, &["a", "b", "c", "d"]);

        assert_eq!(f.drain.run_once().await, Status::Ready);

        let batches = f.recorder.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(bodies(&batches[0]), ["a", "b", "c"]);
        assert_eq!(f.counter.batch_complete(), 1);
        assert_eq!(f.counter.drain_attempt(), 3);
        assert_eq!(f.counter.drain_success(), 3);
        assert_eq!(f.channel.len(), 1);
        assert_eq!(f.channel.in_flight(), 0);
        assert_eq!(f.channel.open_transactions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_batch_after_budget_is_underflow() {
        let mut f = fixture(3, 1_000);
        put(&f.channel, &["A", "B"]);

        let started = Instant::now();
        assert_eq!(f.drain.run_once().await, Status::Ready);

        // third take waited out the rest of the budget
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert_eq!(bodies(&f.recorder.batches()[0]), ["A", "B"]);
        assert_eq!(f.counter.batch_underflow(), 1);
        assert_eq!(f.counter.batch_complete(), 0);
        assert_eq!(f.counter.drain_success(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_commits_and_backs_off() {
        let mut f = fixture(3, 1_000);

        assert_eq!(f.drain.run_once().await, Status::Backoff);
        assert_eq!(f.counter.batch_empty(), 1);
        assert_eq!(f.counter.drain_attempt(), 0);
        assert!(f.recorder.batches().is_empty());
        assert_eq!(f.channel.open_transactions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_failure_rolls_back_whole_batch() {
        let mut f = fixture(3, 1_000);
        put(&f.channel, &["a", "b", "c"]);
        f.recorder.fail.store(true, Ordering::SeqCst);

        assert_eq!(f.drain.run_once().await, Status::Backoff);
        assert_eq!(f.counter.drain_attempt(), 3);
        assert_eq!(f.counter.drain_success(), 0);
        assert_eq!(f.channel.len(), 3);
        assert_eq!(f.channel.in_flight(), 0);
        assert_eq!(f.channel.open_transactions(), 0);

        // redelivered in the same order once the server is back
        f.recorder.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(f.drain.run_once().await, Status::Backoff); // budget already spent
        assert_eq!(f.drain.run_once().await, Status::Ready);
        assert_eq!(bodies(&f.recorder.batches()[0]), ["a", "b", "c"]);
        assert_eq!(f.counter.drain_success(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn serialization_failure_skips_broadcast() {
        let mut f = fixture(3, 1_000);
        put(&f.channel, &["ok", "bad", "ok"]);

        assert_eq!(f.drain.run_once().await, Status::Backoff);
        assert!(f.recorder.batches().is_empty());
        assert_eq!(f.counter.drain_success(), 0);
        assert_eq!(f.channel.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_counts_from_last_commit() {
        let mut f = fixture(10, 1_000);
        put(&f.channel, &["a"]);
        assert_eq!(f.drain.run_once().await, Status::Ready);

        // idle longer than the budget without any iteration
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        put(&f.channel, &["b", "c"]);

        let started = Instant::now();
        assert_eq!(f.drain.run_once().await, Status::Backoff);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(f.counter.batch_empty(), 1);
        assert_eq!(f.channel.len(), 2);

        // empty commit restarted the budget
        assert_eq!(f.drain.run_once().await, Status::Ready);
        assert_eq!(bodies(&f.recorder.batches()[1]), ["b", "c"]);
    }

    // ── channel failures ──

    struct BrokenChannel {
        fail_begin: bool,
        closed: Arc<AtomicBool>,
        rolled_back: Arc<AtomicBool>,
    }

    struct BrokenTxn {
        fail_begin: bool,
        state: TransactionState,
        closed: Arc<AtomicBool>,
        rolled_back: Arc<AtomicBool>,
    }

    impl Channel for BrokenChannel {
        fn name(&self) -> &str {
            "broken"
        }

        fn transaction(&self) -> Box<dyn Transaction + '_> {
            Box::new(BrokenTxn {
                fail_begin: self.fail_begin,
                state: TransactionState::NotStarted,
                closed: self.closed.clone(),
                rolled_back: self.rolled_back.clone(),
            })
        }
    }

    impl Transaction for BrokenTxn {
        fn begin(&mut self) -> Result<(), BridgeError> {
            if self.fail_begin {
                return Err(BridgeError::io("channel unavailable"));
            }
            self.state = TransactionState::Open;
            Ok(())
        }

        fn take(
            &mut self,
            _max_wait: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, BridgeError>> + Send + '_>> {
            Box::pin(async { Err(BridgeError::io("take failed")) })
        }

        fn commit(&mut self) -> Result<(), BridgeError> {
            self.state = TransactionState::Committed;
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), BridgeError> {
            self.rolled_back.store(true, Ordering::SeqCst);
            self.state = TransactionState::RolledBack;
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
            self.state = TransactionState::Closed;
        }

        fn state(&self) -> TransactionState {
            self.state
        }
    }

    fn broken(fail_begin: bool) -> (BatchDrainLoop, Arc<AtomicBool>, Arc<AtomicBool>, Arc<SinkCounter>) {
        let closed = Arc::new(AtomicBool::new(false));
        let rolled_back = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(SinkCounter::new("broken"));
        let drain = BatchDrainLoop::new(
            "broken",
            Arc::new(BrokenChannel { fail_begin, closed: closed.clone(), rolled_back: rolled_back.clone() }),
            Arc::new(BodySerializer),
            Arc::new(Recorder::default()),
            counter.clone(),
            4,
            Duration::from_millis(500),
        );
        (drain, closed, rolled_back, counter)
    }

    #[tokio::test]
    async fn take_failure_rolls_back_and_closes() {
        let (mut drain, closed, rolled_back, counter) = broken(false);
        assert_eq!(drain.run_once().await, Status::Backoff);
        assert!(rolled_back.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(counter.drain_attempt(), 0);
    }

    #[tokio::test]
    async fn begin_failure_still_closes() {
        let (mut drain, closed, rolled_back, _) = broken(true);
        assert_eq!(drain.run_once().await, Status::Backoff);
        // never opened, nothing to roll back
        assert!(!rolled_back.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }
}
