use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{BridgeError, Event};

// ════════════════════════════════════════════════════════════════
//  Transactional channel contract
// ════════════════════════════════════════════════════════════════

/// Lifecycle of a single transaction handle.
///
/// `NotStarted → Open → (Committed | RolledBack) → Closed`. Closing an
/// `Open` transaction is allowed but implies a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Open,
    Committed,
    RolledBack,
    Closed,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::NotStarted => f.write_str("not-started"),
            TransactionState::Open => f.write_str("open"),
            TransactionState::Committed => f.write_str("committed"),
            TransactionState::RolledBack => f.write_str("rolled-back"),
            TransactionState::Closed => f.write_str("closed"),
        }
    }
}

/// Durable, at-least-once event queue drained by the sink.
///
/// One transaction per drain iteration; a transaction handle must only be
/// used by one task at a time.
pub trait Channel: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    /// New transaction handle in `NotStarted` state.
    fn transaction(&self) -> Box<dyn Transaction + '_>;
}

/// Handle bound to a [`Channel`]. Events taken inside a transaction become
/// permanent on `commit` and go back to the queue on `rollback`.
pub trait Transaction: Send {
    fn begin(&mut self) -> Result<(), BridgeError>;

    /// Take the next event, waiting at most `max_wait`.
    /// `Ok(None)` = nothing available right now.
    fn take(
        &mut self,
        max_wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, BridgeError>> + Send + '_>>;

    fn commit(&mut self) -> Result<(), BridgeError>;

    fn rollback(&mut self) -> Result<(), BridgeError>;

    /// Release the handle. Always safe after commit or rollback.
    fn close(&mut self);

    fn state(&self) -> TransactionState;
}
