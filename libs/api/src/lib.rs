//! Shared contracts of the queue-to-broadcast bridge.
//!
//! The drain loop only talks to the traits defined here: a transactional
//! [`Channel`] it pulls events from, an [`EventSerializer`] turning events
//! into buffers, and a [`BatchBroadcaster`] pushing those buffers out.
//! Concrete implementations live in their own crates.

mod channel;
mod error;
mod pipeline;
mod types;
mod util;

pub use channel::{Channel, Transaction, TransactionState};
pub use error::{BridgeError, ErrorKind};
pub use pipeline::{BatchBroadcaster, EventSerializer, Framing};
pub use types::{Event, OverflowPolicy};
pub use util::{now_ms, parse_identity_list};
