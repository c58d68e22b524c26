//! Batch-drain sink: pulls events from a transactional [`Channel`]
//! in bounded batches and pushes them to every connected client.
//!
//! [`Channel`]: bridge_api::Channel

mod config;
mod counter;
mod drain;
mod error;
mod lifecycle;

pub use config::SinkConfig;
pub use counter::{CounterSnapshot, SinkCounter};
pub use drain::{BatchDrainLoop, Status};
pub use error::SinkError;
pub use lifecycle::{BroadcastSink, SinkState};
