use std::future::Future;
use std::pin::Pin;

use crate::{BridgeError, Event};

// ════════════════════════════════════════════════════════════════
//  Outbound pipeline traits
// ════════════════════════════════════════════════════════════════

/// Event → self-describing byte buffer.
///
/// Must be deterministic and free of side effects: the drain loop may
/// serialize the same event again after a rollback.
pub trait EventSerializer: Send + Sync {
    fn serialize(&self, event: &Event) -> Result<Vec<u8>, BridgeError>;
}

/// Framing: message boundaries inside a byte stream.
///
/// Implementations are stateless; the caller owns the read buffer, so one
/// framing instance can serve any number of connections.
pub trait Framing: Send + Sync {
    /// Extract one frame from `buf`.
    /// Returns (frame_data, bytes_consumed) or None if the frame is incomplete.
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, BridgeError>;

    /// Append framed `data` to the output buffer.
    fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), BridgeError>;
}

/// Fan-out target for one drained batch.
///
/// Per-subscriber failures are absorbed by the implementation; an `Err`
/// means the batch as a whole could not be handed off and must be rolled
/// back. Returns the number of subscribers the batch was queued for.
pub trait BatchBroadcaster: Send + Sync {
    fn broadcast<'a>(
        &'a self,
        buffers: &'a [Vec<u8>],
    ) -> Pin<Box<dyn Future<Output = Result<usize, BridgeError>> + Send + 'a>>;
}
