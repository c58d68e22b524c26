use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// What to do when a client's bounded outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(); on a full queue skip this batch for the client, log it.
    Drop,
    /// try_send(); on a full queue evict the client and close its socket.
    #[default]
    Disconnect,
    /// send_timeout(): wait for room up to the write timeout, then evict.
    #[serde(alias = "backpressure")]
    BackPressure,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Drop => f.write_str("drop"),
            OverflowPolicy::Disconnect => f.write_str("disconnect"),
            OverflowPolicy::BackPressure => f.write_str("back_pressure"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = crate::BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(OverflowPolicy::Drop),
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            "back_pressure" | "backpressure" => Ok(OverflowPolicy::BackPressure),
            other => Err(crate::BridgeError::config(format!(
                "unknown overflow policy '{other}' (expected drop, disconnect or back_pressure)"
            ))),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Event
// ════════════════════════════════════════════════════════════════

/// Unit of data carried by the channel: string headers plus an opaque body.
///
/// Headers are kept in a `BTreeMap` so every consumer sees them in the same
/// (key-sorted) order, which keeps serialization deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Event {
    pub fn new(headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Event with no headers.
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self { headers: BTreeMap::new(), body: body.into() }
    }

    /// Builder-style header insertion.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
