use std::collections::BTreeSet;
use std::time::Duration;

use bridge_api::OverflowPolicy;
use bridge_codec::DEFAULT_MAX_FRAME;

/// Runtime settings of a [`BroadcastServer`](crate::BroadcastServer).
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub host: String,
    /// `0` binds an ephemeral port (see `BroadcastServer::local_addr`).
    pub port: u16,
    /// Identities allowed past the handshake.
    pub users: BTreeSet<String>,
    /// Frames queued per client before the overflow policy kicks in.
    pub client_buffer: usize,
    pub overflow: OverflowPolicy,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_frame: usize,
}

impl BroadcastConfig {
    pub fn new(host: impl Into<String>, port: u16, users: BTreeSet<String>) -> Self {
        Self {
            host: host.into(),
            port,
            users,
            client_buffer: 64,
            overflow: OverflowPolicy::default(),
            write_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
