use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use bridge_api::OverflowPolicy;

// ═══════════════════════════════════════════════════════════════
//  ClientHandle
// ═══════════════════════════════════════════════════════════════

/// Server-side view of one authenticated connection.
#[derive(Clone)]
pub(crate) struct ClientHandle {
    pub identity: String,
    pub peer: SocketAddr,
    pub tx: mpsc::Sender<Bytes>,
    /// Отмена останавливает writer task и закрывает сокет.
    pub kick: CancellationToken,
}

enum Outcome {
    Queued,
    Full,
    Gone(&'static str),
}

// ═══════════════════════════════════════════════════════════════
//  ClientRegistry
// ═══════════════════════════════════════════════════════════════

/// Живое множество аутентифицированных клиентов, ключ: connection id.
#[derive(Default)]
pub(crate) struct ClientRegistry {
    clients: RwLock<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn add(&self, id: u64, handle: ClientHandle) {
        self.clients.write().await.insert(id, handle);
    }

    pub async fn remove(&self, id: u64) -> Option<ClientHandle> {
        self.clients.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Kick everyone (server shutdown).
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        for (_, client) in clients.drain() {
            client.kick.cancel();
        }
    }

    /// Queue `frame` for every client. Returns how many clients accepted it.
    ///
    /// Работает по снимку: lock не удерживается во время ожидания
    /// `send_timeout`, так что новые клиенты и отключения не блокируются.
    pub async fn fan_out(
        &self,
        frame: Bytes,
        overflow: OverflowPolicy,
        write_timeout: Duration,
    ) -> usize {
        let snapshot: Vec<(u64, ClientHandle)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect();

        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (id, client) in snapshot {
            let outcome = match overflow {
                OverflowPolicy::Drop | OverflowPolicy::Disconnect => {
                    match client.tx.try_send(frame.clone()) {
                        Ok(()) => Outcome::Queued,
                        Err(mpsc::error::TrySendError::Full(_)) => Outcome::Full,
                        Err(mpsc::error::TrySendError::Closed(_)) => Outcome::Gone("closed"),
                    }
                }
                OverflowPolicy::BackPressure => {
                    match client.tx.send_timeout(frame.clone(), write_timeout).await {
                        Ok(()) => Outcome::Queued,
                        Err(mpsc::error::SendTimeoutError::Timeout(_)) => Outcome::Gone("write timeout"),
                        Err(mpsc::error::SendTimeoutError::Closed(_)) => Outcome::Gone("closed"),
                    }
                }
            };

            match (outcome, overflow) {
                (Outcome::Queued, _) => delivered += 1,
                (Outcome::Full, OverflowPolicy::Drop) => {
                    tracing::warn!(
                        client = id,
                        identity = %client.identity,
                        peer = %client.peer,
                        "client queue full, batch dropped for this client"
                    );
                }
                (Outcome::Full, _) => {
                    tracing::warn!(client = id, identity = %client.identity, peer = %client.peer, "client queue full, evicting");
                    evicted.push(id);
                }
                (Outcome::Gone(reason), _) => {
                    tracing::warn!(
                        client = id,
                        identity = %client.identity,
                        peer = %client.peer,
                        reason,
                        "evicting client"
                    );
                    evicted.push(id);
                }
            }
        }

        if !evicted.is_empty() {
            let mut clients = self.clients.write().await;
            for id in evicted {
                if let Some(client) = clients.remove(&id) {
                    client.kick.cancel();
                }
            }
        }
        delivered
    }
}

// ═══════════════════════════════════════════════════════════════
//  ConnectionStats
// ═══════════════════════════════════════════════════════════════

/// Monotonic connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConnectionSnapshot {
    /// TCP connections accepted by the listener.
    pub accepted: u64,
    /// Connections that failed or were denied the handshake.
    pub rejected: u64,
    /// Authenticated connections that have since closed.
    pub closed: u64,
}

impl ConnectionStats {
    pub(crate) fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}
