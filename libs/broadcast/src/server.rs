use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bridge_api::{BatchBroadcaster, BridgeError, Framing};
use bridge_codec::LengthPrefixedFraming;

use crate::config::BroadcastConfig;
use crate::connection::serve_client;
use crate::registry::{ClientRegistry, ConnectionSnapshot, ConnectionStats};

/// Consecutive accept errors after which the listener is considered dead.
const MAX_ACCEPT_FAILURES: u32 = 16;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared by the accept loop, connection tasks and `broadcast`.
pub(crate) struct Shared {
    pub config: BroadcastConfig,
    pub framing: LengthPrefixedFraming,
    pub registry: ClientRegistry,
    pub stats: ConnectionStats,
}

// ═══════════════════════════════════════════════════════════════
//  BroadcastServer
// ═══════════════════════════════════════════════════════════════

pub struct BroadcastServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl BroadcastServer {
    /// Bind the listener and spawn the accept loop.
    ///
    /// Ошибка bind возвращается сразу: сервер без listener'а не создаётся.
    pub async fn start(config: BroadcastConfig) -> Result<Self, BridgeError> {
        if config.users.is_empty() {
            return Err(BridgeError::config("broadcast server needs at least one authorized user"));
        }

        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::io(format!("bind {addr}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            framing: LengthPrefixedFraming::new(config.max_frame),
            config,
            registry: ClientRegistry::default(),
            stats: ConnectionStats::default(),
        });
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(accept_loop(listener, shared.clone(), token.clone(), tracker.clone()));
        tracing::info!(
            addr = %local_addr,
            users = shared.config.users.len(),
            overflow = %shared.config.overflow,
            "broadcast server listening"
        );

        Ok(Self { local_addr, shared, token, tracker })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `false` after `shutdown()` or after the listener died.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub async fn client_count(&self) -> usize {
        self.shared.registry.len().await
    }

    pub fn stats(&self) -> ConnectionSnapshot {
        self.shared.stats.snapshot()
    }

    /// Send `buffers` to every authenticated client, one frame per buffer.
    /// Returns the number of clients the batch was queued for.
    pub async fn broadcast_frames(&self, buffers: &[Vec<u8>]) -> Result<usize, BridgeError> {
        if self.token.is_cancelled() {
            return Err(BridgeError::io(format!("broadcast server {} is stopped", self.local_addr)));
        }
        if buffers.is_empty() {
            return Ok(self.client_count().await);
        }

        // Один Bytes на весь batch: все клиенты делят один буфер.
        let mut wire = Vec::with_capacity(buffers.iter().map(|b| b.len() + 4).sum());
        for buf in buffers {
            self.shared.framing.encode(buf, &mut wire)?;
        }

        let config = &self.shared.config;
        let delivered = self
            .shared
            .registry
            .fan_out(Bytes::from(wire), config.overflow, config.write_timeout)
            .await;
        tracing::debug!(frames = buffers.len(), clients = delivered, "batch broadcast");
        Ok(delivered)
    }

    /// Close the listener and every client connection.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.shared.registry.close_all().await;
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait()).await.is_err() {
            tracing::warn!(addr = %self.local_addr, "connection tasks still running after shutdown grace period");
        }
        tracing::info!(addr = %self.local_addr, "broadcast server stopped");
    }
}

impl BatchBroadcaster for BroadcastServer {
    fn broadcast<'a>(
        &'a self,
        buffers: &'a [Vec<u8>],
    ) -> Pin<Box<dyn Future<Output = Result<usize, BridgeError>> + Send + 'a>> {
        Box::pin(self.broadcast_frames(buffers))
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Accept loop
// ═══════════════════════════════════════════════════════════════

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    failures = 0;
                    shared.stats.inc_accepted();
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
                    }
                    tracker.spawn(serve_client(stream, peer, shared.clone(), token.child_token()));
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "accept error");
                    if failures >= MAX_ACCEPT_FAILURES {
                        // Listener мёртв: broadcast начнёт возвращать ошибку,
                        // batch'и будут откатываться до перезапуска sink'а.
                        tracing::error!("listener failed repeatedly, stopping broadcast server");
                        token.cancel();
                        shared.registry.close_all().await;
                        break;
                    }
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
        }
    }
    tracing::debug!("accept loop finished");
}
