use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use bridge_api::{BatchBroadcaster, Channel, EventSerializer};
use broadcast_server::{BroadcastServer, ConnectionSnapshot};

use crate::{BatchDrainLoop, CounterSnapshot, SinkConfig, SinkCounter, SinkError, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkState::Stopped => f.write_str("stopped"),
            SinkState::Starting => f.write_str("starting"),
            SinkState::Started => f.write_str("started"),
            SinkState::Stopping => f.write_str("stopping"),
        }
    }
}

struct Running {
    server: Arc<BroadcastServer>,
    drain: BatchDrainLoop,
}

struct Inner {
    state: SinkState,
    running: Option<Running>,
}

// ═══════════════════════════════════════════════════════════════
//  BroadcastSink
// ═══════════════════════════════════════════════════════════════

/// Sink lifecycle: owns the broadcast server and the drain loop.
///
/// `start`, `stop` и `process` сериализованы одним async mutex'ом,
/// поэтому итерации drain никогда не пересекаются.
pub struct BroadcastSink {
    config: SinkConfig,
    channel: Arc<dyn Channel>,
    serializer: Arc<dyn EventSerializer>,
    counter: Arc<SinkCounter>,
    inner: Mutex<Inner>,
}

impl BroadcastSink {
    pub fn new(
        config: SinkConfig,
        channel: Arc<dyn Channel>,
        serializer: Arc<dyn EventSerializer>,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        Ok(Self {
            counter: Arc::new(SinkCounter::new(config.name.clone())),
            config,
            channel,
            serializer,
            inner: Mutex::new(Inner { state: SinkState::Stopped, running: None }),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Apply key/value options. Only allowed while stopped.
    pub fn configure(&mut self, options: &HashMap<String, String>) -> Result<(), SinkError> {
        let state = self.inner.get_mut().state;
        if state != SinkState::Stopped {
            return Err(SinkError::InvalidState { name: self.config.name.clone(), op: "configure", state });
        }
        let mut config = self.config.clone();
        config.configure(options)?;
        if config.name != self.config.name {
            self.counter = Arc::new(SinkCounter::new(config.name.clone()));
        }
        self.config = config;
        Ok(())
    }

    /// Bind the broadcast server and arm the drain loop.
    ///
    /// On bind failure the sink stays `stopped`.
    pub async fn start(&self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        if inner.state != SinkState::Stopped {
            return Err(SinkError::InvalidState {
                name: self.config.name.clone(),
                op: "start",
                state: inner.state,
            });
        }
        inner.state = SinkState::Starting;
        tracing::info!(sink = %self.config.name, addr = %self.config.broadcast_config().addr(), "starting");

        let server = match BroadcastServer::start(self.config.broadcast_config()).await {
            Ok(server) => Arc::new(server),
            Err(e) => {
                inner.state = SinkState::Stopped;
                tracing::error!(sink = %self.config.name, error = %e, "broadcast server failed to start");
                return Err(SinkError::Start(e));
            }
        };

        self.counter.start();
        let drain = BatchDrainLoop::new(
            self.config.name.clone(),
            self.channel.clone(),
            self.serializer.clone(),
            server.clone() as Arc<dyn BatchBroadcaster>,
            self.counter.clone(),
            self.config.batch_size,
            self.config.transaction_time(),
        );
        inner.running = Some(Running { server, drain });
        inner.state = SinkState::Started;
        tracing::info!(
            sink = %self.config.name,
            channel = %self.channel.name(),
            batch_size = self.config.batch_size,
            transaction_time_ms = self.config.transaction_time_ms,
            "started"
        );
        Ok(())
    }

    /// Shut the server down and freeze the counters. No-op when stopped.
    pub async fn stop(&self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SinkState::Stopped => return Ok(()),
            SinkState::Started => {}
            state => {
                return Err(SinkError::InvalidState { name: self.config.name.clone(), op: "stop", state });
            }
        }
        self.teardown(&mut inner).await;
        Ok(())
    }

    /// One drain iteration. Fails fast unless the sink is started.
    ///
    /// A dead broadcast server stops the sink: the error ends the caller's
    /// loop instead of rolling batches back forever.
    pub async fn process(&self) -> Result<Status, SinkError> {
        let mut inner = self.inner.lock().await;
        let state = inner.state;
        let Some(running) = inner.running.as_mut().filter(|_| state == SinkState::Started) else {
            return Err(SinkError::NotStarted { name: self.config.name.clone(), state });
        };
        if running.server.is_running() {
            return Ok(running.drain.run_once().await);
        }

        let addr = running.server.local_addr();
        tracing::error!(sink = %self.config.name, addr = %addr, "broadcast server died, forcing stop");
        self.teardown(&mut inner).await;
        Err(SinkError::ServerFailed { name: self.config.name.clone(), addr })
    }

    async fn teardown(&self, inner: &mut Inner) {
        inner.state = SinkState::Stopping;

        if let Some(running) = inner.running.take() {
            let connections = running.server.stats();
            running.server.shutdown().await;
            tracing::info!(
                sink = %self.config.name,
                accepted = connections.accepted,
                rejected = connections.rejected,
                closed = connections.closed,
                "broadcast server closed"
            );
        }
        self.counter.stop();
        inner.state = SinkState::Stopped;

        let snapshot = self.counter.snapshot();
        tracing::info!(sink = %self.config.name, counters = ?snapshot, "stopped");
    }

    pub async fn state(&self) -> SinkState {
        self.inner.lock().await.state
    }

    pub fn counter(&self) -> &Arc<SinkCounter> {
        &self.counter
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.counter.snapshot()
    }

    /// Bound address while started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let inner = self.inner.lock().await;
        inner.running.as_ref().map(|r| r.server.local_addr())
    }

    pub async fn client_count(&self) -> usize {
        let server = self.inner.lock().await.running.as_ref().map(|r| r.server.clone());
        match server {
            Some(server) => server.client_count().await,
            None => 0,
        }
    }

    pub async fn connection_stats(&self) -> Option<ConnectionSnapshot> {
        let inner = self.inner.lock().await;
        inner.running.as_ref().map(|r| r.server.stats())
    }
}
