use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bridge_channel::MemoryChannel;
use bridge_codec::HeaderBodySerializer;
use bridge_sink::{BroadcastSink, Status};

use crate::config::{RunnerConfig, ServeArgs, ServerConfig};
use crate::error::ServerError;
use crate::ingest;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("bridge-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Channel + ingest ---
    let channel = Arc::new(MemoryChannel::new("memory", &config.channel));
    let ingest = match &config.ingest {
        Some(ingest_cfg) => Some(ingest::spawn(ingest_cfg, channel.clone(), token.clone()).await?),
        None => {
            tracing::info!("no [ingest] configured, channel is fed externally");
            None
        }
    };

    // --- Sink ---
    let sink = BroadcastSink::new(config.sink.clone(), channel.clone(), Arc::new(HeaderBodySerializer::new()))?;
    sink.start().await?;
    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutting down..."),
            Err(e) => tracing::error!(error = %e, "ctrl-c handler failed, shutting down"),
        }
        signal_token.cancel();
    });

    let result = drive(&sink, &config.runner, &token).await;

    // Останавливаем всё, даже если runner завершился ошибкой.
    token.cancel();
    sink.stop().await?;
    if let Some(ingest) = ingest {
        if tokio::time::timeout(Duration::from_secs(5), ingest.handle).await.is_err() {
            tracing::warn!("ingest did not stop within 5s");
        }
    }

    tracing::info!(undelivered = channel.len(), "shutdown complete");
    result
}

/// Call `process()` until cancelled, pacing Backoff results.
///
/// Итерация не прерывается посередине: отмена проверяется между вызовами,
/// так что транзакция всегда завершается commit'ом или rollback'ом.
pub async fn drive(
    sink: &BroadcastSink,
    runner: &RunnerConfig,
    token: &CancellationToken,
) -> Result<(), ServerError> {
    let mut consecutive = 0u32;
    let mut last_report = Instant::now();

    while !token.is_cancelled() {
        match sink.process().await? {
            Status::Ready => consecutive = 0,
            Status::Backoff => {
                consecutive = consecutive.saturating_add(1);
                let delay = runner.backoff_delay(consecutive);
                tracing::trace!(sink = %sink.name(), consecutive, delay_ms = delay.as_millis() as u64, "backoff");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if let Some(every) = runner.report_interval() {
            if last_report.elapsed() >= every {
                last_report = Instant::now();
                report(sink).await;
            }
        }
    }
    Ok(())
}

async fn report(sink: &BroadcastSink) {
    let connections = sink.connection_stats().await.unwrap_or_default();
    let clients = sink.client_count().await;
    match serde_json::to_string(&sink.snapshot()) {
        Ok(json) => tracing::info!(
            sink = %sink.name(),
            counters = %json,
            clients,
            accepted = connections.accepted,
            rejected = connections.rejected,
            closed = connections.closed,
            "sink counters"
        ),
        Err(e) => tracing::warn!(sink = %sink.name(), error = %e, "cannot serialize counters"),
    }
}
