use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bridge_api::{Channel, Event, now_ms};
use bridge_channel::MemoryChannel;

use crate::config::IngestConfig;
use crate::error::ServerError;

/// Bound ingest listener.
pub struct Ingest {
    pub local_addr: SocketAddr,
    pub handle: JoinHandle<()>,
}

/// Line ingest: каждая строка из TCP соединения становится событием
/// с заголовками `peer` и `timestamp`.
pub async fn spawn(
    config: &IngestConfig,
    channel: Arc<MemoryChannel>,
    token: CancellationToken,
) -> Result<Ingest, ServerError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Config { context: "ingest bind", detail: format!("{addr}: {e}") })?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, channel = %channel.name(), "ingest listening");

    let max_line = config.max_line.max(1);
    let handle = tokio::spawn(accept_loop(listener, channel, token, max_line));
    Ok(Ingest { local_addr, handle })
}

async fn accept_loop(
    listener: TcpListener,
    channel: Arc<MemoryChannel>,
    token: CancellationToken,
    max_line: usize,
) {
    let tracker = TaskTracker::new();
    loop {
        let res = tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => res,
        };
        match res {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "ingest client connected");
                tracker.spawn(read_lines(stream, peer, channel.clone(), token.clone(), max_line));
            }
            Err(e) => {
                tracing::warn!(error = %e, "ingest accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    tracker.close();
    tracker.wait().await;
    tracing::info!("ingest stopped");
}

async fn read_lines(
    stream: TcpStream,
    peer: SocketAddr,
    channel: Arc<MemoryChannel>,
    token: CancellationToken,
    max_line: usize,
) {
    let peer_str = peer.to_string();
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let (mut accepted, mut dropped) = (0u64, 0u64);

    loop {
        buf.clear();
        // +1: a line longer than max_line shows up without its terminator
        let mut limited = (&mut reader).take(max_line as u64 + 1);
        let res = tokio::select! {
            _ = token.cancelled() => break,
            res = limited.read_until(b'\n', &mut buf) => res,
        };
        match res {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "ingest read error");
                break;
            }
        }

        let Some(line) = trim_line(&buf, max_line) else {
            tracing::warn!(peer = %peer, max_line, "line too long, closing ingest connection");
            break;
        };
        if line.is_empty() {
            continue;
        }

        let event = Event::with_body(line.to_vec())
            .header("peer", peer_str.as_str())
            .header("timestamp", now_ms().to_string());
        match channel.put(event) {
            Ok(()) => accepted += 1,
            Err(e) => {
                dropped += 1;
                tracing::warn!(peer = %peer, error = %e, "channel rejected line, dropped");
            }
        }
    }
    tracing::info!(peer = %peer, accepted, dropped, "ingest client disconnected");
}

/// Strip the line terminator. `None` when the line exceeds `max_line`.
fn trim_line(buf: &[u8], max_line: usize) -> Option<&[u8]> {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    (line.len() <= max_line).then_some(line)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use bridge_channel::MemoryChannelConfig;

    use super::*;

    #[test]
    fn terminators_are_stripped() {
        assert_eq!(trim_line(b"abc\r\n", 8), Some(&b"abc"[..]));
        assert_eq!(trim_line(b"abc\n", 8), Some(&b"abc"[..]));
        assert_eq!(trim_line(b"abc", 8), Some(&b"abc"[..]));
        assert_eq!(trim_line(b"abcdefghi", 8), None);
    }

    #[tokio::test]
    async fn lines_become_events() {
        let channel = Arc::new(MemoryChannel::new("mem", &MemoryChannelConfig::default()));
        let token = CancellationToken::new();
        let config = IngestConfig { host: "127.0.0.1".into(), port: 0, max_line: 64 };
        let ingest = spawn(&config, channel.clone(), token.clone()).await.unwrap();

        let mut client = TcpStream::connect(ingest.local_addr).await.unwrap();
        client.write_all(b"first\r\n\nsecond\nthird").await.unwrap();
        client.shutdown().await.unwrap();

        for _ in 0..200 {
            if channel.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(channel.len(), 3);

        let mut txn = channel.transaction();
        txn.begin().unwrap();
        let mut bodies = Vec::new();
        while let Some(event) = txn.take(Duration::ZERO).await.unwrap() {
            assert!(event.headers().contains_key("peer"));
            assert!(event.headers().contains_key("timestamp"));
            bodies.push(String::from_utf8(event.body().to_vec()).unwrap());
        }
        txn.commit().unwrap();
        drop(txn);
        assert_eq!(bodies, ["first", "second", "third"]);

        token.cancel();
        ingest.handle.await.unwrap();
    }
}
