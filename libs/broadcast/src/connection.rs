use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bridge_api::{BridgeError, Framing};
use bridge_codec::{FrameReader, Handshake};

use crate::registry::ClientHandle;
use crate::server::Shared;

/// Полный жизненный цикл одного TCP соединения:
/// handshake → регистрация → writer loop → удаление из реестра.
pub(crate) async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, shared.framing);

    let res = tokio::select! {
        _ = token.cancelled() => return,
        res = handshake(&mut reader, &mut write_half, &shared) => res,
    };
    let identity = match res {
        Ok(identity) => identity,
        Err(e) => {
            shared.stats.inc_rejected();
            tracing::warn!(peer = %peer, error = %e, "handshake failed");
            let _ = write_half.shutdown().await;
            return;
        }
    };

    // Регистрируем до ответа OK: клиент, получивший OK, гарантированно
    // увидит следующий broadcast.
    let id = shared.registry.next_id();
    let (tx, rx) = mpsc::channel::<Bytes>(shared.config.client_buffer.max(1));
    let kick = token.child_token();
    shared
        .registry
        .add(id, ClientHandle { identity: identity.clone(), peer, tx, kick: kick.clone() })
        .await;

    if let Err(e) = send_frame(&mut write_half, &Handshake::Ok.encode(), &shared).await {
        shared.registry.remove(id).await;
        shared.stats.inc_rejected();
        tracing::warn!(peer = %peer, error = %e, "failed to confirm handshake");
        return;
    }
    tracing::info!(client = id, identity = %identity, peer = %peer, "client connected");

    let reason = write_loop(reader.into_inner(), &mut write_half, rx, &kick, &shared).await;

    shared.stats.inc_closed();
    shared.registry.remove(id).await;
    let _ = write_half.shutdown().await;
    tracing::info!(client = id, identity = %identity, peer = %peer, reason, "client disconnected");
}

/// Read `AUTH <identity>` and check it. A denied peer gets `DENIED <reason>`
/// here; the `OK` reply is sent by the caller once the client is registered.
async fn handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut W,
    shared: &Shared,
) -> Result<String, BridgeError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame = tokio::time::timeout(shared.config.handshake_timeout, reader.next_frame())
        .await
        .map_err(|_| BridgeError::io("handshake timed out"))??
        .ok_or_else(|| BridgeError::io("connection closed before handshake"))?;

    let denial = match Handshake::parse(&frame) {
        Ok(Handshake::Auth(identity)) if shared.config.users.contains(&identity) => {
            return Ok(identity);
        }
        Ok(Handshake::Auth(identity)) => format!("unknown identity '{identity}'"),
        Ok(_) => "expected AUTH".to_string(),
        Err(e) => e.to_string(),
    };

    // best effort: the peer may already be gone
    let _ = send_frame(writer, &Handshake::Denied(denial.clone()).encode(), shared).await;
    Err(BridgeError::config(format!("denied: {denial}")))
}

async fn send_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    shared: &Shared,
) -> Result<(), BridgeError> {
    let mut buf = Vec::with_capacity(payload.len() + 4);
    shared.framing.encode(payload, &mut buf)?;
    tokio::time::timeout(shared.config.write_timeout, writer.write_all(&buf))
        .await
        .map_err(|_| BridgeError::io("write timed out"))??;
    Ok(())
}

/// Drain the client queue into the socket until something ends the
/// connection. Returns the reason for the log line.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut read_half: OwnedReadHalf,
    writer: &mut W,
    mut rx: mpsc::Receiver<Bytes>,
    kick: &CancellationToken,
    shared: &Shared,
) -> &'static str {
    // Клиент ничего не шлёт после handshake; чтение нужно только
    // чтобы заметить закрытие соединения без ожидания следующей записи.
    let mut probe = [0u8; 512];
    loop {
        tokio::select! {
            biased;

            _ = kick.cancelled() => return "evicted",

            frame = rx.recv() => {
                let Some(frame) = frame else { return "queue closed" };
                match tokio::time::timeout(shared.config.write_timeout, writer.write_all(&frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "client write error");
                        return "write error";
                    }
                    Err(_) => return "write timeout",
                }
            }

            n = read_half.read(&mut probe) => match n {
                Ok(0) => return "peer closed",
                Ok(_) => {}
                Err(_) => return "read error",
            },
        }
    }
}
