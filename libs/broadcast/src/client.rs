use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use bridge_api::{BridgeError, Event, Framing};
use bridge_codec::{FrameReader, Handshake, HeaderBodySerializer, LengthPrefixedFraming};

/// Subscriber side of the wire protocol.
pub struct BroadcastClient {
    reader: FrameReader<OwnedReadHalf>,
    // kept so the socket stays open in both directions
    _writer: OwnedWriteHalf,
    serializer: HeaderBodySerializer,
}

impl BroadcastClient {
    /// Connect and authenticate as `identity`.
    ///
    /// A `DENIED` reply is returned as a `Config` error carrying the
    /// server's reason.
    pub async fn connect(addr: impl ToSocketAddrs, identity: &str) -> Result<Self, BridgeError> {
        Self::connect_with(addr, identity, LengthPrefixedFraming::default()).await
    }

    pub async fn connect_with(
        addr: impl ToSocketAddrs,
        identity: &str,
        framing: LengthPrefixedFraming,
    ) -> Result<Self, BridgeError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();

        let mut auth = Vec::new();
        framing.encode(&Handshake::Auth(identity.to_string()).encode(), &mut auth)?;
        writer.write_all(&auth).await?;

        let mut reader = FrameReader::new(read_half, framing);
        let reply = reader
            .next_frame()
            .await?
            .ok_or_else(|| BridgeError::io("server closed connection during handshake"))?;

        match Handshake::parse(&reply)? {
            Handshake::Ok => Ok(Self { reader, _writer: writer, serializer: HeaderBodySerializer::new() }),
            Handshake::Denied(reason) => Err(BridgeError::config(format!("denied: {reason}"))),
            Handshake::Auth(_) => Err(BridgeError::format_err("server sent AUTH")),
        }
    }

    /// Next raw frame; `None` once the server closes the connection.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        self.reader.next_frame().await
    }

    /// Next frame decoded as an event.
    pub async fn next_event(&mut self) -> Result<Option<Event>, BridgeError> {
        match self.reader.next_frame().await? {
            Some(frame) => self.serializer.deserialize(&frame).map(Some),
            None => Ok(None),
        }
    }
}
