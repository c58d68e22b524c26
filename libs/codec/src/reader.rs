use tokio::io::{AsyncRead, AsyncReadExt};

use bridge_api::{BridgeError, Framing};

use crate::LengthPrefixedFraming;

/// Buffered frame reader over any async byte stream.
///
/// `next_frame` is cancel-safe: partially received bytes stay in the
/// internal buffer until the rest of the frame arrives.
pub struct FrameReader<R> {
    inner: R,
    framing: LengthPrefixedFraming,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, framing: LengthPrefixedFraming) -> Self {
        Self { inner, framing, buf: Vec::with_capacity(8192) }
    }

    /// Next complete frame. `Ok(None)` = clean EOF on a frame boundary.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        let mut tmp = [0u8; 4096];
        loop {
            if let Some((frame, consumed)) = self.framing.decode(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(BridgeError::io(format!(
                    "connection closed mid-frame ({} bytes buffered)",
                    self.buf.len()
                )));
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_frames_across_chunk_boundaries() {
        let framing = LengthPrefixedFraming::default();
        let mut wire = Vec::new();
        framing.encode(b"alpha", &mut wire).unwrap();
        framing.encode(b"beta", &mut wire).unwrap();

        let (mut tx, rx) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(&wire).await.unwrap();
        });

        let mut reader = FrameReader::new(rx, framing);
        assert_eq!(reader.next_frame().await.unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(reader.next_frame().await.unwrap(), Some(b"beta".to_vec()));
        writer.await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let wire = [0u8, 0, 0, 10, b'a', b'b'];
        let mut reader = FrameReader::new(&wire[..], LengthPrefixedFraming::default());
        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), bridge_api::ErrorKind::Io);
    }
}
