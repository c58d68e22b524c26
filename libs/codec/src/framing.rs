use bridge_api::{BridgeError, Framing};

const LENGTH_BYTES: usize = 4;

/// Default upper bound for a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// `[u32 big-endian length][payload]` framing.
///
/// Every frame is self-delimiting, so any number of serialized events can
/// be concatenated into one socket write.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedFraming {
    max_payload: usize,
}

impl Default for LengthPrefixedFraming {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl LengthPrefixedFraming {
    /// `max_payload = 0` disables the limit.
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    fn check_len(&self, len: usize) -> Result<(), BridgeError> {
        if self.max_payload > 0 && len > self.max_payload {
            return Err(BridgeError::format_err(format!(
                "payload too large: {len} bytes (max {})",
                self.max_payload
            )));
        }
        if len > u32::MAX as usize {
            return Err(BridgeError::format_err(format!("payload too large for 4-byte header: {len}")));
        }
        Ok(())
    }
}

impl Framing for LengthPrefixedFraming {
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, BridgeError> {
        if buf.len() < LENGTH_BYTES {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        self.check_len(len)?;

        let total = LENGTH_BYTES + len;
        if buf.len() < total {
            return Ok(None);
        }

        Ok(Some((buf[LENGTH_BYTES..total].to_vec(), total)))
    }

    fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), BridgeError> {
        self.check_len(data.len())?;
        buf.reserve(LENGTH_BYTES + data.len());
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenated_frames_split_back_apart() {
        let framing = LengthPrefixedFraming::default();
        let mut wire = Vec::new();
        framing.encode(b"first", &mut wire).unwrap();
        framing.encode(b"", &mut wire).unwrap();
        framing.encode(b"third", &mut wire).unwrap();

        let mut frames = Vec::new();
        let mut rest = &wire[..];
        while let Some((frame, used)) = framing.decode(rest).unwrap() {
            frames.push(frame);
            rest = &rest[used..];
        }
        assert!(rest.is_empty());
        assert_eq!(frames, vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let framing = LengthPrefixedFraming::default();
        let mut wire = Vec::new();
        framing.encode(b"payload", &mut wire).unwrap();

        assert_eq!(framing.decode(&wire[..2]).unwrap(), None);
        assert_eq!(framing.decode(&wire[..wire.len() - 1]).unwrap(), None);
    }

    #[test]
    fn oversized_length_is_rejected_before_buffering() {
        let framing = LengthPrefixedFraming::new(8);
        let header = 1024u32.to_be_bytes();
        let err = framing.decode(&header).unwrap_err();
        assert_eq!(err.kind(), bridge_api::ErrorKind::Format);

        let mut out = Vec::new();
        assert!(framing.encode(&[0u8; 9], &mut out).is_err());
        assert!(out.is_empty());
    }
}
