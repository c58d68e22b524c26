use std::collections::BTreeMap;

use bridge_api::{BridgeError, Event, EventSerializer};

/// Header+body binary layout, all lengths big-endian `u32`:
///
/// ```text
/// [header_count]
///   [key_len][key bytes][value_len][value bytes]   × header_count
/// [body_len][body bytes]
/// ```
///
/// Headers are written in key order, so equal events always produce
/// identical buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderBodySerializer;

impl HeaderBodySerializer {
    pub fn new() -> Self {
        Self
    }

    /// Parse a buffer produced by [`EventSerializer::serialize`].
    pub fn deserialize(&self, data: &[u8]) -> Result<Event, BridgeError> {
        let mut cursor = Cursor { data, pos: 0 };

        let count = cursor.read_u32("header count")? as usize;
        let mut headers = BTreeMap::new();
        for _ in 0..count {
            let key = String::from_utf8(cursor.read_chunk("header key")?.to_vec())?;
            let value = String::from_utf8(cursor.read_chunk("header value")?.to_vec())?;
            headers.insert(key, value);
        }
        let body = cursor.read_chunk("body")?.to_vec();

        if cursor.pos != data.len() {
            return Err(BridgeError::format_err(format!(
                "{} trailing bytes after event body",
                data.len() - cursor.pos
            )));
        }
        Ok(Event::new(headers, body))
    }
}

impl EventSerializer for HeaderBodySerializer {
    fn serialize(&self, event: &Event) -> Result<Vec<u8>, BridgeError> {
        let headers = event.headers();
        let size = 8
            + headers.iter().map(|(k, v)| 8 + k.len() + v.len()).sum::<usize>()
            + event.body().len();
        let mut out = Vec::with_capacity(size);

        put_len(&mut out, headers.len(), "header count")?;
        for (key, value) in headers {
            put_chunk(&mut out, key.as_bytes(), "header key")?;
            put_chunk(&mut out, value.as_bytes(), "header value")?;
        }
        put_chunk(&mut out, event.body(), "body")?;
        Ok(out)
    }
}

fn put_len(out: &mut Vec<u8>, len: usize, what: &str) -> Result<(), BridgeError> {
    let len = u32::try_from(len)
        .map_err(|_| BridgeError::format_err(format!("{what} too large: {len}")))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_chunk(out: &mut Vec<u8>, chunk: &[u8], what: &str) -> Result<(), BridgeError> {
    put_len(out, chunk.len(), what)?;
    out.extend_from_slice(chunk);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], BridgeError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len()).ok_or_else(|| {
            BridgeError::format_err(format!(
                "truncated {what}: need {n} bytes at offset {}, have {}",
                self.pos,
                self.data.len() - self.pos
            ))
        })?;
        let chunk = &self.data[self.pos..end];
        self.pos = end;
        Ok(chunk)
    }

    fn read_u32(&mut self, what: &str) -> Result<u32, BridgeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_chunk(&mut self, what: &str) -> Result<&'a [u8], BridgeError> {
        let len = self.read_u32(what)? as usize;
        self.take(len, what)
    }
}
