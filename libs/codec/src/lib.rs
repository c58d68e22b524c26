//! Byte-level formats of the bridge: the header+body event serializer,
//! length-prefixed framing, the connection handshake and an async frame
//! reader shared by the server and its clients.

mod framing;
mod handshake;
mod reader;
mod serializer;

pub use framing::{DEFAULT_MAX_FRAME, LengthPrefixedFraming};
pub use handshake::Handshake;
pub use reader::FrameReader;
pub use serializer::HeaderBodySerializer;
