//! Varint length-delimited message framing for byte streams.
//!
//! Every message on the wire is a LEB128 payload-length prefix followed by
//! that many payload bytes, so a reader can always recover message boundaries
//! on its own. The payload itself is opaque.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_envelope, encode_envelope, varint_size, Envelope, FrameConfig, DEFAULT_MAX_PAYLOAD,
    MAX_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
