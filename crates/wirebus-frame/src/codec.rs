use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Maximum length-prefix size: a `u32` payload length fits in 5 LEB128 bytes.
pub const MAX_PREFIX_SIZE: usize = 5;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One self-delimited message.
///
/// The payload is opaque to the framing layer; cloning is cheap because the
/// payload is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The message payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The total wire size of this envelope (length prefix + payload).
    pub fn wire_size(&self) -> usize {
        varint_size(self.payload.len() as u64) + self.payload.len()
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────────────┬──────────────────┐
/// │ Length (varint)   │ Payload          │
/// │ LEB128, 1-5 bytes │ (Length bytes)   │
/// └───────────────────┴──────────────────┘
/// ```
pub fn encode_envelope(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(varint_size(payload.len() as u64) + payload.len());
    put_varint(payload.len() as u64, dst);
    dst.put_slice(payload);
    Ok(())
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    let Some((payload_len, prefix_len)) = get_varint(src)? else {
        return Ok(None); // Need more data
    };

    if payload_len > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len as usize,
            max: max_payload,
        });
    }
    let payload_len = payload_len as usize;

    let total = prefix_len + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(prefix_len);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Envelope { payload }))
}

/// Number of bytes the LEB128 encoding of `value` occupies.
pub fn varint_size(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

fn put_varint(mut value: u64, dst: &mut BytesMut) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Read a LEB128 length prefix from the front of `src` without consuming it.
///
/// Returns `Ok(None)` when the prefix is incomplete, `Ok(Some((value, len)))`
/// on success, and `MalformedLength` for an over-long or overflowing prefix.
fn get_varint(src: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value = 0u64;
    for (i, byte) in src.iter().enumerate() {
        if i >= MAX_PREFIX_SIZE {
            return Err(FrameError::MalformedLength);
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            if value > u64::from(u32::MAX) {
                return Err(FrameError::MalformedLength);
            }
            return Ok(Some((value, i + 1)));
        }
    }
    if src.len() >= MAX_PREFIX_SIZE {
        return Err(FrameError::MalformedLength);
    }
    Ok(None)
}

/// Configuration for the envelope codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, wirebus!";

        encode_envelope(payload, &mut buf).unwrap();

        assert_eq!(buf.len(), 1 + payload.len());

        let envelope = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!(envelope.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn prefix_grows_with_payload() {
        // 127 is the largest single-byte length; 128 needs two bytes.
        for (len, prefix) in [(127usize, 1usize), (128, 2), (16383, 2), (16384, 3)] {
            let payload = vec![0xAB; len];
            let mut buf = BytesMut::new();
            encode_envelope(&payload, &mut buf).unwrap();
            assert_eq!(buf.len(), prefix + len);
            assert_eq!(varint_size(len as u64), prefix);

            let envelope = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
                .unwrap()
                .unwrap();
            assert_eq!(envelope.payload.len(), len);
        }
    }

    #[test]
    fn decode_incomplete_prefix() {
        let mut buf = BytesMut::from(&[0x80, 0x80][..]);
        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_envelope(b"hello", &mut buf).unwrap();
        buf.truncate(3); // Truncate payload

        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn decode_overlong_prefix() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF][..]);
        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::MalformedLength)));
    }

    #[test]
    fn decode_prefix_overflowing_u32() {
        // 5-byte varint encoding a value above u32::MAX.
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F][..]);
        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::MalformedLength)));
    }

    #[test]
    fn decode_payload_too_large() {
        let mut buf = BytesMut::new();
        put_varint(32 * 1024 * 1024, &mut buf); // 32 MiB

        let result = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn decode_multiple_envelopes() {
        let mut buf = BytesMut::new();
        encode_envelope(b"first", &mut buf).unwrap();
        encode_envelope(b"second", &mut buf).unwrap();

        let e1 = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(e1.payload.as_ref(), b"first");

        let e2 = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(e2.payload.as_ref(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload() {
        let mut buf = BytesMut::new();
        encode_envelope(b"", &mut buf).unwrap();
        assert_eq!(buf.len(), 1);

        let envelope = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn envelope_wire_size() {
        let envelope = Envelope::new(Bytes::from_static(b"test"));
        assert_eq!(envelope.wire_size(), 1 + 4);

        let envelope = Envelope::new(vec![0u8; 200]);
        assert_eq!(envelope.wire_size(), 2 + 200);
    }
}
