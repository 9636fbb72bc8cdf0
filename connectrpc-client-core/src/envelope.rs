//! Connect streaming envelope framing.
//!
//! Every streamed message travels in an envelope:
//!
//! ```text
//! [flags:1][length:4 big-endian][payload:length]
//! ```
//!
//! Flag bit 0 marks a compressed payload, bit 1 marks the end-of-stream frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::compression::RequestCompression;
use crate::error::EnvelopeError;
use crate::pool::BoxedPool;

/// Envelope flag bits.
pub mod envelope_flags {
    pub const MESSAGE: u8 = 0x00;
    pub const COMPRESSED: u8 = 0x01;
    pub const END_STREAM: u8 = 0x02;
}

/// Envelope header size (flags + length).
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Frame `payload`, compressing it when `compression` is set and the payload
/// reaches its threshold.
///
/// ```
/// use bytes::Bytes;
/// use connectrpc_client_core::{pack, unpack};
///
/// let frame = pack(Bytes::from_static(b"hi"), None).unwrap();
/// assert_eq!(frame.as_ref(), &[0, 0, 0, 0, 2, b'h', b'i']);
/// assert_eq!(unpack(frame, None).unwrap(), (0, Bytes::from_static(b"hi")));
/// ```
pub fn pack(payload: Bytes, compression: Option<&RequestCompression>) -> Result<Bytes, EnvelopeError> {
    match compression {
        Some(c) if c.should_compress(payload.len()) => {
            let compressed = c.pool.compress(&payload)?;
            trace!(
                encoding = c.pool.name(),
                raw = payload.len(),
                compressed = compressed.len(),
                "compressed envelope payload"
            );
            frame(envelope_flags::COMPRESSED, &compressed)
        }
        _ => frame(envelope_flags::MESSAGE, &payload),
    }
}

/// Build an end-of-stream frame around a JSON payload.
pub fn end_stream_frame(payload: &[u8]) -> Result<Bytes, EnvelopeError> {
    frame(envelope_flags::END_STREAM, payload)
}

fn frame(flags: u8, payload: &[u8]) -> Result<Bytes, EnvelopeError> {
    let length = header_length(payload.len())?;
    let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    buf.put_u8(flags);
    buf.put_u32(length);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// The length field is a u32; larger payloads cannot be framed.
fn header_length(len: usize) -> Result<u32, EnvelopeError> {
    u32::try_from(len).map_err(|_| EnvelopeError::PayloadTooLarge { len })
}

/// Read the `(flags, length)` header at the start of `data`.
pub fn parse_envelope_header(data: &[u8]) -> Result<(u8, usize), EnvelopeError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::IncompleteHeader {
            expected: ENVELOPE_HEADER_SIZE,
            actual: data.len(),
        });
    }
    let length = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((data[0], length as usize))
}

/// Split one envelope into its flag byte and payload.
///
/// The payload is decompressed only when the compressed bit is set and a
/// pool is supplied; otherwise it is returned as read. Trailing bytes past
/// the declared length are ignored.
pub fn unpack(mut frame: Bytes, pool: Option<&BoxedPool>) -> Result<(u8, Bytes), EnvelopeError> {
    let (flags, length) = parse_envelope_header(&frame)?;
    let available = frame.len() - ENVELOPE_HEADER_SIZE;
    if length > available {
        return Err(EnvelopeError::LengthMismatch {
            declared: length,
            available,
        });
    }
    frame.advance(ENVELOPE_HEADER_SIZE);
    let payload = frame.split_to(length);

    match pool {
        Some(pool) if is_compressed(flags) => Ok((flags, pool.decompress(&payload)?)),
        _ => Ok((flags, payload)),
    }
}

pub fn is_compressed(flags: u8) -> bool {
    flags & envelope_flags::COMPRESSED != 0
}

pub fn is_end_stream(flags: u8) -> bool {
    flags & envelope_flags::END_STREAM != 0
}

/// Reassembles envelopes from arbitrarily chunked transport reads.
#[derive(Debug, Default)]
pub struct EnvelopeBuffer {
    buffer: BytesMut,
}

impl EnvelopeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete envelope (header included), if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let (_, length) = parse_envelope_header(&self.buffer).ok()?;
        let total = ENVELOPE_HEADER_SIZE + length;
        if self.buffer.len() < total {
            return None;
        }
        Some(self.buffer.split_to(total).freeze())
    }

    /// Bytes of an incomplete envelope still waiting for more input.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Code, ConnectError};
    use crate::pool::tests::ReversePool;

    fn reverse(min_bytes: usize) -> RequestCompression {
        RequestCompression::new(BoxedPool::new(ReversePool), min_bytes)
    }

    #[test]
    fn test_pack_uncompressed() {
        let frame = pack(Bytes::from_static(b"hello"), None).unwrap();
        assert_eq!(frame[0], envelope_flags::MESSAGE);
        assert_eq!(&frame[1..5], &[0, 0, 0, 5]);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn test_pack_below_threshold_stays_raw() {
        let frame = pack(Bytes::from_static(b"hello"), Some(&reverse(6))).unwrap();
        assert_eq!(frame[0], envelope_flags::MESSAGE);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn test_pack_at_threshold_compresses() {
        let frame = pack(Bytes::from_static(b"hello"), Some(&reverse(5))).unwrap();
        assert_eq!(frame[0], envelope_flags::COMPRESSED);
        assert_eq!(&frame[5..], b"olleh");
    }

    #[test]
    fn test_unpack_round_trip_with_pool() {
        let compression = reverse(0);
        let frame = pack(Bytes::from_static(b"payload"), Some(&compression)).unwrap();
        let (flags, payload) = unpack(frame, Some(&compression.pool)).unwrap();
        assert_eq!(flags, envelope_flags::COMPRESSED);
        assert_eq!(payload.as_ref(), b"payload");
    }

    #[test]
    fn test_unpack_compressed_without_pool_returns_raw() {
        let frame = pack(Bytes::from_static(b"abc"), Some(&reverse(0))).unwrap();
        let (flags, payload) = unpack(frame, None).unwrap();
        assert!(is_compressed(flags));
        assert_eq!(payload.as_ref(), b"cba");
    }

    #[test]
    fn test_unpack_uncompressed_ignores_pool() {
        let frame = pack(Bytes::from_static(b"abc"), None).unwrap();
        let pool = BoxedPool::new(ReversePool);
        let (_, payload) = unpack(frame, Some(&pool)).unwrap();
        assert_eq!(payload.as_ref(), b"abc");
    }

    #[test]
    fn test_unpack_incomplete_header() {
        let err = unpack(Bytes::from_static(&[0, 0, 0]), None).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::IncompleteHeader {
                expected: 5,
                actual: 3
            }
        );
    }

    #[test]
    fn test_unpack_length_mismatch() {
        let err = unpack(Bytes::from_static(&[0, 0, 0, 0, 9, b'x']), None).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::LengthMismatch {
                declared: 9,
                available: 1
            }
        );
    }

    #[test]
    fn test_unpack_decompression_failure() {
        let frame = Bytes::from_static(&[1, 0, 0, 0, 1, 0xFF]);
        let pool = BoxedPool::new(ReversePool);
        assert!(matches!(
            unpack(frame, Some(&pool)),
            Err(EnvelopeError::Decompression(_))
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_length_beyond_u32_is_rejected() {
        assert_eq!(header_length(u32::MAX as usize), Ok(u32::MAX));
        let err = header_length(u32::MAX as usize + 1).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::PayloadTooLarge {
                len: u32::MAX as usize + 1
            }
        );
        assert_eq!(ConnectError::from(err).code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_end_stream_frame() {
        let frame = end_stream_frame(b"{}").unwrap();
        assert!(is_end_stream(frame[0]));
        assert!(!is_compressed(frame[0]));
        let (flags, payload) = unpack(frame, None).unwrap();
        assert_eq!(flags, envelope_flags::END_STREAM);
        assert_eq!(payload.as_ref(), b"{}");
    }

    #[test]
    fn test_envelope_buffer_reassembles_chunks() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&pack(Bytes::from_static(b"one"), None).unwrap());
        wire.extend_from_slice(&end_stream_frame(b"{}").unwrap());

        let mut buffer = EnvelopeBuffer::new();
        buffer.push(&wire[..4]);
        assert!(buffer.next_frame().is_none());

        buffer.push(&wire[4..10]);
        let first = buffer.next_frame().unwrap();
        assert_eq!(&first[5..], b"one");
        assert!(buffer.next_frame().is_none());
        assert_eq!(buffer.pending(), 2);

        buffer.push(&wire[10..]);
        let second = buffer.next_frame().unwrap();
        assert!(is_end_stream(second[0]));
        assert_eq!(buffer.pending(), 0);
    }
}
