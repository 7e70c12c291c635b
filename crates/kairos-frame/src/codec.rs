use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame prefix: total length (4, LE, inclusive of itself).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Locally assigned, process-local stream identifier.
pub type StreamId = u64;

/// A reassembled frame, still backed by the stream's pooled buffer.
///
/// The buffer keeps the pool's fixed length; only the first [`Frame::len`]
/// bytes belong to the frame. Hand the buffer back with
/// [`Frame::into_buffer`] so the stream can reuse it.
pub struct Frame {
    stream_id: StreamId,
    source_id: u32,
    buffer: BytesMut,
    len: usize,
}

impl Frame {
    /// Wrap a pooled buffer whose first `len` bytes hold one frame.
    pub fn new(stream_id: StreamId, source_id: u32, buffer: BytesMut, len: usize) -> Self {
        let len = len.min(buffer.len());
        Self {
            stream_id,
            source_id,
            buffer,
            len,
        }
    }

    /// Local id of the stream this frame arrived on.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Source id announced in the stream's handshake.
    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Declared total length, prefix included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a frame that carries only its prefix.
    pub fn is_empty(&self) -> bool {
        self.len <= LENGTH_PREFIX_SIZE
    }

    /// The frame bytes, prefix included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// The frame bytes after the length prefix.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[LENGTH_PREFIX_SIZE.min(self.len)..self.len]
    }

    /// Give up the frame and return the underlying pooled buffer.
    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("stream_id", &self.stream_id)
            .field("source_id", &self.source_id)
            .field("len", &self.len)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

/// Read the declared total length from the first 4 bytes, if present.
pub fn frame_length(bytes: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix) as usize)
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────────────────────────┐
/// │ Length (4B LE)       │ Payload                  │
/// │ = 4 + payload length │ (Length - 4 bytes)       │
/// └──────────────────────┴──────────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let max = u32::MAX as usize - LENGTH_PREFIX_SIZE;
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32_le((LENGTH_PREFIX_SIZE + payload.len()) as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Check a caller-framed message and return its declared length.
///
/// The declared length must cover at least the prefix and must not exceed
/// the bytes supplied. Trailing bytes beyond the declared length are ignored
/// by writers.
pub fn validate_framed(bytes: &[u8]) -> Result<usize> {
    let len = frame_length(bytes).ok_or(FrameError::InvalidLength { len: bytes.len() })?;
    if len < LENGTH_PREFIX_SIZE {
        return Err(FrameError::InvalidLength { len });
    }
    if len > bytes.len() {
        return Err(FrameError::FrameTooLarge {
            len,
            max: bytes.len(),
        });
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_writes_inclusive_length() {
        let mut buf = BytesMut::new();
        encode_frame(b"pong", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[8, 0, 0, 0, b'p', b'o', b'n', b'g']);
    }

    #[test]
    fn encode_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[4, 0, 0, 0]);
    }

    #[test]
    fn frame_length_needs_four_bytes() {
        assert_eq!(frame_length(&[0x0C, 0x00, 0x00]), None);
        assert_eq!(frame_length(&[0x0C, 0x00, 0x00, 0x00, 0xFF]), Some(12));
    }

    #[test]
    fn validate_framed_accepts_exact_and_trailing() {
        assert_eq!(validate_framed(&[5, 0, 0, 0, 1]).unwrap(), 5);
        assert_eq!(validate_framed(&[5, 0, 0, 0, 1, 2, 3]).unwrap(), 5);
    }

    #[test]
    fn validate_framed_rejects_short_and_overlong() {
        assert!(matches!(
            validate_framed(&[2, 0, 0, 0]),
            Err(FrameError::InvalidLength { len: 2 })
        ));
        assert!(matches!(
            validate_framed(&[9, 0, 0, 0, 1]),
            Err(FrameError::FrameTooLarge { len: 9, max: 5 })
        ));
        assert!(matches!(
            validate_framed(&[1, 0]),
            Err(FrameError::InvalidLength { .. })
        ));
    }

    #[test]
    fn frame_views_respect_declared_length() {
        let mut buffer = BytesMut::zeroed(16);
        buffer[..6].copy_from_slice(&[6, 0, 0, 0, b'h', b'i']);
        let frame = Frame::new(3, 7, buffer, 6);

        assert_eq!(frame.stream_id(), 3);
        assert_eq!(frame.source_id(), 7);
        assert_eq!(frame.as_bytes(), &[6, 0, 0, 0, b'h', b'i']);
        assert_eq!(frame.payload(), b"hi");
        assert!(!frame.is_empty());
        assert_eq!(frame.into_buffer().len(), 16);
    }

    #[test]
    fn frame_len_clamped_to_buffer() {
        let frame = Frame::new(0, 0, BytesMut::zeroed(4), 100);
        assert_eq!(frame.len(), 4);
        assert!(frame.payload().is_empty());
    }
}
