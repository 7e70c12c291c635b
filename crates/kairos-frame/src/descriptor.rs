//! Stream handshake descriptor.
//!
//! Every stream starts with 12 bytes, three little-endian `u32`s:
//! `source_id`, `recommended_buffer_count`, `max_frame_length`. They select
//! the consumer and size the stream's buffer pool.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FrameError, Result};

/// Size of the handshake descriptor in bytes.
pub const DESCRIPTOR_SIZE: usize = 12;

/// Parsed stream handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamDescriptor {
    /// Semantic data source carried by the stream.
    pub source_id: u32,
    /// Number of buffers in the stream's pool.
    pub recommended_buffer_count: u32,
    /// Length of each buffer, i.e. the largest frame the stream may carry.
    pub max_frame_length: u32,
}

impl StreamDescriptor {
    /// Decode the 12 wire bytes.
    pub fn decode(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let field = |index: usize| {
            u32::from_le_bytes([
                bytes[index * 4],
                bytes[index * 4 + 1],
                bytes[index * 4 + 2],
                bytes[index * 4 + 3],
            ])
        };
        Self {
            source_id: field(0),
            recommended_buffer_count: field(1),
            max_frame_length: field(2),
        }
    }

    /// Encode to the 12 wire bytes.
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        bytes[0..4].copy_from_slice(&self.source_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.recommended_buffer_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.max_frame_length.to_le_bytes());
        bytes
    }

    /// Total bytes the stream's pool will hold.
    pub fn pool_bytes(&self) -> u64 {
        u64::from(self.recommended_buffer_count) * u64::from(self.max_frame_length)
    }

    /// Reject sizing parameters that could never make progress or exceed `limits`.
    pub fn validate(&self, limits: &DescriptorLimits) -> Result<()> {
        if self.recommended_buffer_count == 0 {
            return Err(FrameError::InvalidDescriptor(format!(
                "source {} requested an empty buffer pool",
                self.source_id
            )));
        }
        if (self.max_frame_length as usize) < crate::codec::LENGTH_PREFIX_SIZE {
            return Err(FrameError::InvalidDescriptor(format!(
                "source {} max frame length {} is below the 4-byte prefix",
                self.source_id, self.max_frame_length
            )));
        }
        if self.recommended_buffer_count > limits.max_buffer_count {
            return Err(FrameError::InvalidDescriptor(format!(
                "source {} buffer count {} exceeds {}",
                self.source_id, self.recommended_buffer_count, limits.max_buffer_count
            )));
        }
        if self.max_frame_length > limits.max_frame_length {
            return Err(FrameError::InvalidDescriptor(format!(
                "source {} max frame length {} exceeds {}",
                self.source_id, self.max_frame_length, limits.max_frame_length
            )));
        }
        if self.pool_bytes() > limits.max_pool_bytes {
            return Err(FrameError::InvalidDescriptor(format!(
                "source {} pool of {} bytes exceeds {}",
                self.source_id,
                self.pool_bytes(),
                limits.max_pool_bytes
            )));
        }
        Ok(())
    }
}

/// Upper bounds applied to peer-provided descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLimits {
    /// Maximum buffers per stream. Default: 1024.
    pub max_buffer_count: u32,
    /// Maximum frame (buffer) length. Default: 64 MiB.
    pub max_frame_length: u32,
    /// Maximum pool footprint per stream. Default: 1 GiB.
    pub max_pool_bytes: u64,
}

impl Default for DescriptorLimits {
    fn default() -> Self {
        Self {
            max_buffer_count: 1024,
            max_frame_length: 64 * 1024 * 1024,
            max_pool_bytes: 1 << 30,
        }
    }
}

/// Read exactly one descriptor, accumulating partial reads.
///
/// A close before all 12 bytes arrive is [`FrameError::HandshakeTruncated`].
pub async fn read_descriptor<R: AsyncRead + Unpin>(reader: &mut R) -> Result<StreamDescriptor> {
    let mut bytes = [0u8; DESCRIPTOR_SIZE];
    let mut received = 0usize;
    while received < DESCRIPTOR_SIZE {
        let read = reader.read(&mut bytes[received..]).await?;
        if read == 0 {
            return Err(FrameError::HandshakeTruncated { received });
        }
        received += read;
    }
    Ok(StreamDescriptor::decode(&bytes))
}
