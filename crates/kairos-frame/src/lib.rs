//! Stream handshake, frame reassembly and buffer pooling for kairos.
//!
//! Every inbound stream starts with a 12-byte descriptor and then carries
//! length-prefixed frames:
//! - A 4-byte little-endian total length, counting the prefix itself
//! - `length - 4` payload bytes
//!
//! Frames are reassembled into fixed-length pooled buffers; a stream can
//! never hold more buffers than its descriptor asked for.

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod pool;
pub mod reassembler;

#[cfg(test)]
mod testing;

pub use codec::{encode_frame, frame_length, validate_framed, Frame, StreamId, LENGTH_PREFIX_SIZE};
pub use descriptor::{read_descriptor, DescriptorLimits, StreamDescriptor, DESCRIPTOR_SIZE};
pub use error::{FrameError, Result};
pub use pool::BufferPool;
pub use reassembler::{FrameReassembler, FrameSink};
