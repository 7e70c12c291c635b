//! Per-stream frame reassembly.
//!
//! Reads arbitrary chunks from a stream into pooled buffers and emits one
//! [`Frame`] per complete length-prefixed frame, independent of how the
//! bytes were split on the wire.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::{frame_length, Frame, StreamId, LENGTH_PREFIX_SIZE};
use crate::descriptor::StreamDescriptor;
use crate::error::{FrameError, Result};
use crate::pool::BufferPool;

/// Consumer of reassembled frames.
///
/// The sink owns each frame's buffer until it hands it back to the stream's
/// [`BufferPool`]. Returning an error stops the stream.
pub trait FrameSink: Send {
    fn on_frame(&mut self, frame: Frame) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) -> Result<()> + Send,
{
    fn on_frame(&mut self, frame: Frame) -> Result<()> {
        self(frame)
    }
}

/// Reassembles frames from one stream.
pub struct FrameReassembler<R> {
    stream_id: StreamId,
    source_id: u32,
    reader: R,
    pool: BufferPool,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin> FrameReassembler<R> {
    /// Create a reassembler with a pool sized from the stream's handshake.
    pub fn new(stream_id: StreamId, descriptor: &StreamDescriptor, reader: R) -> Self {
        let pool = BufferPool::new(
            descriptor.recommended_buffer_count as usize,
            descriptor.max_frame_length as usize,
        );
        Self::with_pool(stream_id, descriptor.source_id, pool, reader)
    }

    /// Create a reassembler over an existing pool.
    pub fn with_pool(stream_id: StreamId, source_id: u32, pool: BufferPool, reader: R) -> Self {
        Self {
            stream_id,
            source_id,
            reader,
            pool,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned abort token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The stream's buffer pool; released buffers go back here.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Token that aborts the stream when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Read until the stream ends, handing every complete frame to `sink`.
    ///
    /// Returns `Ok(())` when the stream closes on a frame boundary. Any error
    /// aborts the stream: the pool rejects its waiter and later acquires.
    pub async fn run<S: FrameSink>(mut self, mut sink: S) -> Result<()> {
        let result = self.drive(&mut sink).await;
        match &result {
            Ok(()) => debug!(
                stream_id = self.stream_id,
                source_id = self.source_id,
                "stream closed"
            ),
            Err(err) => {
                debug!(
                    stream_id = self.stream_id,
                    source_id = self.source_id,
                    error = %err,
                    "stream aborted"
                );
                self.cancel.cancel();
                self.pool.abort();
            }
        }
        result
    }

    async fn drive<S: FrameSink>(&mut self, sink: &mut S) -> Result<()> {
        let buffer_len = self.pool.buffer_len();
        let mut buffer: Option<BytesMut> = None;
        let mut occupied = 0usize;
        let mut declared: Option<usize> = None;
        // Bytes read past the end of the last delivered frame. Reads stop at
        // the buffer end, so this holds under one buffer and a stream never
        // keeps more than (count + 1) * max_frame_length bytes in memory.
        let mut carry: Vec<u8> = Vec::new();

        loop {
            let mut current = match buffer.take() {
                Some(current) => current,
                None => {
                    let mut fresh = acquire_or_cancel(&self.pool, &self.cancel).await?;
                    occupied = carry.len();
                    fresh[..occupied].copy_from_slice(&carry);
                    carry.clear();
                    declared = None;
                    fresh
                }
            };

            if declared.is_none() {
                if let Some(len) = frame_length(&current[..occupied]) {
                    if len < LENGTH_PREFIX_SIZE {
                        return Err(FrameError::InvalidLength { len });
                    }
                    if len > buffer_len {
                        return Err(FrameError::FrameTooLarge {
                            len,
                            max: buffer_len,
                        });
                    }
                    declared = Some(len);
                }
            }

            if let Some(len) = declared.filter(|len| occupied >= *len) {
                carry.extend_from_slice(&current[len..occupied]);
                trace!(
                    stream_id = self.stream_id,
                    source_id = self.source_id,
                    len,
                    "frame complete"
                );
                sink.on_frame(Frame::new(self.stream_id, self.source_id, current, len))?;
                continue;
            }

            // Until the prefix is known, fill up to the buffer end; after
            // that, never read past the declared frame.
            let end = declared.unwrap_or(buffer_len);
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FrameError::Aborted),
                read = self.reader.read(&mut current[occupied..end]) => read?,
            };
            if read == 0 {
                return if occupied == 0 {
                    Ok(())
                } else {
                    Err(FrameError::ConnectionClosed)
                };
            }
            occupied += read;
            buffer = Some(current);
        }
    }

}

// Borrows only the pool and the token so the reassembler future stays `Send`
// for readers that are not `Sync`.
async fn acquire_or_cancel(pool: &BufferPool, cancel: &CancellationToken) -> Result<BytesMut> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FrameError::Aborted),
        buffer = pool.acquire() => buffer,
    }
}
