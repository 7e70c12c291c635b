/// Errors that can occur while reading handshakes or reassembling frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame declared a total length smaller than its own 4-byte prefix.
    #[error("invalid frame length {len} (minimum 4)")]
    InvalidLength { len: usize },

    /// A frame declared a total length larger than the stream's buffers.
    #[error("frame too large ({len} bytes, buffer length {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// An outbound payload does not fit the 32-bit length prefix.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stream closed before the 12-byte handshake descriptor was complete.
    #[error("stream closed after {received} of 12 handshake bytes")]
    HandshakeTruncated { received: usize },

    /// The handshake descriptor carries unusable sizing parameters.
    #[error("invalid stream descriptor: {0}")]
    InvalidDescriptor(String),

    /// An I/O error occurred while reading the stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream closed in the middle of a frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The stream was aborted; pending buffer waits are rejected with this.
    #[error("stream aborted")]
    Aborted,

    /// A second buffer acquire was issued while one is still pending.
    #[error("buffer acquire already pending")]
    WaiterPending,

    /// The frame consumer is gone.
    #[error("frame sink closed")]
    SinkClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
