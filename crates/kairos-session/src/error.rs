use std::time::Duration;

use kairos_frame::FrameError;
use kairos_transport::TransportError;

/// Errors that can occur while running a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error (discovery, session open, accept).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error (handshake, reassembly, buffer pool).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Two active streams announced the same source id.
    #[error("duplicate stream for source {0}")]
    DuplicateSource(u32),

    /// A bidirectional stream announced a source other than the control channel.
    #[error("unexpected source {0} on a bidirectional stream")]
    UnexpectedBidirectionalSource(u32),

    /// The control source id arrived on a unidirectional stream.
    #[error("control source {0} on a unidirectional stream")]
    ControlOnUnidirectional(u32),

    /// A second control stream was opened while one is active.
    #[error("control channel already open")]
    DuplicateControlChannel,

    /// Writing on the control channel failed.
    #[error("control channel write failed: {0}")]
    ControlWrite(#[source] std::io::Error),

    /// No keepalive acknowledgment arrived in time.
    #[error("no keepalive acknowledgment for {0:?}")]
    KeepaliveTimeout(Duration),

    /// An outbound control message exceeds the framed size limit.
    #[error("control message too large ({len} bytes, max {max})")]
    ControlMessageTooLarge { len: usize, max: usize },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session manager is no longer running.
    #[error("session manager stopped")]
    ManagerStopped,
}

impl SessionError {
    /// Whether this error ends the current session attempt.
    ///
    /// Everything raised while a session is live is fatal and resolved by a
    /// full reconnect. The exceptions are caller mistakes reported by
    /// [`SessionHandle`](crate::SessionHandle) before anything is sent.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ControlMessageTooLarge { .. } | Self::Json(_) | Self::ManagerStopped
        )
    }

    /// True for the abort that teardown itself causes in stream tasks.
    pub(crate) fn is_abort(&self) -> bool {
        matches!(self, Self::Frame(FrameError::Aborted))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
