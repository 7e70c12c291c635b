/// Errors that can occur while resolving, opening, or using a multiplexed session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint location could not be parsed or normalised.
    #[error("invalid endpoint location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    /// The side-channel endpoint discovery request failed.
    #[error("failed to resolve endpoint at {url}: {reason}")]
    Resolve { url: String, reason: String },

    /// The advertised certificate fingerprint is malformed.
    #[error("invalid certificate fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Failed to open the multiplexed session.
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Failed to accept an incoming stream.
    #[error("failed to accept stream: {0}")]
    Accept(String),

    /// The session has been closed, locally or by the peer.
    #[error("session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
