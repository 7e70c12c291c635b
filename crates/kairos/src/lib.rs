//! Client-side demultiplexer for framed server streams.
//!
//! kairos connects to a server over a multiplexed QUIC session, accepts
//! every stream the server opens, reassembles length-prefixed frames into
//! pooled buffers, and hands them to the application with explicit buffer
//! return as the backpressure signal. A reserved bidirectional stream carries
//! JSON control messages and a keepalive.
//!
//! # Crate Structure
//!
//! - [`transport`]: session abstraction, endpoint discovery, WebTransport
//!   client (behind `webtransport`) and an in-memory pair for tests
//! - [`frame`]: wire format, stream handshake, buffer pool and reassembler
//! - [`session`]: session manager, acceptors, control channel and the
//!   command / event API
//!
//! # Example
//!
//! ```no_run
//! use kairos::session::{SessionConfig, SessionEvent, SessionManager};
//! use kairos::transport::memory::MemoryConnector;
//! use kairos::transport::EndpointLocation;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (connector, _peers) = MemoryConnector::new();
//! let (manager, handle, mut events) = SessionManager::new(connector, SessionConfig::default());
//! tokio::spawn(manager.run());
//!
//! handle.setup(EndpointLocation::parse("http://localhost:3000/")?)?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Data(frame) = event {
//!         println!("{} bytes from source {}", frame.len(), frame.source_id());
//!         handle.release(frame)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use kairos_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use kairos_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use kairos_session::*;
}
