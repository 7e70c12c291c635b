//! Multiplexed session abstraction for the kairos client.
//!
//! Provides a unified interface over transports that carry many independent
//! byte streams on one connection:
//! - WebTransport over QUIC (behind the `webtransport` feature)
//! - An in-process session pair for tests and demos
//!
//! This is the lowest layer of kairos. Everything else builds on the
//! [`MultiplexedSession`] and [`Connector`] traits provided here.

pub mod endpoint;
pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "webtransport")]
pub mod webtransport;

pub use endpoint::{parse_certificate_hash, EndpointDescriptor, EndpointLocation};
pub use error::{Result, TransportError};
pub use traits::{Connector, MultiplexedSession};

#[cfg(feature = "webtransport")]
pub use webtransport::{WebTransportConnector, WebTransportSession};
