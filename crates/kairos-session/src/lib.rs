//! Session management for the kairos client.
//!
//! This is the "just works" layer. Hand a [`SessionManager`] a connector and
//! an endpoint; it accepts every stream the server opens, reassembles frames,
//! keeps the control channel alive, and reconnects after any failure.
//! Consumers talk to it only through [`SessionHandle`] commands and
//! [`SessionEvent`]s.

mod acceptor;
pub mod config;
pub mod control;
pub mod error;
pub mod handle;
pub mod manager;
mod registry;
#[cfg(test)]
mod testing;
mod worker;

pub use config::{
    SessionConfig, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_RECONNECT_DELAY, DEFAULT_SHUTDOWN_FLUSH,
};
pub use control::{
    frame_json, is_keepalive_ack, ControlMessage, CONTROL_PING, CONTROL_SOURCE_ID, KEEPALIVE_ACK,
    MAX_CONTROL_MESSAGE_LENGTH,
};
pub use error::{Result, SessionError};
pub use handle::{Command, ConnectionStatus, EventReceiver, SessionEvent, SessionHandle};
pub use manager::SessionManager;
