use std::time::Duration;

use kairos_frame::DescriptorLimits;

use crate::control::CONTROL_SOURCE_ID;

/// Delay between a session failure and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
/// Interval between keepalive pings on the control channel.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1000);
/// Longest a shutdown waits for queued control messages to be written.
pub const DEFAULT_SHUTDOWN_FLUSH: Duration = Duration::from_millis(1000);

/// Session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fixed wait before reconnecting. There is no backoff.
    pub reconnect_delay: Duration,
    /// Keepalive ping period.
    pub keepalive_interval: Duration,
    /// Abort the session when no keepalive acknowledgment arrives for this
    /// long. `None` never times out.
    pub keepalive_timeout: Option<Duration>,
    /// On shutdown, wait up to this long for the control channel to write
    /// the messages already queued before its streams are aborted.
    pub shutdown_flush: Duration,
    /// Source id reserved for the control channel.
    pub control_source_id: u32,
    /// Bounds applied to every stream handshake.
    pub limits: DescriptorLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_timeout: None,
            shutdown_flush: DEFAULT_SHUTDOWN_FLUSH,
            control_source_id: CONTROL_SOURCE_ID,
            limits: DescriptorLimits::default(),
        }
    }
}
