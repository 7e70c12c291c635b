use std::fmt;

use bytes::{Bytes, BytesMut};
use kairos_frame::{Frame, StreamId};
use kairos_transport::EndpointLocation;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::control::{frame_json, MAX_CONTROL_MESSAGE_LENGTH};
use crate::error::{Result, SessionError};

/// Coarse connectivity state reported to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Output of the session manager.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connectivity changed.
    Status(ConnectionStatus),
    /// A frame from a data stream. Return its buffer with
    /// [`SessionHandle::release`].
    Data(Frame),
    /// An application message from the control channel. Keepalive
    /// acknowledgments never appear here.
    Control(Frame),
}

/// Input of the session manager.
#[derive(Debug)]
pub enum Command {
    /// Start connecting. Only the first `Setup` is honoured.
    Setup(EndpointLocation),
    /// Return a frame buffer to its stream's pool.
    ReleaseBuffer { stream_id: StreamId, buffer: BytesMut },
    /// Write already-framed bytes on the control channel.
    SendControl(Bytes),
    /// Tear the session down and stop.
    Shutdown,
}

pub(crate) type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of the session event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Cloneable handle for sending commands to a running session manager.
///
/// Dropping every handle shuts the manager down.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Start connecting to `location`.
    pub fn setup(&self, location: EndpointLocation) -> Result<()> {
        self.send(Command::Setup(location))
    }

    /// Return a buffer taken from a frame of stream `stream_id`.
    pub fn release_buffer(&self, stream_id: StreamId, buffer: BytesMut) -> Result<()> {
        self.send(Command::ReleaseBuffer { stream_id, buffer })
    }

    /// Return a frame's buffer to the stream it came from.
    pub fn release(&self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        self.release_buffer(stream_id, frame.into_buffer())
    }

    /// Write a caller-framed message on the control channel.
    ///
    /// `bytes` must start with a valid length prefix; only the declared
    /// length is written.
    pub fn send_control(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let mut bytes = bytes.into();
        let len = kairos_frame::validate_framed(&bytes)?;
        if len > MAX_CONTROL_MESSAGE_LENGTH {
            return Err(SessionError::ControlMessageTooLarge {
                len,
                max: MAX_CONTROL_MESSAGE_LENGTH,
            });
        }
        bytes.truncate(len);
        self.send(Command::SendControl(bytes))
    }

    /// Serialize `value` as JSON and send it on the control channel.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.send(Command::SendControl(frame_json(value)?))
    }

    /// Ask the manager to disconnect and stop.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Whether the manager has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::ManagerStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(tx), rx)
    }

    #[test]
    fn send_control_writes_declared_prefix_only() {
        let (handle, mut rx) = handle();
        handle
            .send_control(vec![6u8, 0, 0, 0, b'h', b'i', 0xEE, 0xEE])
            .expect("framed bytes should be accepted");

        match rx.try_recv().expect("command should be queued") {
            Command::SendControl(bytes) => assert_eq!(bytes.as_ref(), &[6, 0, 0, 0, b'h', b'i']),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn send_control_rejects_bad_prefix() {
        let (handle, mut rx) = handle();
        assert!(handle.send_control(vec![2u8, 0, 0, 0]).is_err());
        assert!(handle.send_control(vec![10u8, 0, 0, 0, 1]).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn release_routes_frame_buffer() {
        let (handle, mut rx) = handle();
        let frame = Frame::new(7, 5, BytesMut::zeroed(16), 12);
        handle.release(frame).expect("release should queue");

        match rx.try_recv().expect("command should be queued") {
            Command::ReleaseBuffer { stream_id, buffer } => {
                assert_eq!(stream_id, 7);
                assert_eq!(buffer.len(), 16);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn stopped_manager_reported() {
        let (handle, rx) = handle();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(handle.shutdown(), Err(SessionError::ManagerStopped)));
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Disconnected).expect("status should serialize"),
            "\"disconnected\""
        );
    }
}
