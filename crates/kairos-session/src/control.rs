use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Source id reserved for the control channel.
pub const CONTROL_SOURCE_ID: u32 = 0x00FF_FFFF;
/// Payload of a keepalive acknowledgment frame.
pub const KEEPALIVE_ACK: &[u8; 4] = b"pong";
/// CONTROL message type: keepalive ping.
pub const CONTROL_PING: &str = "Ping";
/// Maximum framed size of an outbound control message.
pub const MAX_CONTROL_MESSAGE_LENGTH: usize = 1 << 20;

const KEEPALIVE_ACK_FRAME_LEN: usize = kairos_frame::LENGTH_PREFIX_SIZE + KEEPALIVE_ACK.len();

/// CONTROL channel JSON message.
///
/// Only `type` is interpreted here; every other field is carried through
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ControlMessage {
    /// Create a message with no extra fields.
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Create a keepalive ping.
    pub fn ping() -> Self {
        Self::new(CONTROL_PING)
    }

    /// Add a field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Parse a control frame payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Serialize and frame for the control channel.
    pub fn to_frame_bytes(&self) -> Result<Bytes> {
        frame_json(self)
    }
}

/// Serialize `value` as JSON and add the length prefix.
pub fn frame_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(value)?;
    let len = kairos_frame::LENGTH_PREFIX_SIZE + json.len();
    if len > MAX_CONTROL_MESSAGE_LENGTH {
        return Err(SessionError::ControlMessageTooLarge {
            len,
            max: MAX_CONTROL_MESSAGE_LENGTH,
        });
    }
    let mut framed = BytesMut::with_capacity(len);
    kairos_frame::encode_frame(&json, &mut framed)?;
    Ok(framed.freeze())
}

/// Whether a control frame is a keepalive acknowledgment.
///
/// Exactly 8 bytes with `pong` after the prefix; anything else is an
/// application message.
pub fn is_keepalive_ack(frame: &[u8]) -> bool {
    frame.len() == KEEPALIVE_ACK_FRAME_LEN
        && kairos_frame::frame_length(frame) == Some(KEEPALIVE_ACK_FRAME_LEN)
        && &frame[kairos_frame::LENGTH_PREFIX_SIZE..] == KEEPALIVE_ACK
}
