//! Wire types for the conversation socket.
//!
//! Outbound frames are JSON `{"message": "<utterance>"}`; inbound frames are
//! the raw response text, not JSON-wrapped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{ConversationId, SessionId};

/// Close code the server uses for an orderly shutdown.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// One frame sent to the server, once per turn (or once as the greeting).
///
/// ```
/// use voice_client::connection::OutboundMessage;
///
/// let json = OutboundMessage::new("qué hora es").to_json().unwrap();
/// assert_eq!(json, r#"{"message":"qué hora es"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "message")]
    pub text: String,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn to_json(&self) -> Result<String, ConnectionError> {
        serde_json::to_string(self).map_err(|e| ConnectionError::Encode(e.to_string()))
    }
}

/// Full response text to be spoken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub text: String,
}

impl ServerMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Address components for one connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub session_id: SessionId,
    pub conversation_id: ConversationId,
}

/// How a socket ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code from the peer's close frame; `None` when the socket
    /// dropped without one.
    pub code: Option<u16>,
    pub reason: String,
    /// `close()` was called on our side.
    pub initiated_locally: bool,
}

impl CloseInfo {
    pub fn local() -> Self {
        Self {
            code: Some(NORMAL_CLOSE_CODE),
            reason: String::new(),
            initiated_locally: true,
        }
    }

    pub fn remote(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            initiated_locally: false,
        }
    }

    /// A locally requested close, or a remote close with code 1000.
    pub fn is_normal(&self) -> bool {
        self.initiated_locally || self.code == Some(NORMAL_CLOSE_CODE)
    }
}

/// Failures of the conversation socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection timed out after {0} s")]
    Timeout(u64),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("send attempted while not connected")]
    NotConnected,

    #[error("connection closed abnormally (code {code:?}): {reason}")]
    AbnormalClose { code: Option<u16>, reason: String },

    #[error("failed to encode frame: {0}")]
    Encode(String),
}
