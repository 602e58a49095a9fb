//! Persistent socket to the conversation server.
//!
//! [`ConnectionManager`] implements [`ConversationLink`] on top of
//! `tokio-tungstenite`; [`protocol`] holds the frame and close types shared
//! with the session.

pub mod manager;
pub mod protocol;

pub use manager::{ConnectionManager, ConversationLink};
pub use protocol::{
    CloseInfo, ConnectionError, Endpoint, OutboundMessage, ServerMessage, NORMAL_CLOSE_CODE,
};
