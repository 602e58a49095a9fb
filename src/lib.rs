//! Voice conversation client.
//!
//! One control drives a spoken conversation with a remote server: local
//! speech recognition, a WebSocket link to the server and synthesised
//! playback of its replies, all serialised through the [`session`] state
//! machine.

pub mod app;
pub mod audio;
pub mod config;
pub mod connection;
pub mod playback;
pub mod recognition;
pub mod session;
pub mod stt;
