//! Events flowing into the session loop, and the channel that carries them.
//!
//! Controllers never touch session state.  Each asynchronous notification
//! (socket opened, hypothesis recognised, audio finished, ...) becomes one
//! immutable [`SessionEvent`] pushed through an [`EventSender`]; the
//! dispatcher drains the matching [`EventReceiver`] one event at a time.
//!
//! Every event tied to an operation carries the identifier the state
//! machine assigned when it started that operation, so events belonging to
//! an operation that has since been torn down can be recognised as stale.

use std::fmt;

use tokio::sync::mpsc;

use crate::connection::{CloseInfo, ConnectionError, ServerMessage};
use crate::playback::PlaybackError;
use crate::recognition::RecognitionError;

// ---------------------------------------------------------------------------
// Operation identifiers
// ---------------------------------------------------------------------------

macro_rules! operation_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

operation_id!(
    /// One socket instance.
    ConnectionId,
    "conn"
);
operation_id!(
    /// One recognition pass.
    PassId,
    "pass"
);
operation_id!(
    /// One `speak` request.
    PlaybackId,
    "playback"
);

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Everything that can happen to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session control was clicked.
    UserClick,

    /// The socket finished its opening handshake.
    Connected { connection: ConnectionId },
    /// A complete text frame arrived from the server.
    ServerMessage {
        connection: ConnectionId,
        message: ServerMessage,
    },
    ConnectionError {
        connection: ConnectionId,
        error: ConnectionError,
    },
    /// The socket is gone.  Emitted exactly once per connection instance.
    Disconnected {
        connection: ConnectionId,
        close: CloseInfo,
    },

    /// Intermediate hypothesis; may still change.
    PartialTranscript { pass: PassId, text: String },
    /// The one hypothesis of the pass that will not change.
    FinalTranscript { pass: PassId, text: String },
    /// `pass` is `None` when the recogniser reports a failure before any
    /// pass was started (unsupported at initialisation).
    RecognitionError {
        pass: Option<PassId>,
        error: RecognitionError,
    },
    /// The pass released the microphone.  Always the last event of a pass.
    RecognitionEnded { pass: PassId },

    PlaybackStarted { playback: PlaybackId },
    PlaybackFinished { playback: PlaybackId },
    PlaybackError {
        playback: PlaybackId,
        error: PlaybackError,
    },

    /// The application is closing.
    Shutdown,
}

impl SessionEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::UserClick => "UserClick",
            SessionEvent::Connected { .. } => "Connected",
            SessionEvent::ServerMessage { .. } => "ServerMessage",
            SessionEvent::ConnectionError { .. } => "ConnectionError",
            SessionEvent::Disconnected { .. } => "Disconnected",
            SessionEvent::PartialTranscript { .. } => "PartialTranscript",
            SessionEvent::FinalTranscript { .. } => "FinalTranscript",
            SessionEvent::RecognitionError { .. } => "RecognitionError",
            SessionEvent::RecognitionEnded { .. } => "RecognitionEnded",
            SessionEvent::PlaybackStarted { .. } => "PlaybackStarted",
            SessionEvent::PlaybackFinished { .. } => "PlaybackFinished",
            SessionEvent::PlaybackError { .. } => "PlaybackError",
            SessionEvent::Shutdown => "Shutdown",
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Receiving end, owned by the dispatcher.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Cloneable sending end handed to every controller and to the UI.
///
/// `emit` never blocks, so it is safe from tokio tasks, blocking threads
/// and the cpal audio callback alike.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            log::debug!("event channel closed, dropping {}", event.name());
        }
    }
}

/// Create the serialized event queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
