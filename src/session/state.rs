//! Session data model and the read-only view the UI renders.
//!
//! [`SessionState`] is the single authoritative phase of the conversation.
//! It is owned by the [`SessionStateMachine`](super::SessionStateMachine);
//! everything else only ever sees a [`SessionView`] snapshot published
//! through [`SharedView`] after each dispatched event.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque session identifier, created once per process start.
///
/// Rendered as the millisecond timestamp of creation, which is what the
/// conversation server expects in the socket path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// A fresh identifier derived from the wall clock.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one logical exchange with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(u64);

impl ConversationId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The session record.  `id` is fixed at construction; only the state
/// machine holds a `Session` and only it may advance the conversation id.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    conversation_id: ConversationId,
}

impl Session {
    /// New session with a clock-derived id.
    pub fn new(initial_conversation_id: u64) -> Self {
        Self::with_id(SessionId::generate(), initial_conversation_id)
    }

    pub fn with_id(id: SessionId, initial_conversation_id: u64) -> Self {
        Self {
            id,
            conversation_id: ConversationId::from_raw(initial_conversation_id),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub(crate) fn advance_conversation(&mut self) -> ConversationId {
        self.conversation_id = self.conversation_id.next();
        self.conversation_id
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Phases of the conversational turn cycle.
///
/// ```text
/// Idle ──click──▶ Connecting ──connected──▶ Processing (greeting sent)
///                     │                         │ server message
///                     └─error/timeout─▶ Error   ▼
///        Listening ◀── Ready ◀──playback done── Speaking
///            │ final transcript
///            └──────────────────────────────▶ Processing
/// any active state ──click──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No connection; the control offers to connect.
    #[default]
    Idle,
    /// Socket open requested, waiting for the server.
    Connecting,
    /// Transient: between turns, immediately followed by `Listening`.
    Ready,
    /// A recognition pass is capturing the user's utterance.
    Listening,
    /// A frame was sent; waiting for the server's reply.
    Processing,
    /// The reply is being synthesised and played.
    Speaking,
    /// The last attempt failed; clicking retries the connection.
    Error,
}

impl SessionState {
    /// States in which a click tears the session down.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Listening | SessionState::Speaking
        )
    }

    /// States with an in-flight operation that cannot be cancelled by the
    /// user.  The control is disabled while in them.
    ///
    /// ```
    /// use voice_client::session::SessionState;
    ///
    /// assert!(SessionState::Connecting.is_busy());
    /// assert!(SessionState::Processing.is_busy());
    /// assert!(!SessionState::Listening.is_busy());
    /// assert!(!SessionState::Idle.is_busy());
    /// ```
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Processing)
    }

    /// Text shown on the session control.
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "Conectar",
            SessionState::Connecting => "Conectando...",
            SessionState::Ready => "Hablar",
            SessionState::Listening => "Detener",
            SessionState::Processing => "Procesando...",
            SessionState::Speaking => "Hablando...",
            SessionState::Error => "Reintentar",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Latest recognition hypothesis.  Overwritten by every partial result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

impl Transcript {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionView / SharedView
// ---------------------------------------------------------------------------

/// Snapshot of everything the UI needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session_id: SessionId,
    pub conversation_id: ConversationId,
    pub state: SessionState,
    /// Recognition is unavailable; the control stays disabled for good.
    pub disabled: bool,
    pub transcript: Option<Transcript>,
    /// Last text received from the server.
    pub response: Option<String>,
    /// Human-readable reason for the last failure.
    pub error_message: Option<String>,
}

impl SessionView {
    /// Whether the session control accepts a click right now.
    pub fn control_enabled(&self) -> bool {
        !self.disabled && !self.state.is_busy()
    }

    /// Text shown on the session control.
    pub fn control_label(&self) -> &'static str {
        if self.disabled {
            "No disponible"
        } else {
            self.state.label()
        }
    }
}

/// Thread-safe handle to the latest [`SessionView`].
///
/// Written by the dispatcher after every event, read by the egui update
/// loop.  Lock for a short critical section; never across `.await`.
pub type SharedView = Arc<Mutex<SessionView>>;

pub fn new_shared_view(initial: SessionView) -> SharedView {
    Arc::new(Mutex::new(initial))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
