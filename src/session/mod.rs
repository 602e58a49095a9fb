//! Session orchestration: data model, events, the state machine and the
//! dispatcher loop that feeds it.
//!
//! ```text
//!  ConnectionManager ─┐
//!  RecognitionCtrl  ──┼─ SessionEvent ─▶ EventDispatcher ─▶ SessionStateMachine
//!  PlaybackCtrl     ──┤        ▲                 │                 │
//!  UI (click)       ──┘        │                 ◀── Vec<Command> ─┘
//!                              │                 │
//!                              └── controllers ◀─┘  (connect/send/close,
//!                                                    start/stop, speak/cancel)
//! ```

pub mod dispatcher;
pub mod event;
pub mod machine;
pub mod state;

pub use dispatcher::{Controllers, EventDispatcher};
pub use event::{
    event_channel, ConnectionId, EventReceiver, EventSender, PassId, PlaybackId, SessionEvent,
};
pub use machine::{Command, ConversationPolicy, SessionStateMachine};
pub use state::{
    new_shared_view, ConversationId, Session, SessionId, SessionState, SessionView, SharedView,
    Transcript,
};
