//! The session state machine.
//!
//! [`SessionStateMachine::handle`] is a synchronous function from
//! `(current state, event)` to `(next state, commands)`.  It never performs
//! I/O and never suspends; the dispatcher executes the returned commands
//! against the controllers after the transition has been applied.
//!
//! # Turn cycle
//!
//! ```text
//! Idle ─UserClick─▶ Connecting ─Connected─▶ Processing ─ServerMessage─▶ Speaking
//!                                  (greeting)   ▲                          │
//!                                               │ FinalTranscript          │ PlaybackFinished
//!                                               │                          │ / PlaybackError
//!                                          Listening ◀──(auto)── Ready ◀───┘
//! ```
//!
//! Every operation the machine starts gets a fresh id ([`ConnectionId`],
//! [`PassId`], [`PlaybackId`]).  Events carrying any other id are stale and
//! dropped before the transition table is consulted.

use crate::config::{ConversationConfig, ConversationIdPolicy, GreetingPolicy};
use crate::connection::{CloseInfo, ConnectionError, Endpoint, OutboundMessage, ServerMessage};
use crate::playback::PlaybackError;
use crate::recognition::RecognitionError;

use super::event::{ConnectionId, PassId, PlaybackId, SessionEvent};
use super::state::{Session, SessionState, SessionView, Transcript};

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Instructions for the controllers, produced by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect {
        connection: ConnectionId,
        endpoint: Endpoint,
    },
    Send {
        connection: ConnectionId,
        message: OutboundMessage,
    },
    CloseConnection,
    StartRecognition {
        pass: PassId,
    },
    StopRecognition,
    Speak {
        playback: PlaybackId,
        text: String,
    },
    CancelPlayback,
}

// ---------------------------------------------------------------------------
// ConversationPolicy
// ---------------------------------------------------------------------------

/// Greeting and conversation-id behaviour, taken from [`ConversationConfig`].
#[derive(Debug, Clone)]
pub struct ConversationPolicy {
    pub greeting: String,
    pub greeting_policy: GreetingPolicy,
    pub conversation_id_policy: ConversationIdPolicy,
}

impl From<&ConversationConfig> for ConversationPolicy {
    fn from(cfg: &ConversationConfig) -> Self {
        Self {
            greeting: cfg.greeting.clone(),
            greeting_policy: cfg.greeting_policy,
            conversation_id_policy: cfg.conversation_id_policy,
        }
    }
}

impl Default for ConversationPolicy {
    fn default() -> Self {
        Self::from(&ConversationConfig::default())
    }
}

// ---------------------------------------------------------------------------
// SessionStateMachine
// ---------------------------------------------------------------------------

/// Sole owner of the [`Session`] record and its [`SessionState`].
#[derive(Debug)]
pub struct SessionStateMachine {
    session: Session,
    policy: ConversationPolicy,
    state: SessionState,
    /// Recognition is unsupported; the session can never be started again.
    disabled: bool,
    running: bool,

    connection: Option<ConnectionId>,
    pass: Option<PassId>,
    playback: Option<PlaybackId>,

    connects: u64,
    passes: u64,
    playbacks: u64,
    greeted: bool,

    transcript: Option<Transcript>,
    response: Option<String>,
    error_message: Option<String>,
}

impl SessionStateMachine {
    pub fn new(session: Session, policy: ConversationPolicy) -> Self {
        Self {
            session,
            policy,
            state: SessionState::Idle,
            disabled: false,
            running: true,
            connection: None,
            pass: None,
            playback: None,
            connects: 0,
            passes: 0,
            playbacks: 0,
            greeted: false,
            transcript: None,
            response: None,
            error_message: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// `false` once `Shutdown` has been handled.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Snapshot for the UI.
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session.id(),
            conversation_id: self.session.conversation_id(),
            state: self.state,
            disabled: self.disabled,
            transcript: self.transcript.clone(),
            response: self.response.clone(),
            error_message: self.error_message.clone(),
        }
    }

    /// Apply one event and return the commands it produces, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Command> {
        match event {
            SessionEvent::UserClick => self.on_click(),

            SessionEvent::Connected { connection } => self.on_connected(connection),
            SessionEvent::ServerMessage {
                connection,
                message,
            } => self.on_server_message(connection, message),
            SessionEvent::ConnectionError { connection, error } => {
                self.on_connection_error(connection, error)
            }
            SessionEvent::Disconnected { connection, close } => {
                self.on_disconnected(connection, close)
            }

            SessionEvent::PartialTranscript { pass, text } => {
                self.on_partial(pass, text);
                Vec::new()
            }
            SessionEvent::FinalTranscript { pass, text } => self.on_final(pass, text),
            SessionEvent::RecognitionError { pass, error } => {
                self.on_recognition_error(pass, error)
            }
            SessionEvent::RecognitionEnded { pass } => self.on_recognition_ended(pass),

            SessionEvent::PlaybackStarted { playback } => {
                if is_current(self.playback, playback) {
                    log::info!("session: playback {playback} started");
                } else {
                    log::debug!("session: stale PlaybackStarted for {playback}");
                }
                Vec::new()
            }
            SessionEvent::PlaybackFinished { playback } => self.on_playback_done(playback, None),
            SessionEvent::PlaybackError { playback, error } => {
                self.on_playback_done(playback, Some(error))
            }

            SessionEvent::Shutdown => {
                log::info!("session: shutdown requested in {}", self.state);
                self.running = false;
                self.teardown(SessionState::Idle)
            }
        }
    }

    // -----------------------------------------------------------------------
    // User control
    // -----------------------------------------------------------------------

    fn on_click(&mut self) -> Vec<Command> {
        if self.disabled {
            log::debug!("session: click ignored, recognition unavailable");
            return Vec::new();
        }

        if self.state.is_busy() {
            log::debug!("session: click ignored while {}", self.state);
            Vec::new()
        } else if self.state.is_active() {
            log::info!("session: stopped by user");
            self.teardown(SessionState::Idle)
        } else {
            // Idle or Error.
            self.connect()
        }
    }

    fn connect(&mut self) -> Vec<Command> {
        self.connects += 1;
        if self.connects > 1 && self.policy.conversation_id_policy == ConversationIdPolicy::PerConnection {
            let id = self.session.advance_conversation();
            log::debug!("session: conversation advanced to {id}");
        }

        let connection = ConnectionId::from_raw(self.connects);
        self.connection = Some(connection);
        self.error_message = None;
        self.transcript = None;
        self.response = None;
        self.transition(SessionState::Connecting);

        vec![Command::Connect {
            connection,
            endpoint: Endpoint {
                session_id: self.session.id(),
                conversation_id: self.session.conversation_id(),
            },
        }]
    }

    // -----------------------------------------------------------------------
    // Connection events
    // -----------------------------------------------------------------------

    fn on_connected(&mut self, connection: ConnectionId) -> Vec<Command> {
        if !is_current(self.connection, connection) {
            log::debug!("session: stale Connected for {connection}");
            return Vec::new();
        }
        if self.state != SessionState::Connecting {
            log::warn!("session: Connected for {connection} while {}, dropped", self.state);
            return Vec::new();
        }

        log::info!("session: connected ({connection})");
        let greet = match self.policy.greeting_policy {
            GreetingPolicy::Always => true,
            GreetingPolicy::FirstConnection => !self.greeted,
            GreetingPolicy::Never => false,
        };

        if !greet {
            return self.enter_ready();
        }

        self.greeted = true;
        self.transition(SessionState::Ready);
        self.transition(SessionState::Processing);
        vec![Command::Send {
            connection,
            message: OutboundMessage::new(self.policy.greeting.clone()),
        }]
    }

    fn on_server_message(&mut self, connection: ConnectionId, message: ServerMessage) -> Vec<Command> {
        if !is_current(self.connection, connection) {
            log::debug!("session: stale ServerMessage for {connection}");
            return Vec::new();
        }
        if self.state != SessionState::Processing {
            log::warn!(
                "session: protocol error, server message while {}, dropped: {:?}",
                self.state,
                message.text
            );
            return Vec::new();
        }

        self.playbacks += 1;
        let playback = PlaybackId::from_raw(self.playbacks);
        self.playback = Some(playback);
        self.response = Some(message.text.clone());
        self.transition(SessionState::Speaking);

        vec![Command::Speak {
            playback,
            text: message.text,
        }]
    }

    fn on_connection_error(&mut self, connection: ConnectionId, error: ConnectionError) -> Vec<Command> {
        if !is_current(self.connection, connection) {
            log::debug!("session: stale ConnectionError for {connection}: {error}");
            return Vec::new();
        }
        match self.state {
            SessionState::Idle | SessionState::Error => {
                log::debug!("session: connection error while {}: {error}", self.state);
                Vec::new()
            }
            _ => {
                log::warn!("session: connection error while {}: {error}", self.state);
                self.error_message = Some(error.to_string());
                self.teardown(SessionState::Error)
            }
        }
    }

    fn on_disconnected(&mut self, connection: ConnectionId, close: CloseInfo) -> Vec<Command> {
        if !is_current(self.connection, connection) {
            log::debug!("session: stale Disconnected for {connection}");
            return Vec::new();
        }
        if matches!(self.state, SessionState::Idle | SessionState::Error) {
            self.connection = None;
            return Vec::new();
        }

        let target = if close.is_normal() && self.state != SessionState::Connecting {
            log::info!("session: server closed the connection ({connection})");
            SessionState::Idle
        } else {
            let error = ConnectionError::AbnormalClose {
                code: close.code,
                reason: close.reason,
            };
            log::warn!("session: {error}");
            self.error_message = Some(error.to_string());
            SessionState::Error
        };
        self.teardown(target)
    }

    // -----------------------------------------------------------------------
    // Recognition events
    // -----------------------------------------------------------------------

    fn on_partial(&mut self, pass: PassId, text: String) {
        if !is_current(self.pass, pass) || self.state != SessionState::Listening {
            log::debug!("session: late partial for {pass} dropped");
            return;
        }
        self.transcript = Some(Transcript::partial(text));
    }

    fn on_final(&mut self, pass: PassId, text: String) -> Vec<Command> {
        if !is_current(self.pass, pass) {
            log::debug!("session: stale FinalTranscript for {pass}");
            return Vec::new();
        }
        if self.state != SessionState::Listening {
            log::warn!(
                "session: protocol error, final transcript while {}, dropped",
                self.state
            );
            return Vec::new();
        }

        self.pass = None;
        if text.trim().is_empty() {
            log::debug!("session: blank final transcript, listening again");
            return self.enter_ready();
        }

        let Some(connection) = self.connection else {
            log::warn!("session: final transcript without a connection");
            return self.teardown(SessionState::Error);
        };

        self.transcript = Some(Transcript::final_text(text.clone()));
        self.transition(SessionState::Processing);
        vec![Command::Send {
            connection,
            message: OutboundMessage::new(text),
        }]
    }

    fn on_recognition_error(&mut self, pass: Option<PassId>, error: RecognitionError) -> Vec<Command> {
        if error.is_fatal() {
            log::error!("session: recognition unavailable: {error}");
            self.disabled = true;
            self.error_message = Some(error.to_string());
            return self.teardown(SessionState::Error);
        }

        let current = pass.is_some_and(|p| is_current(self.pass, p));
        if !current || self.state != SessionState::Listening {
            log::debug!("session: stale recognition error: {error}");
            return Vec::new();
        }

        log::warn!("session: recognition error, retrying listen: {error}");
        self.pass = None;
        self.enter_ready()
    }

    fn on_recognition_ended(&mut self, pass: PassId) -> Vec<Command> {
        if !is_current(self.pass, pass) {
            log::debug!("session: stale RecognitionEnded for {pass}");
            return Vec::new();
        }

        self.pass = None;
        if self.state == SessionState::Listening {
            log::debug!("session: interrupted listen ({pass}), listening again");
            return self.enter_ready();
        }
        Vec::new()
    }

    // -----------------------------------------------------------------------
    // Playback events
    // -----------------------------------------------------------------------

    fn on_playback_done(&mut self, playback: PlaybackId, error: Option<PlaybackError>) -> Vec<Command> {
        if !is_current(self.playback, playback) {
            log::debug!("session: stale playback terminal event for {playback}");
            return Vec::new();
        }

        self.playback = None;
        match error {
            None => log::info!("session: playback {playback} finished"),
            Some(e) => {
                log::warn!("session: playback {playback} failed: {e}");
                self.error_message = Some(e.to_string());
            }
        }

        if self.state != SessionState::Speaking {
            log::debug!("session: playback ended while {}", self.state);
            return Vec::new();
        }
        self.enter_ready()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Enter `Ready` and immediately start a new recognition pass.
    fn enter_ready(&mut self) -> Vec<Command> {
        self.transition(SessionState::Ready);

        self.passes += 1;
        let pass = PassId::from_raw(self.passes);
        self.pass = Some(pass);
        self.transition(SessionState::Listening);
        vec![Command::StartRecognition { pass }]
    }

    /// Stop everything and settle in `target`.
    fn teardown(&mut self, target: SessionState) -> Vec<Command> {
        self.connection = None;
        self.pass = None;
        self.playback = None;
        self.transition(target);
        vec![
            Command::CloseConnection,
            Command::StopRecognition,
            Command::CancelPlayback,
        ]
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::debug!("session: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

fn is_current<T: PartialEq>(current: Option<T>, id: T) -> bool {
    current.is_some_and(|c| c == id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ConversationId, SessionId};

    fn machine() -> SessionStateMachine {
        machine_with(ConversationPolicy::default())
    }

    fn machine_with(policy: ConversationPolicy) -> SessionStateMachine {
        SessionStateMachine::new(Session::with_id(SessionId::from_raw(1_700), 1), policy)
    }

    fn teardown_cmds() -> Vec<Command> {
        vec![
            Command::CloseConnection,
            Command::StopRecognition,
            Command::CancelPlayback,
        ]
    }

    fn connect_cmd(cmds: &[Command]) -> (ConnectionId, Endpoint) {
        match cmds {
            [Command::Connect {
                connection,
                endpoint,
            }] => (*connection, *endpoint),
            other => panic!("expected Connect, got {other:?}"),
        }
    }

    fn start_cmd(cmds: &[Command]) -> PassId {
        match cmds {
            [Command::StartRecognition { pass }] => *pass,
            other => panic!("expected StartRecognition, got {other:?}"),
        }
    }

    fn speak_cmd(cmds: &[Command]) -> PlaybackId {
        match cmds {
            [Command::Speak { playback, .. }] => *playback,
            other => panic!("expected Speak, got {other:?}"),
        }
    }

    fn sent_text(cmds: &[Command]) -> String {
        match cmds {
            [Command::Send { message, .. }] => message.text.clone(),
            other => panic!("expected Send, got {other:?}"),
        }
    }

    /// Drive a fresh machine up to `Listening` on the first turn and return
    /// the live ids.
    fn listening(m: &mut SessionStateMachine) -> (ConnectionId, PassId) {
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        m.handle(SessionEvent::Connected { connection: conn });
        let playback = speak_cmd(&m.handle(SessionEvent::ServerMessage {
            connection: conn,
            message: ServerMessage::new("Hola"),
        }));
        let pass = start_cmd(&m.handle(SessionEvent::PlaybackFinished { playback }));
        assert_eq!(m.state(), SessionState::Listening);
        (conn, pass)
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[test]
    fn happy_path_turn_cycle() {
        let mut m = machine();

        let cmds = m.handle(SessionEvent::UserClick);
        let (conn, endpoint) = connect_cmd(&cmds);
        assert_eq!(m.state(), SessionState::Connecting);
        assert_eq!(endpoint.session_id, SessionId::from_raw(1_700));
        assert_eq!(endpoint.conversation_id, ConversationId::from_raw(1));

        let cmds = m.handle(SessionEvent::Connected { connection: conn });
        assert_eq!(sent_text(&cmds), "Hola");
        assert_eq!(m.state(), SessionState::Processing);

        let cmds = m.handle(SessionEvent::ServerMessage {
            connection: conn,
            message: ServerMessage::new("Hola"),
        });
        assert_eq!(
            cmds,
            vec![Command::Speak {
                playback: PlaybackId::from_raw(1),
                text: "Hola".into()
            }]
        );
        assert_eq!(m.state(), SessionState::Speaking);
        assert_eq!(m.view().response.as_deref(), Some("Hola"));

        let cmds = m.handle(SessionEvent::PlaybackFinished {
            playback: PlaybackId::from_raw(1),
        });
        let pass = start_cmd(&cmds);
        assert_eq!(m.state(), SessionState::Listening);

        let cmds = m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "qué hora es".into(),
        });
        assert_eq!(
            cmds,
            vec![Command::Send {
                connection: conn,
                message: OutboundMessage::new("qué hora es"),
            }]
        );
        assert_eq!(m.state(), SessionState::Processing);
        assert_eq!(
            m.view().transcript,
            Some(Transcript::final_text("qué hora es"))
        );
    }

    #[test]
    fn connect_timeout_then_retry() {
        let mut m = machine();
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));

        let cmds = m.handle(SessionEvent::ConnectionError {
            connection: conn,
            error: ConnectionError::Timeout(5),
        });
        assert_eq!(cmds, teardown_cmds());
        assert_eq!(m.state(), SessionState::Error);
        assert!(m.view().error_message.is_some());

        // The manager's own Disconnected for the timed-out socket is stale.
        let cmds = m.handle(SessionEvent::Disconnected {
            connection: conn,
            close: CloseInfo::local(),
        });
        assert!(cmds.is_empty());
        assert_eq!(m.state(), SessionState::Error);

        let (retry, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        assert_ne!(retry, conn);
        assert_eq!(m.state(), SessionState::Connecting);
        assert!(m.view().error_message.is_none());
    }

    #[test]
    fn recognition_error_restarts_listening_without_sending() {
        let mut m = machine();
        let (_, pass) = listening(&mut m);

        let cmds = m.handle(SessionEvent::RecognitionError {
            pass: Some(pass),
            error: RecognitionError::NoSpeech,
        });
        let next = start_cmd(&cmds);
        assert_ne!(next, pass);
        assert_eq!(m.state(), SessionState::Listening);

        // The old pass's Ended signal no longer matters.
        assert!(m.handle(SessionEvent::RecognitionEnded { pass }).is_empty());
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn ended_without_final_is_interrupted_listen() {
        let mut m = machine();
        let (_, pass) = listening(&mut m);

        let cmds = m.handle(SessionEvent::RecognitionEnded { pass });
        let next = start_cmd(&cmds);
        assert_ne!(next, pass);
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn ended_after_final_is_ignored() {
        let mut m = machine();
        let (_, pass) = listening(&mut m);

        m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "hola".into(),
        });
        assert!(m.handle(SessionEvent::RecognitionEnded { pass }).is_empty());
        assert_eq!(m.state(), SessionState::Processing);
    }

    #[test]
    fn blank_final_listens_again() {
        let mut m = machine();
        let (_, pass) = listening(&mut m);

        let cmds = m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "   ".into(),
        });
        assert!(matches!(cmds.as_slice(), [Command::StartRecognition { .. }]));
        assert_eq!(m.state(), SessionState::Listening);
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    #[test]
    fn click_ignored_while_connecting_and_processing() {
        let mut m = machine();
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        assert!(m.handle(SessionEvent::UserClick).is_empty());
        assert_eq!(m.state(), SessionState::Connecting);

        m.handle(SessionEvent::Connected { connection: conn });
        assert_eq!(m.state(), SessionState::Processing);
        assert!(m.handle(SessionEvent::UserClick).is_empty());
        assert_eq!(m.state(), SessionState::Processing);
    }

    #[test]
    fn click_tears_down_from_every_active_state() {
        // Listening
        let mut m = machine();
        listening(&mut m);
        assert_eq!(m.handle(SessionEvent::UserClick), teardown_cmds());
        assert_eq!(m.state(), SessionState::Idle);

        // Speaking
        let mut m = machine();
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        m.handle(SessionEvent::Connected { connection: conn });
        m.handle(SessionEvent::ServerMessage {
            connection: conn,
            message: ServerMessage::new("Hola"),
        });
        assert_eq!(m.state(), SessionState::Speaking);
        assert_eq!(m.handle(SessionEvent::UserClick), teardown_cmds());
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn server_message_outside_processing_is_dropped() {
        let mut m = machine();
        let (conn, pass) = listening(&mut m);

        let cmds = m.handle(SessionEvent::ServerMessage {
            connection: conn,
            message: ServerMessage::new("¿sigues ahí?"),
        });
        assert!(cmds.is_empty());
        assert_eq!(m.state(), SessionState::Listening);

        // The live pass is untouched.
        let cmds = m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "sí".into(),
        });
        assert_eq!(sent_text(&cmds), "sí");
    }

    #[test]
    fn final_outside_listening_is_dropped() {
        let mut m = machine();
        let (_, pass) = listening(&mut m);
        m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "uno".into(),
        });
        assert_eq!(m.state(), SessionState::Processing);

        let cmds = m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "dos".into(),
        });
        assert!(cmds.is_empty());
        assert_eq!(m.state(), SessionState::Processing);
    }

    #[test]
    fn partials_update_transcript_until_final() {
        let mut m = machine();
        let (_, pass) = listening(&mut m);

        m.handle(SessionEvent::PartialTranscript {
            pass,
            text: "qué".into(),
        });
        assert_eq!(m.view().transcript, Some(Transcript::partial("qué")));
        m.handle(SessionEvent::PartialTranscript {
            pass,
            text: "qué hora".into(),
        });
        assert_eq!(m.view().transcript, Some(Transcript::partial("qué hora")));

        m.handle(SessionEvent::FinalTranscript {
            pass,
            text: "qué hora es".into(),
        });
        m.handle(SessionEvent::PartialTranscript {
            pass,
            text: "qué hora e".into(),
        });
        assert_eq!(
            m.view().transcript,
            Some(Transcript::final_text("qué hora es"))
        );
    }

    #[test]
    fn playback_error_returns_to_listening() {
        let mut m = machine();
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        m.handle(SessionEvent::Connected { connection: conn });
        let playback = speak_cmd(&m.handle(SessionEvent::ServerMessage {
            connection: conn,
            message: ServerMessage::new("Hola"),
        }));

        let cmds = m.handle(SessionEvent::PlaybackError {
            playback,
            error: PlaybackError::Synthesis("HTTP 401".into()),
        });
        start_cmd(&cmds);
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn cancelled_playback_terminal_event_is_stale() {
        let mut m = machine();
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        m.handle(SessionEvent::Connected { connection: conn });
        let playback = speak_cmd(&m.handle(SessionEvent::ServerMessage {
            connection: conn,
            message: ServerMessage::new("Hola"),
        }));
        m.handle(SessionEvent::UserClick);
        assert_eq!(m.state(), SessionState::Idle);

        assert!(m.handle(SessionEvent::PlaybackFinished { playback }).is_empty());
        assert_eq!(m.state(), SessionState::Idle);
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn normal_remote_close_goes_idle() {
        let mut m = machine();
        let (conn, _) = listening(&mut m);
        let cmds = m.handle(SessionEvent::Disconnected {
            connection: conn,
            close: CloseInfo::remote(Some(1000), "bye"),
        });
        assert_eq!(cmds, teardown_cmds());
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.view().error_message.is_none());
    }

    #[test]
    fn abnormal_remote_close_goes_error() {
        let mut m = machine();
        let (conn, _) = listening(&mut m);
        m.handle(SessionEvent::Disconnected {
            connection: conn,
            close: CloseInfo::remote(None, ""),
        });
        assert_eq!(m.state(), SessionState::Error);
        assert!(m
            .view()
            .error_message
            .is_some_and(|msg| msg.contains("abnormally")));
    }

    #[test]
    fn disconnect_of_previous_connection_is_stale() {
        let mut m = machine();
        let (old, _) = listening(&mut m);
        m.handle(SessionEvent::UserClick);
        let (new, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        assert_ne!(old, new);

        let cmds = m.handle(SessionEvent::Disconnected {
            connection: old,
            close: CloseInfo::local(),
        });
        assert!(cmds.is_empty());
        assert_eq!(m.state(), SessionState::Connecting);
    }

    #[test]
    fn connection_error_while_active_tears_down_to_error() {
        let mut m = machine();
        let (conn, _) = listening(&mut m);
        let cmds = m.handle(SessionEvent::ConnectionError {
            connection: conn,
            error: ConnectionError::Transport("reset".into()),
        });
        assert_eq!(cmds, teardown_cmds());
        assert_eq!(m.state(), SessionState::Error);
    }

    // -----------------------------------------------------------------------
    // Fatal recognition / shutdown
    // -----------------------------------------------------------------------

    #[test]
    fn unsupported_recognition_disables_session() {
        let mut m = machine();
        let cmds = m.handle(SessionEvent::RecognitionError {
            pass: None,
            error: RecognitionError::Unsupported("no model".into()),
        });
        assert_eq!(cmds, teardown_cmds());
        assert_eq!(m.state(), SessionState::Error);
        assert!(m.is_disabled());
        assert!(!m.view().control_enabled());

        assert!(m.handle(SessionEvent::UserClick).is_empty());
        assert_eq!(m.state(), SessionState::Error);
    }

    #[test]
    fn teardown_from_idle_is_harmless() {
        let mut m = machine();
        let cmds = m.handle(SessionEvent::Shutdown);
        assert_eq!(cmds, teardown_cmds());
        assert_eq!(m.state(), SessionState::Idle);
        assert!(!m.is_running());
    }

    // -----------------------------------------------------------------------
    // Policies
    // -----------------------------------------------------------------------

    #[test]
    fn first_connection_greeting_policy_skips_greeting_on_reconnect() {
        let mut m = machine_with(ConversationPolicy {
            greeting_policy: GreetingPolicy::FirstConnection,
            ..ConversationPolicy::default()
        });
        listening(&mut m);
        m.handle(SessionEvent::UserClick);

        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        let cmds = m.handle(SessionEvent::Connected { connection: conn });
        start_cmd(&cmds);
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn never_greet_goes_straight_to_listening() {
        let mut m = machine_with(ConversationPolicy {
            greeting_policy: GreetingPolicy::Never,
            ..ConversationPolicy::default()
        });
        let (conn, _) = connect_cmd(&m.handle(SessionEvent::UserClick));
        start_cmd(&m.handle(SessionEvent::Connected { connection: conn }));
    }

    #[test]
    fn conversation_id_policies() {
        let mut fixed = machine();
        connect_cmd(&fixed.handle(SessionEvent::UserClick));
        fixed.handle(SessionEvent::Shutdown);
        let (_, endpoint) = connect_cmd(&fixed.handle(SessionEvent::UserClick));
        assert_eq!(endpoint.conversation_id.get(), 1);

        let mut advancing = machine_with(ConversationPolicy {
            conversation_id_policy: ConversationIdPolicy::PerConnection,
            ..ConversationPolicy::default()
        });
        let (_, first) = connect_cmd(&advancing.handle(SessionEvent::UserClick));
        advancing.handle(SessionEvent::Shutdown);
        let (_, second) = connect_cmd(&advancing.handle(SessionEvent::UserClick));
        assert_eq!(first.conversation_id.get(), 1);
        assert_eq!(second.conversation_id.get(), 2);
        assert_eq!(first.session_id, second.session_id);
    }

    // -----------------------------------------------------------------------
    // Operation accounting
    // -----------------------------------------------------------------------

    /// Mirrors what the controllers would have outstanding.
    #[derive(Default)]
    struct Outstanding {
        connect: Option<ConnectionId>,
        pass: Option<PassId>,
        playback: Option<PlaybackId>,
        sends: usize,
        speaks: usize,
    }

    impl Outstanding {
        fn apply(&mut self, cmds: &[Command]) {
            for cmd in cmds {
                match cmd {
                    Command::Connect { connection, .. } => {
                        assert!(self.connect.is_none(), "connect while connect outstanding");
                        self.connect = Some(*connection);
                    }
                    Command::StartRecognition { pass } => {
                        assert!(self.pass.is_none(), "start while pass active");
                        self.pass = Some(*pass);
                    }
                    Command::Speak { playback, .. } => {
                        assert!(self.playback.is_none(), "speak while playback active");
                        self.playback = Some(*playback);
                        self.speaks += 1;
                    }
                    Command::Send { .. } => self.sends += 1,
                    Command::CloseConnection => self.connect = None,
                    Command::StopRecognition => self.pass = None,
                    Command::CancelPlayback => self.playback = None,
                }
            }
        }

        fn feed(&mut self, m: &mut SessionStateMachine, event: SessionEvent) {
            match &event {
                SessionEvent::Connected { .. } | SessionEvent::ConnectionError { .. } => {
                    self.connect = None
                }
                SessionEvent::FinalTranscript { pass, .. }
                | SessionEvent::RecognitionEnded { pass } => {
                    if self.pass == Some(*pass) {
                        self.pass = None;
                    }
                }
                SessionEvent::RecognitionError { pass: Some(pass), .. } => {
                    if self.pass == Some(*pass) {
                        self.pass = None;
                    }
                }
                SessionEvent::PlaybackFinished { playback }
                | SessionEvent::PlaybackError { playback, .. } => {
                    if self.playback == Some(*playback) {
                        self.playback = None;
                    }
                }
                _ => {}
            }
            let cmds = m.handle(event);
            self.apply(&cmds);
        }
    }

    #[test]
    fn many_turns_never_overlap_operations() {
        let mut m = machine();
        let mut ops = Outstanding::default();

        ops.feed(&mut m, SessionEvent::UserClick);
        let conn = ConnectionId::from_raw(1);
        ops.feed(&mut m, SessionEvent::Connected { connection: conn });
        assert_eq!(ops.sends, 1);

        for turn in 1..=5u64 {
            ops.feed(
                &mut m,
                SessionEvent::ServerMessage {
                    connection: conn,
                    message: ServerMessage::new(format!("respuesta {turn}")),
                },
            );
            assert_eq!(ops.speaks as u64, turn);
            let playback = PlaybackId::from_raw(turn);
            ops.feed(&mut m, SessionEvent::PlaybackStarted { playback });
            ops.feed(&mut m, SessionEvent::PlaybackFinished { playback });
            assert_eq!(m.state(), SessionState::Listening);

            // One interrupted listen per turn, then a real utterance.
            let pass = ops.pass.expect("pass started");
            ops.feed(&mut m, SessionEvent::RecognitionEnded { pass });
            let pass = ops.pass.expect("pass restarted");
            ops.feed(
                &mut m,
                SessionEvent::PartialTranscript {
                    pass,
                    text: "pregunta".into(),
                },
            );
            ops.feed(
                &mut m,
                SessionEvent::FinalTranscript {
                    pass,
                    text: format!("pregunta {turn}"),
                },
            );
            ops.feed(&mut m, SessionEvent::RecognitionEnded { pass });
            assert_eq!(ops.sends as u64, turn + 1);
            assert_eq!(m.state(), SessionState::Processing);
        }

        ops.feed(&mut m, SessionEvent::Shutdown);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(ops.connect.is_none() && ops.pass.is_none() && ops.playback.is_none());
    }
}
