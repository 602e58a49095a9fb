//! The serialized event loop.
//!
//! [`EventDispatcher::run`] drains the event queue strictly one event at a
//! time: apply it to the state machine, execute the resulting commands
//! against the controllers in order, publish the new view.  Controllers
//! react to commands by starting asynchronous work and report back only by
//! emitting further events, which queue behind the current one.

use std::sync::PoisonError;

use crate::connection::ConversationLink;
use crate::playback::SpeechPlayer;
use crate::recognition::SpeechRecognizer;

use super::event::{EventReceiver, SessionEvent};
use super::machine::{Command, SessionStateMachine};
use super::state::SharedView;

/// The three controllers the session drives.
pub struct Controllers {
    pub link: Box<dyn ConversationLink>,
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub player: Box<dyn SpeechPlayer>,
}

pub struct EventDispatcher {
    machine: SessionStateMachine,
    controllers: Controllers,
    view: SharedView,
}

impl EventDispatcher {
    pub fn new(machine: SessionStateMachine, controllers: Controllers, view: SharedView) -> Self {
        Self {
            machine,
            controllers,
            view,
        }
    }

    /// Run until `Shutdown` has been handled.
    ///
    /// Before the first event, the recogniser is asked whether it can run at
    /// all; an unsupported recogniser disables the session up front.
    pub async fn run(mut self, mut events: EventReceiver) {
        log::info!(
            "dispatcher: session {} started",
            self.machine.session().id()
        );
        self.publish();

        if let Err(error) = self.controllers.recognizer.availability() {
            self.dispatch(SessionEvent::RecognitionError { pass: None, error });
        }

        while let Some(event) = events.recv().await {
            self.dispatch(event);
            if !self.machine.is_running() {
                break;
            }
        }

        log::info!("dispatcher: stopped in {}", self.machine.state());
    }

    /// Handle one event to completion.
    pub fn dispatch(&mut self, event: SessionEvent) {
        log::trace!("dispatcher: {}", event.name());
        let commands = self.machine.handle(event);
        for command in commands {
            self.execute(command);
        }
        self.publish();
    }

    fn execute(&mut self, command: Command) {
        let Controllers {
            link,
            recognizer,
            player,
        } = &mut self.controllers;

        match command {
            Command::Connect {
                connection,
                endpoint,
            } => link.connect(connection, endpoint),
            Command::Send {
                connection,
                message,
            } => link.send(connection, message),
            Command::CloseConnection => link.close(),
            Command::StartRecognition { pass } => recognizer.start(pass),
            Command::StopRecognition => recognizer.stop(),
            Command::Speak { playback, text } => player.speak(playback, text),
            Command::CancelPlayback => player.cancel(),
        }
    }

    fn publish(&self) {
        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        *view = self.machine.view();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
