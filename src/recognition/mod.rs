//! Local speech recognition for the listening phase.
//!
//! A *pass* records one utterance: it opens the microphone, endpoints the
//! audio with [`UtteranceDetector`], emits interim hypotheses while the user
//! speaks, transcribes the final utterance once, and always finishes with
//! `RecognitionEnded`.

pub mod controller;
pub mod endpoint;

use thiserror::Error;

use crate::session::PassId;

pub use controller::RecognitionController;
pub use endpoint::{EndReason, EndpointSettings, UtteranceDetector, UtteranceStatus};

/// Failures surfaced by the recogniser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// Recognition cannot run in this environment at all.
    #[error("speech recognition is not available: {0}")]
    Unsupported(String),

    #[error("no speech detected")]
    NoSpeech,

    #[error("microphone error: {0}")]
    Capture(String),

    #[error("recognition engine error: {0}")]
    Engine(String),
}

impl RecognitionError {
    /// Fatal errors disable the session permanently.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RecognitionError::Unsupported(_))
    }
}

/// The recogniser operations the session issues.
pub trait SpeechRecognizer: Send {
    /// `Err(Unsupported)` when recognition can never run here.
    fn availability(&self) -> Result<(), RecognitionError>;

    /// Begin pass `pass`.  Any previous pass is stopped and fully finished
    /// before the new one opens the microphone.
    fn start(&mut self, pass: PassId);

    /// Ask the current pass to end.  Idempotent.
    fn stop(&mut self);
}
