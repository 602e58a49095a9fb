//! Speaking server responses: remote synthesis plus local playback.

pub mod controller;
pub mod fallback;
pub mod local;
pub mod synthesis;

use std::sync::Arc;

use thiserror::Error;

use crate::audio::OutputError;
use crate::config::SynthesisConfig;
use crate::session::PlaybackId;

pub use controller::PlaybackController;
pub use fallback::FallbackSynthesizer;
pub use local::EspeakSynthesizer;
pub use synthesis::{ElevenLabsSynthesizer, SynthesisError, Synthesizer};

/// Why a `speak` request failed.  Carried inside session events, so it
/// holds rendered messages rather than the source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("audio output failed: {0}")]
    Output(String),
}

impl From<SynthesisError> for PlaybackError {
    fn from(e: SynthesisError) -> Self {
        PlaybackError::Synthesis(e.to_string())
    }
}

impl From<OutputError> for PlaybackError {
    fn from(e: OutputError) -> Self {
        PlaybackError::Output(e.to_string())
    }
}

/// The synthesizer configured by `synthesis`: the remote service, backed by
/// the local one when `local_fallback` is set.
pub fn synthesizer_from_config(config: &SynthesisConfig) -> Arc<dyn Synthesizer> {
    let remote = ElevenLabsSynthesizer::from_config(config);
    if config.local_fallback {
        Arc::new(FallbackSynthesizer::new(
            remote,
            EspeakSynthesizer::from_config(config),
        ))
    } else {
        Arc::new(remote)
    }
}

/// The playback operations the session issues.
pub trait SpeechPlayer: Send {
    /// Synthesize and play `text`.  Exactly one `PlaybackFinished` or
    /// `PlaybackError` follows unless the request is cancelled first.
    /// An outstanding request is cancelled before the new one starts.
    fn speak(&mut self, playback: PlaybackId, text: String);

    /// Stop output and drop any in-flight synthesis.  Idempotent.
    fn cancel(&mut self);
}
