//! Local speech-to-text.
//!
//! ```text
//! RecognitionController ──(16 kHz mono f32)──▶ Arc<dyn SttEngine>
//!                                                  │
//!                                                  └─ WhisperEngine (whisper-rs, GGML model)
//! ```

pub mod engine;

pub use engine::{
    SttEngine, SttError, WhisperEngine, WhisperParams, MAX_AUDIO_SAMPLES, MIN_AUDIO_SAMPLES,
};

#[cfg(test)]
pub use engine::MockSttEngine;
