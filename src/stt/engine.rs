//! Speech-to-text engine used by the recognition controller.
//!
//! [`SttEngine`] is object-safe and `Send + Sync`, so a single loaded model
//! is shared by every recognition pass behind an `Arc<dyn SttEngine>`.
//! [`WhisperEngine`] wraps a `whisper_rs::WhisperContext`; a fresh
//! `WhisperState` is created per call, which is what allows interim and
//! final transcriptions to run from the pass thread without locking.

use std::path::Path;

use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::RecognitionConfig;

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SttError {
    #[error("recognition model missing at {0}")]
    ModelNotFound(String),

    #[error("could not initialise recogniser: {0}")]
    ContextInit(String),

    #[error("recogniser failed: {0}")]
    Transcription(String),

    #[error("utterance shorter than 0.5 s")]
    AudioTooShort,

    #[error("utterance longer than 60 s")]
    AudioTooLong,
}

// ---------------------------------------------------------------------------
// SttEngine trait
// ---------------------------------------------------------------------------

/// Transcribes one utterance.
///
/// `audio` is 16 kHz mono f32 PCM between [`MIN_AUDIO_SAMPLES`] and
/// [`MAX_AUDIO_SAMPLES`] long; anything outside that range is rejected with
/// `AudioTooShort` / `AudioTooLong`.
pub trait SttEngine: Send + Sync {
    fn transcribe(&self, audio: &[f32]) -> Result<String, SttError>;
}

/// 0.5 s at 16 kHz.
pub const MIN_AUDIO_SAMPLES: usize = 8_000;
/// 60 s at 16 kHz.
pub const MAX_AUDIO_SAMPLES: usize = 960_000;

fn check_length(audio: &[f32]) -> Result<(), SttError> {
    if audio.len() < MIN_AUDIO_SAMPLES {
        return Err(SttError::AudioTooShort);
    }
    if audio.len() > MAX_AUDIO_SAMPLES {
        return Err(SttError::AudioTooLong);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WhisperEngine
// ---------------------------------------------------------------------------

/// Inference settings for [`WhisperEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperParams {
    /// ISO-639-1 code, or `"auto"` for detection.
    pub language: String,
    pub n_threads: i32,
}

impl Default for WhisperParams {
    fn default() -> Self {
        Self {
            language: "es".into(),
            n_threads: optimal_threads(),
        }
    }
}

impl From<&RecognitionConfig> for WhisperParams {
    fn from(cfg: &RecognitionConfig) -> Self {
        Self {
            language: cfg.language.clone(),
            ..Self::default()
        }
    }
}

/// Physical threads available, capped at 8.
pub(crate) fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

pub struct WhisperEngine {
    ctx: WhisperContext,
    params: WhisperParams,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs; the model
// weights are read-only after loading.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    /// Load a GGML model.  Fails with `ModelNotFound` before touching
    /// whisper-rs when the file is absent.
    pub fn load(model_path: impl AsRef<Path>, params: WhisperParams) -> Result<Self, SttError> {
        let path = model_path.as_ref();
        let missing = || SttError::ModelNotFound(path.display().to_string());
        if !path.is_file() {
            return Err(missing());
        }
        let utf8 = path.to_str().ok_or_else(missing)?;

        let ctx = WhisperContext::new_with_params(utf8, WhisperContextParameters::default())
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        log::info!(
            "stt: loaded {} (language {}, {} threads)",
            path.display(),
            params.language,
            params.n_threads
        );
        Ok(Self { ctx, params })
    }
}

impl SttEngine for WhisperEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<String, SttError> {
        check_length(audio)?;

        let mut fp = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        let lang = (self.params.language != "auto").then_some(self.params.language.as_str());
        fp.set_language(lang);
        fp.set_n_threads(self.params.n_threads);
        fp.set_print_progress(false);
        fp.set_print_realtime(false);
        fp.set_single_segment(true);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        let started = std::time::Instant::now();
        state
            .full(fp, audio)
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let text = (0..n_segments)
            .map(|i| state.full_get_segment_text(i))
            .collect::<Result<String, _>>()
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        log::debug!(
            "stt: {} samples transcribed in {} ms",
            audio.len(),
            started.elapsed().as_millis()
        );
        Ok(text.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// MockSttEngine  (test-only)
// ---------------------------------------------------------------------------

/// Returns a pre-configured response without loading a model.
///
/// Responses are handed out in order; the last one repeats.
#[cfg(test)]
pub struct MockSttEngine {
    responses: std::sync::Mutex<Vec<Result<String, SttError>>>,
}

#[cfg(test)]
impl MockSttEngine {
    pub fn ok(text: impl Into<String>) -> Self {
        Self::sequence(vec![Ok(text.into())])
    }

    pub fn err(error: SttError) -> Self {
        Self::sequence(vec![Err(error)])
    }

    pub fn sequence(responses: Vec<Result<String, SttError>>) -> Self {
        assert!(!responses.is_empty());
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[cfg(test)]
impl SttEngine for MockSttEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<String, SttError> {
        check_length(audio)?;
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses[0].clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_ok_returns_configured_text() {
        let engine = MockSttEngine::ok("buenos días");
        let audio = vec![0.0f32; MIN_AUDIO_SAMPLES];
        assert_eq!(engine.transcribe(&audio).unwrap(), "buenos días");
    }

    #[test]
    fn mock_sequence_repeats_last() {
        let engine = MockSttEngine::sequence(vec![Ok("uno".into()), Ok("dos".into())]);
        let audio = vec![0.0f32; MIN_AUDIO_SAMPLES];
        assert_eq!(engine.transcribe(&audio).unwrap(), "uno");
        assert_eq!(engine.transcribe(&audio).unwrap(), "dos");
        assert_eq!(engine.transcribe(&audio).unwrap(), "dos");
    }

    #[test]
    fn length_bounds_are_enforced() {
        let engine = MockSttEngine::ok("text");
        assert_eq!(
            engine.transcribe(&vec![0.0; MIN_AUDIO_SAMPLES - 1]),
            Err(SttError::AudioTooShort)
        );
        assert_eq!(
            engine.transcribe(&vec![0.0; MAX_AUDIO_SAMPLES + 1]),
            Err(SttError::AudioTooLong)
        );
        assert!(engine.transcribe(&vec![0.0; MAX_AUDIO_SAMPLES]).is_ok());
    }

    #[test]
    fn missing_model_is_reported_with_its_path() {
        match WhisperEngine::load("/nonexistent/ggml-small.bin", WhisperParams::default()) {
            Err(SttError::ModelNotFound(path)) => assert!(path.ends_with("ggml-small.bin")),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn params_follow_recognition_language() {
        let cfg = RecognitionConfig {
            language: "en".into(),
            ..RecognitionConfig::default()
        };
        let params = WhisperParams::from(&cfg);
        assert_eq!(params.language, "en");
        assert!(params.n_threads >= 1 && params.n_threads <= 8);
    }

    #[test]
    fn engine_is_shareable_as_trait_object() {
        let engine: std::sync::Arc<dyn SttEngine> = std::sync::Arc::new(MockSttEngine::ok("sí"));
        let worker = std::sync::Arc::clone(&engine);
        let text = std::thread::spawn(move || worker.transcribe(&[0.0; MIN_AUDIO_SAMPLES]))
            .join()
            .unwrap();
        assert_eq!(text.as_deref(), Ok("sí"));
    }
}
