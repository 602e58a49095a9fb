//! Recognition pass lifecycle.
//!
//! Each pass runs on its own OS thread because both cpal capture and
//! Whisper inference are blocking.  The thread owns the capture stream for
//! the whole pass and reports back only through the event channel:
//!
//! ```text
//! start(pass) ─▶ thread ─▶ [join previous pass] ─▶ open mic
//!                   loop: chunk ─▶ to_mono_16k ─▶ UtteranceDetector
//!                           Speaking ─(every interim interval)─▶ PartialTranscript
//!                   end:  SpeechEnded / MaxDuration ─▶ close mic ─▶ FinalTranscript
//!                         NoSpeech                   ─▶ RecognitionError(NoSpeech)
//!                         stop()                     ─▶ (nothing)
//!                   always ─▶ RecognitionEnded
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::{to_mono_16k, AudioSource};
use crate::config::RecognitionConfig;
use crate::session::{EventSender, PassId, SessionEvent};
use crate::stt::{SttEngine, MAX_AUDIO_SAMPLES, MIN_AUDIO_SAMPLES};

use super::endpoint::{EndReason, EndpointSettings, UtteranceDetector, UtteranceStatus};
use super::{RecognitionError, SpeechRecognizer};

/// How long the pass loop waits for audio before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct PassSettings {
    endpoint: EndpointSettings,
    /// `None` disables interim hypotheses.
    interim: Option<Duration>,
}

impl From<&RecognitionConfig> for PassSettings {
    fn from(cfg: &RecognitionConfig) -> Self {
        Self {
            endpoint: EndpointSettings::from(cfg),
            interim: cfg
                .interim_results
                .then(|| Duration::from_millis(cfg.interim_interval_ms)),
        }
    }
}

#[derive(Clone)]
struct Backend {
    engine: Arc<dyn SttEngine>,
    source: Arc<dyn AudioSource>,
}

struct ActivePass {
    id: PassId,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// RecognitionController
// ---------------------------------------------------------------------------

pub struct RecognitionController {
    backend: Result<Backend, String>,
    settings: PassSettings,
    events: EventSender,
    active: Option<ActivePass>,
}

impl RecognitionController {
    pub fn new(
        engine: Arc<dyn SttEngine>,
        source: Arc<dyn AudioSource>,
        config: &RecognitionConfig,
        events: EventSender,
    ) -> Self {
        Self {
            backend: Ok(Backend { engine, source }),
            settings: PassSettings::from(config),
            events,
            active: None,
        }
    }

    /// A controller that reports `Unsupported` for every request.
    pub fn unsupported(reason: impl Into<String>, events: EventSender) -> Self {
        Self {
            backend: Err(reason.into()),
            settings: PassSettings::from(&RecognitionConfig::default()),
            events,
            active: None,
        }
    }
}

impl SpeechRecognizer for RecognitionController {
    fn availability(&self) -> Result<(), RecognitionError> {
        match &self.backend {
            Ok(_) => Ok(()),
            Err(reason) => Err(RecognitionError::Unsupported(reason.clone())),
        }
    }

    fn start(&mut self, pass: PassId) {
        let backend = match &self.backend {
            Ok(backend) => backend.clone(),
            Err(reason) => {
                self.events.emit(SessionEvent::RecognitionError {
                    pass: Some(pass),
                    error: RecognitionError::Unsupported(reason.clone()),
                });
                self.events.emit(SessionEvent::RecognitionEnded { pass });
                return;
            }
        };

        let previous = self.active.take().map(|prev| {
            if !prev.thread.is_finished() {
                log::debug!("recognition: {} still running, stopping before {pass}", prev.id);
            }
            prev.stop.store(true, Ordering::SeqCst);
            prev.thread
        });

        let stop = Arc::new(AtomicBool::new(false));
        let worker = PassWorker {
            pass,
            backend,
            settings: self.settings.clone(),
            events: self.events.clone(),
            stop: Arc::clone(&stop),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("recognition-{}", pass.get()))
            .spawn(move || {
                if let Some(previous) = previous {
                    let _ = previous.join();
                }
                worker.run();
            });

        match spawned {
            Ok(thread) => {
                log::debug!("recognition: {pass} started");
                self.active = Some(ActivePass {
                    id: pass,
                    stop,
                    thread,
                });
            }
            Err(e) => {
                log::error!("recognition: failed to spawn pass thread: {e}");
                self.events.emit(SessionEvent::RecognitionError {
                    pass: Some(pass),
                    error: RecognitionError::Engine(e.to_string()),
                });
                self.events.emit(SessionEvent::RecognitionEnded { pass });
            }
        }
    }

    fn stop(&mut self) {
        if let Some(active) = &self.active {
            if !active.stop.swap(true, Ordering::SeqCst) {
                log::debug!("recognition: stop requested for {}", active.id);
            }
        }
    }
}

impl Drop for RecognitionController {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// PassWorker
// ---------------------------------------------------------------------------

enum PassOutcome {
    Stopped,
    Endpoint(EndReason),
    SourceClosed,
}

struct PassWorker {
    pass: PassId,
    backend: Backend,
    settings: PassSettings,
    events: EventSender,
    stop: Arc<AtomicBool>,
}

impl PassWorker {
    fn run(self) {
        if !self.stop.load(Ordering::SeqCst) {
            self.listen();
        }
        self.events
            .emit(SessionEvent::RecognitionEnded { pass: self.pass });
    }

    fn listen(&self) {
        let pass = self.pass;
        let (tx, rx) = mpsc::channel();
        let stream = match self.backend.source.start(tx) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("recognition: {pass} could not open the microphone: {e}");
                self.emit_error(RecognitionError::Capture(e.to_string()));
                return;
            }
        };

        let mut detector = UtteranceDetector::new(self.settings.endpoint.clone());
        let mut last_interim = Instant::now();
        let mut last_partial = String::new();

        let outcome = loop {
            if self.stop.load(Ordering::SeqCst) {
                break PassOutcome::Stopped;
            }
            let chunk = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break PassOutcome::SourceClosed,
            };

            match detector.push(&to_mono_16k(&chunk)) {
                UtteranceStatus::Ended(reason) => break PassOutcome::Endpoint(reason),
                UtteranceStatus::Speaking => {
                    let due = self
                        .settings
                        .interim
                        .is_some_and(|every| last_interim.elapsed() >= every);
                    if due {
                        last_interim = Instant::now();
                        self.interim(detector.utterance(), &mut last_partial);
                    }
                }
                UtteranceStatus::Waiting => {}
            }
        };

        // Release the microphone before the final inference.
        drop(stream);

        match outcome {
            PassOutcome::Stopped => log::debug!("recognition: {pass} stopped"),
            PassOutcome::Endpoint(EndReason::NoSpeech) => {
                log::debug!("recognition: {pass} heard nothing");
                self.emit_error(RecognitionError::NoSpeech);
            }
            PassOutcome::SourceClosed if !detector.has_speech() => {
                self.emit_error(RecognitionError::Capture("audio stream closed".into()));
            }
            PassOutcome::Endpoint(_) | PassOutcome::SourceClosed => {
                self.finish(detector.utterance());
            }
        }
    }

    fn interim(&self, utterance: &[f32], last_partial: &mut String) {
        match self.backend.engine.transcribe(&fit_length(utterance)) {
            Ok(text) if !text.is_empty() && text != *last_partial => {
                last_partial.clone_from(&text);
                self.events.emit(SessionEvent::PartialTranscript {
                    pass: self.pass,
                    text,
                });
            }
            Ok(_) => {}
            Err(e) => log::debug!("recognition: interim transcription skipped: {e}"),
        }
    }

    fn finish(&self, utterance: &[f32]) {
        let result = self.backend.engine.transcribe(&fit_length(utterance));
        if self.stop.load(Ordering::SeqCst) {
            log::debug!("recognition: {} stopped during final transcription", self.pass);
            return;
        }
        match result {
            Ok(text) if text.trim().is_empty() => {
                log::debug!("recognition: {} produced no text", self.pass);
            }
            Ok(text) => {
                log::info!("recognition: {} final: {text:?}", self.pass);
                self.events.emit(SessionEvent::FinalTranscript {
                    pass: self.pass,
                    text,
                });
            }
            Err(e) => {
                log::warn!("recognition: {} transcription failed: {e}", self.pass);
                self.emit_error(RecognitionError::Engine(e.to_string()));
            }
        }
    }

    fn emit_error(&self, error: RecognitionError) {
        self.events.emit(SessionEvent::RecognitionError {
            pass: Some(self.pass),
            error,
        });
    }
}

/// Pad short utterances with silence and cut overlong ones so they fit the
/// engine's accepted range.
fn fit_length(audio: &[f32]) -> Vec<f32> {
    let mut out = audio[..audio.len().min(MAX_AUDIO_SAMPLES)].to_vec();
    if out.len() < MIN_AUDIO_SAMPLES {
        out.resize(MIN_AUDIO_SAMPLES, 0.0);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
