//! Energy-based utterance endpointing.
//!
//! Audio arrives as 16 kHz mono samples and is cut into 30 ms frames
//! (480 samples).  A frame whose RMS exceeds the threshold is speech.
//! The detector decides when a listening pass is over:
//!
//! * trailing silence after speech reaches `end_silence` → [`EndReason::SpeechEnded`]
//! * speech lasts `max_utterance` → [`EndReason::MaxDuration`]
//! * no speech at all within `no_speech_timeout` → [`EndReason::NoSpeech`]

use crate::config::RecognitionConfig;

/// 30 ms at 16 kHz.
pub const FRAME_SIZE: usize = 480;
const SAMPLES_PER_MS: u64 = 16;

fn ms_to_frames(ms: u64) -> usize {
    let samples = ms * SAMPLES_PER_MS;
    (samples.div_ceil(FRAME_SIZE as u64) as usize).max(1)
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSettings {
    pub rms_threshold: f32,
    pub end_silence_frames: usize,
    pub no_speech_frames: usize,
    pub max_frames: usize,
}

impl From<&RecognitionConfig> for EndpointSettings {
    fn from(cfg: &RecognitionConfig) -> Self {
        Self {
            rms_threshold: cfg.vad_threshold,
            end_silence_frames: ms_to_frames(cfg.end_silence_ms),
            no_speech_frames: ms_to_frames(cfg.no_speech_timeout_ms),
            max_frames: ms_to_frames(cfg.max_utterance_secs * 1_000),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self::from(&RecognitionConfig::default())
    }
}

// ---------------------------------------------------------------------------
// UtteranceDetector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    SpeechEnded,
    MaxDuration,
    NoSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceStatus {
    /// Nothing but silence so far.
    Waiting,
    /// Speech has started and the utterance is still open.
    Speaking,
    Ended(EndReason),
}

/// Accumulates one utterance and tracks where it starts and stops.
#[derive(Debug)]
pub struct UtteranceDetector {
    settings: EndpointSettings,
    audio: Vec<f32>,
    frames: usize,
    first_speech: Option<usize>,
    last_speech: usize,
    trailing_silence: usize,
    status: UtteranceStatus,
}

impl UtteranceDetector {
    pub fn new(settings: EndpointSettings) -> Self {
        Self {
            settings,
            audio: Vec::new(),
            frames: 0,
            first_speech: None,
            last_speech: 0,
            trailing_silence: 0,
            status: UtteranceStatus::Waiting,
        }
    }

    pub fn status(&self) -> UtteranceStatus {
        self.status
    }

    pub fn has_speech(&self) -> bool {
        self.first_speech.is_some()
    }

    /// Feed 16 kHz mono samples.  Audio pushed after the utterance ended is
    /// ignored.
    pub fn push(&mut self, samples: &[f32]) -> UtteranceStatus {
        if matches!(self.status, UtteranceStatus::Ended(_)) {
            return self.status;
        }

        self.audio.extend_from_slice(samples);
        while (self.frames + 1) * FRAME_SIZE <= self.audio.len() {
            let start = self.frames * FRAME_SIZE;
            let voiced = rms(&self.audio[start..start + FRAME_SIZE]) > self.settings.rms_threshold;
            self.classify(voiced);
            self.frames += 1;
            if matches!(self.status, UtteranceStatus::Ended(_)) {
                break;
            }
        }
        self.status
    }

    fn classify(&mut self, voiced: bool) {
        let frame = self.frames;
        if voiced {
            self.first_speech.get_or_insert(frame);
            self.last_speech = frame;
            self.trailing_silence = 0;
            self.status = UtteranceStatus::Speaking;
        } else if self.first_speech.is_some() {
            self.trailing_silence += 1;
            if self.trailing_silence >= self.settings.end_silence_frames {
                self.status = UtteranceStatus::Ended(EndReason::SpeechEnded);
                return;
            }
        } else if frame + 1 >= self.settings.no_speech_frames {
            self.status = UtteranceStatus::Ended(EndReason::NoSpeech);
            return;
        }

        if let Some(first) = self.first_speech {
            if frame + 1 - first >= self.settings.max_frames {
                self.status = UtteranceStatus::Ended(EndReason::MaxDuration);
            }
        }
    }

    /// The speech portion so far, padded by one frame on each side.
    /// Empty when no speech has been detected.
    pub fn utterance(&self) -> &[f32] {
        let Some(first) = self.first_speech else {
            return &[];
        };
        let start = first.saturating_sub(1) * FRAME_SIZE;
        let end = ((self.last_speech + 2) * FRAME_SIZE).min(self.audio.len());
        &self.audio[start..end]
    }
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
