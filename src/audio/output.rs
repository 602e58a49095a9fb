//! Speaker output: clip decoding (MP3 via `minimp3`, WAV via `hound`) and a
//! cancellable cpal sink.
//!
//! [`AudioSink::play`] blocks the calling thread until the clip has been
//! played, the cancel flag is raised, or the device fails.  Run it on a
//! blocking thread, never on the async runtime.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::convert::{downmix, resample};

/// How often the play loop checks for completion or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Grace period after the last sample so the device buffer drains.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("MP3 decode error: {0}")]
    Decode(String),

    #[error("no output device available")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("output stream failed: {0}")]
    Stream(String),

    #[error("output device stopped consuming audio")]
    Stalled,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Mono PCM ready for output.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Decode an MP3 stream into mono `f32` samples.
///
/// Multi-channel frames are averaged.  An empty input decodes to an empty
/// clip; garbage input is a [`OutputError::Decode`].
pub fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, OutputError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    chunk.iter().map(|&s| f32::from(s) / 32_768.0).sum::<f32>()
                        / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(OutputError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() && !bytes.is_empty() {
        return Err(OutputError::Decode("no audio frames found".into()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode a RIFF/WAV clip into mono `f32` samples.
///
/// Streamed WAV headers (`espeak-ng --stdout`) overstate the data length, so
/// a read error after at least one sample ends the clip instead of failing.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, OutputError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| OutputError::Decode(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => read_until_truncated(reader.into_samples::<f32>())?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << spec.bits_per_sample.saturating_sub(1).min(31)) as f32;
            read_until_truncated(reader.into_samples::<i32>().map(|s| s.map(|v| v as f32 / scale)))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

fn read_until_truncated(
    samples: impl Iterator<Item = hound::Result<f32>>,
) -> Result<Vec<f32>, OutputError> {
    let mut out = Vec::new();
    for sample in samples {
        match sample {
            Ok(v) => out.push(v),
            Err(e) if out.is_empty() => return Err(OutputError::Decode(e.to_string())),
            Err(_) => break,
        }
    }
    Ok(out)
}

/// Decode whatever a synthesizer returned: WAV when the bytes carry a RIFF
/// header, MP3 otherwise.
pub fn decode_clip(bytes: &[u8]) -> Result<DecodedAudio, OutputError> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

// ---------------------------------------------------------------------------
// AudioSink
// ---------------------------------------------------------------------------

/// Blocking audio output.
pub trait AudioSink: Send + Sync {
    /// Play an encoded clip (MP3 or WAV).  Returns `Ok(())` on completion
    /// and also when `cancel` was raised part-way through.
    fn play(&self, clip: &[u8], cancel: &AtomicBool) -> Result<(), OutputError>;
}

/// Default output device via cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalSink;

impl CpalSink {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSink for CpalSink {
    fn play(&self, encoded: &[u8], cancel: &AtomicBool) -> Result<(), OutputError> {
        let clip = decode_clip(encoded)?;
        if clip.samples.is_empty() || cancel.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;
        let supported = device.default_output_config()?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.into();

        let samples = Arc::new(resample(&clip.samples, clip.sample_rate, device_rate));
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            let failure = Arc::clone(&failure);
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.iter_mut().for_each(|out| *out = sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::SeqCst);
                    }
                },
                move |err| {
                    log::error!("cpal output stream error: {err}");
                    failure
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert_with(|| err.to_string());
                },
                None,
            )?
        };
        stream.play()?;

        let deadline = Instant::now() + clip.duration() + Duration::from_secs(1);
        match await_output(&finished, &failure, cancel, deadline)? {
            OutputEnd::Cancelled => {
                log::debug!("audio: playback cancelled");
            }
            OutputEnd::Finished => {
                std::thread::sleep(DRAIN_GRACE);
                log::debug!("audio: played {} samples @ {device_rate} Hz", samples.len());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputEnd {
    Finished,
    Cancelled,
}

/// Block until the stream has consumed every sample, `cancel` is raised,
/// the stream reports an error, or `deadline` passes.
///
/// A stream error wins over completion: a clip that ended because the
/// device died did not play.
fn await_output(
    finished: &AtomicBool,
    failure: &Mutex<Option<String>>,
    cancel: &AtomicBool,
    deadline: Instant,
) -> Result<OutputEnd, OutputError> {
    loop {
        if let Some(error) = failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(OutputError::Stream(error));
        }
        if finished.load(Ordering::SeqCst) {
            return Ok(OutputEnd::Finished);
        }
        if cancel.load(Ordering::SeqCst) {
            return Ok(OutputEnd::Cancelled);
        }
        if Instant::now() > deadline {
            log::warn!("audio: output stalled, giving up");
            return Err(OutputError::Stalled);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
