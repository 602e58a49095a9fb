//! Microphone capture via `cpal`.
//!
//! [`AudioSource`] is the seam the recognition controller records through.
//! [`MicrophoneSource`] resolves the configured input device each time a
//! pass starts and streams [`AudioChunk`]s over a std mpsc channel until
//! the returned [`StreamHandle`] is dropped.

use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One buffer as delivered by the cpal callback.  Samples are interleaved
/// `f32` in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the capture stream alive.  Dropping it stops the
/// hardware stream.
pub struct StreamHandle {
    _stream: Option<cpal::Stream>,
}

impl StreamHandle {
    /// A handle with no hardware behind it, for sources that push audio from
    /// elsewhere (tests, files).
    pub fn detached() -> Self {
        Self { _stream: None }
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// AudioSource
// ---------------------------------------------------------------------------

/// Something that can record into a channel.
///
/// `start` is called on the recognition pass thread; the handle never
/// leaves that thread, so it need not be `Send`.
pub trait AudioSource: Send + Sync {
    fn start(&self, tx: mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError>;
}

// ---------------------------------------------------------------------------
// MicrophoneSource
// ---------------------------------------------------------------------------

/// cpal input device, by name or the system default.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneSource {
    device_name: Option<String>,
}

impl MicrophoneSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// Check that the device exists and reports a usable configuration.
    pub fn check_device(&self) -> Result<(), CaptureError> {
        let device = self.device()?;
        let supported = device.default_input_config()?;
        log::info!(
            "audio: input {} @ {} Hz, {} ch",
            device.name().unwrap_or_else(|_| "<unnamed>".into()),
            supported.sample_rate().0,
            supported.channels()
        );
        Ok(())
    }

    fn device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_input_device().ok_or(CaptureError::NoDevice),
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().is_ok_and(|name| &name == wanted))
                .ok_or_else(|| CaptureError::DeviceNotFound(wanted.clone())),
        }
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&self, tx: mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
        let device = self.device()?;
        let supported = device.default_input_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config: cpal::StreamConfig = supported.into();

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // The receiver is gone once the pass ends.
                let _ = tx.send(AudioChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                });
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(StreamHandle {
            _stream: Some(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
