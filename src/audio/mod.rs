//! Audio devices: microphone capture, format conversion and speaker output.
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (std mpsc) → to_mono_16k → recogniser
//! MP3 bytes  → decode_mp3 → resample(device rate) → cpal output stream
//! ```

pub mod capture;
pub mod convert;
pub mod output;

pub use capture::{AudioChunk, AudioSource, CaptureError, MicrophoneSource, StreamHandle};
pub use convert::{downmix, resample, to_mono_16k, TARGET_SAMPLE_RATE};
pub use output::{decode_mp3, AudioSink, CpalSink, DecodedAudio, OutputError};
