//! Remote text-to-speech.
//!
//! [`ElevenLabsSynthesizer`] posts the text to
//! `{base_url}/v1/text-to-speech/{voice_id}` and returns the MP3 body.
//! Connection details come from [`SynthesisConfig`]; the API key may also
//! come from `ELEVENLABS_API_KEY`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::SynthesisConfig;

// ---------------------------------------------------------------------------
// SynthesisError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no synthesis API key configured (set ELEVENLABS_API_KEY)")]
    MissingApiKey,

    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis request timed out")]
    Timeout,

    #[error("synthesis service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("synthesis service returned no audio")]
    EmptyAudio,

    #[error("local synthesizer failed: {0}")]
    Local(String),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesizer trait
// ---------------------------------------------------------------------------

/// Turns text into encoded (MP3) audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

// ---------------------------------------------------------------------------
// ElevenLabsSynthesizer
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
    api_key: Option<String>,
}

impl ElevenLabsSynthesizer {
    /// The client carries the per-request timeout from `timeout_secs`.
    /// A missing key is only reported when a request is attempted.
    pub fn from_config(config: &SynthesisConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let api_key = config.resolved_api_key();
        if api_key.is_none() {
            log::warn!("synthesis: no API key configured, responses will not be spoken");
        }

        Self {
            client,
            config: config.clone(),
            api_key,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let key = self.api_key.as_deref().ok_or(SynthesisError::MissingApiKey)?;

        let body = SpeechRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        log::debug!("synthesis: requesting {} chars", text.chars().count());
        let response = self
            .client
            .post(self.url())
            .header("xi-api-key", key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        log::debug!("synthesis: received {} bytes", audio.len());
        Ok(audio.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
