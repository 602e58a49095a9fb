//! Fallback synthesizer: wraps a primary [`Synthesizer`] and asks a second
//! one when the primary fails.
//!
//! Used to keep the client speaking when the remote service has no API key
//! or cannot be reached.  When both fail, the primary's error is returned,
//! since that is the one the user configured.

use async_trait::async_trait;

use super::synthesis::{SynthesisError, Synthesizer};

pub struct FallbackSynthesizer<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Synthesizer, F: Synthesizer> FallbackSynthesizer<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: Synthesizer, F: Synthesizer> Synthesizer for FallbackSynthesizer<P, F> {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let primary_err = match self.primary.synthesize(text).await {
            Ok(audio) => return Ok(audio),
            Err(e) => e,
        };

        log::warn!("synthesis: {primary_err}; using local fallback");
        match self.fallback.synthesize(text).await {
            Ok(audio) => Ok(audio),
            Err(fallback_err) => {
                log::warn!("synthesis: local fallback failed too: {fallback_err}");
                Err(primary_err)
            }
        }
    }
}
