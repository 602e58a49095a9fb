//! Offline speech through a local command-line synthesizer.
//!
//! The default program is `espeak-ng`, which writes a WAV clip to stdout
//! with `--stdout`.  The child is killed if the request is dropped, so a
//! cancelled playback does not leave a synthesizer running.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SynthesisConfig;

use super::synthesis::{SynthesisError, Synthesizer};

pub struct EspeakSynthesizer {
    program: String,
    voice: String,
    timeout: Duration,
}

impl EspeakSynthesizer {
    pub fn new(program: impl Into<String>, voice: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            voice: voice.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(
            config.local_command.clone(),
            config.local_voice.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Synthesizer for EspeakSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let child = Command::new(&self.program)
            .args(["-v", self.voice.as_str(), "--stdout", text])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthesisError::Local(format!("{}: {e}", self.program)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SynthesisError::Timeout)?
            .map_err(|e| SynthesisError::Local(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SynthesisError::Local(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        log::debug!(
            "synthesis: {} produced {} bytes locally",
            self.program,
            output.stdout.len()
        );
        Ok(output.stdout)
    }
}
