//! `settings.toml`: one section per controller plus the window.
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! changes.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the conversational backend lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP of the conversation server.
    pub host: String,
    /// TCP port of the conversation server.
    pub port: u16,
    /// Seconds to wait for the socket to open before giving up.
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8001,
            connect_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Socket address for one session / conversation pair.
    ///
    /// ```
    /// use voice_client::config::ServerConfig;
    ///
    /// let cfg = ServerConfig::default();
    /// assert_eq!(cfg.endpoint_url(1700000000000, 1), "ws://localhost:8001/ws/1700000000000/1");
    /// ```
    pub fn endpoint_url(&self, session_id: u64, conversation_id: u64) -> String {
        format!(
            "ws://{}:{}/ws/{}/{}",
            self.host, self.port, session_id, conversation_id
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ConversationConfig
// ---------------------------------------------------------------------------

/// When the initial greeting frame is sent after the socket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreetingPolicy {
    /// Every successful connect sends the greeting.
    Always,
    /// Only the first successful connect of the session sends it; later
    /// reconnects go straight to listening.
    FirstConnection,
    /// Never greet; the first frame is the user's first utterance.
    Never,
}

impl Default for GreetingPolicy {
    fn default() -> Self {
        Self::Always
    }
}

/// How the conversation identifier in the socket address evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationIdPolicy {
    /// The identifier chosen at startup is reused for every connect.
    Fixed,
    /// Every connect after the first uses the next identifier.
    PerConnection,
}

impl Default for ConversationIdPolicy {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Conversation-level behaviour of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Text of the greeting frame sent right after connecting.
    pub greeting: String,
    pub greeting_policy: GreetingPolicy,
    pub conversation_id_policy: ConversationIdPolicy,
    /// Conversation identifier used for the first connect.
    pub initial_conversation_id: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            greeting: "Hola".into(),
            greeting_policy: GreetingPolicy::default(),
            conversation_id_policy: ConversationIdPolicy::default(),
            initial_conversation_id: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// RecognitionConfig
// ---------------------------------------------------------------------------

/// Settings for the local speech recogniser (Whisper + endpointing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Spoken language as an ISO-639-1 code, or `"auto"`.
    pub language: String,
    /// GGML model file stem inside the models directory.
    pub model: String,
    /// Input device name; `None` means the system default.
    pub audio_device: Option<String>,
    /// Emit a partial transcript for intermediate hypotheses.
    pub interim_results: bool,
    /// Minimum milliseconds between two interim hypotheses.
    pub interim_interval_ms: u64,
    /// RMS level above which a 30 ms frame counts as speech.
    pub vad_threshold: f32,
    /// Trailing silence that ends an utterance.
    pub end_silence_ms: u64,
    /// Give up when nobody speaks for this long.
    pub no_speech_timeout_ms: u64,
    /// Hard cap on a single utterance.
    pub max_utterance_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "es".into(),
            model: "ggml-small".into(),
            audio_device: None,
            interim_results: true,
            interim_interval_ms: 1_000,
            vad_threshold: 0.01,
            end_silence_ms: 800,
            no_speech_timeout_ms: 8_000,
            max_utterance_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// SynthesisConfig
// ---------------------------------------------------------------------------

/// Settings for the remote text-to-speech service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Base URL of the synthesis API (no trailing slash).
    pub base_url: String,
    /// API key sent as `xi-api-key`.  `ELEVENLABS_API_KEY` in the
    /// environment overrides this value.
    pub api_key: Option<String>,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    /// Maximum seconds to wait for the audio response.
    pub timeout_secs: u64,
    /// Speak through a local synthesizer when the service is unavailable
    /// (no API key, network or service failure).
    pub local_fallback: bool,
    /// Local synthesizer program, invoked as
    /// `<local_command> -v <local_voice> --stdout <text>` and expected to
    /// write a WAV clip to stdout.
    pub local_command: String,
    pub local_voice: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".into(),
            api_key: None,
            voice_id: "lLvK2ms6OhuRjFMnSQ9a".into(),
            model_id: "eleven_turbo_v2".into(),
            stability: 0.5,
            similarity_boost: 0.5,
            timeout_secs: 15,
            local_fallback: true,
            local_command: "espeak-ng".into(),
            local_voice: "es".into(),
        }
    }
}

impl SynthesisConfig {
    /// The API key to use: environment first, then the settings file.
    /// Empty strings count as missing.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("ELEVENLABS_API_KEY")
            .ok()
            .or_else(|| self.api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// egui window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Last saved window position `(x, y)` in screen pixels.
    pub window_position: Option<(f32, f32)>,
    pub always_on_top: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_position: None,
            always_on_top: false,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use voice_client::config::AppConfig;
///
/// let config = AppConfig::load().unwrap_or_default();
/// println!("{}", config.server.endpoint_url(1, 1));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub conversation: ConversationConfig,
    pub recognition: RecognitionConfig,
    pub synthesis: SynthesisConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Read `settings.toml` from the platform config directory.  A missing
    /// file is not an error: first runs start from the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Creates missing parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");

        assert_eq!(config.server.port, 8001);
        assert_eq!(config.recognition.language, "es");
        assert_eq!(config.conversation.greeting, "Hola");
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.host, "localhost");
        assert_eq!(cfg.server.connect_timeout_secs, 5);
        assert_eq!(cfg.conversation.greeting_policy, GreetingPolicy::Always);
        assert_eq!(
            cfg.conversation.conversation_id_policy,
            ConversationIdPolicy::Fixed
        );
        assert_eq!(cfg.conversation.initial_conversation_id, 1);
        assert!(cfg.recognition.interim_results);
        assert_eq!(cfg.synthesis.model_id, "eleven_turbo_v2");
        assert!((cfg.synthesis.stability - 0.5).abs() < f32::EPSILON);
        assert!((cfg.synthesis.similarity_boost - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn endpoint_url_has_session_and_conversation() {
        let cfg = ServerConfig {
            host: "10.0.0.7".into(),
            port: 9000,
            connect_timeout_secs: 1,
        };
        assert_eq!(cfg.endpoint_url(42, 7), "ws://10.0.0.7:9000/ws/42/7");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("settings.toml");

        let mut cfg = AppConfig::default();
        cfg.server.port = 9100;
        cfg.conversation.greeting_policy = GreetingPolicy::FirstConnection;
        cfg.conversation.conversation_id_policy = ConversationIdPolicy::PerConnection;
        cfg.recognition.language = "en".into();
        cfg.synthesis.api_key = Some("xi-test".into());
        cfg.ui.window_position = Some((100.0, 200.0));

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.server.port, 9100);
        assert_eq!(
            loaded.conversation.greeting_policy,
            GreetingPolicy::FirstConnection
        );
        assert_eq!(
            loaded.conversation.conversation_id_policy,
            ConversationIdPolicy::PerConnection
        );
        assert_eq!(loaded.recognition.language, "en");
        assert_eq!(loaded.synthesis.api_key.as_deref(), Some("xi-test"));
        assert_eq!(loaded.ui.window_position, Some((100.0, 200.0)));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[server]\nhost = \"voz.local\"\n").expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.server.host, "voz.local");
        assert_eq!(cfg.server.port, 8001);
        assert_eq!(cfg.conversation.greeting, "Hola");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "server = 12").expect("write");

        assert!(AppConfig::load_from(&path).is_err());
    }
}
