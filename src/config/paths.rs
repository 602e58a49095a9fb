//! Where the client keeps its settings and recognition models.
//!
//! | | settings.toml | models/ |
//! |---|---|---|
//! | Windows | `%APPDATA%\voice-client\` | `%LOCALAPPDATA%\voice-client\models\` |
//! | macOS | `~/Library/Application Support/voice-client/` | same root, `models/` |
//! | Linux | `~/.config/voice-client/` | `~/.local/share/voice-client/models/` |
//!
//! Setting `VOICE_CLIENT_HOME` puts both under that one directory.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "voice-client";
const HOME_ENV: &str = "VOICE_CLIENT_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `config_dir/settings.toml`.
    pub settings_file: PathBuf,
    /// GGML Whisper models, one `<name>.bin` per model.
    pub models_dir: PathBuf,
}

impl AppPaths {
    /// Platform directories, or `VOICE_CLIENT_HOME` when set.  A platform
    /// without a standard location falls back to the working directory.
    pub fn new() -> Self {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Self::rooted_at(Path::new(&home));
        }

        let platform = |dir: Option<PathBuf>| dir.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR);
        Self::from_dirs(
            platform(dirs::config_dir()),
            platform(dirs::data_local_dir()).join("models"),
        )
    }

    /// Settings and models under a single root.
    pub fn rooted_at(root: &Path) -> Self {
        Self::from_dirs(root.to_path_buf(), root.join("models"))
    }

    fn from_dirs(config_dir: PathBuf, models_dir: PathBuf) -> Self {
        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir,
        }
    }

    pub fn model_file(&self, model: &str) -> PathBuf {
        self.models_dir.join(format!("{model}.bin"))
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
