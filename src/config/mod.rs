//! Configuration module for the voice client.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each
//! controller, `AppPaths` for cross-platform directories, and TOML
//! persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, ConversationConfig, ConversationIdPolicy, GreetingPolicy, RecognitionConfig,
    ServerConfig, SynthesisConfig, UiConfig,
};
