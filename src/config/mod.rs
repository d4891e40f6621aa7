// Configuration management module
// TOML-backed settings plus the interactive editor

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    API_KEY_ENV, AssistantConfig, Config, ConfigError, LlmConfig, OcrConfig, OllamaConfig,
    RetrievalConfig, ServerConfig, SessionBackend, SessionConfig, StorageConfig,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
