//! Application Configuration Module
//!
//! Loads settings from the environment (and a `.env` file when present) into a
//! single struct built once at startup.

use secrecy::SecretString;
use std::env;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    /// Empty when unset. The session reports it at connect time.
    pub gemini_api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub log_level: Level,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Secret key for the Gemini Live API.
    // *   `GEMINI_MODEL`: (Optional) The realtime model. Defaults to the native audio preview.
    // *   `GEMINI_BASE_URL`: (Optional) The websocket host. Defaults to Google's endpoint.
    // *   `AUDIO_INPUT_DEVICE` / `AUDIO_OUTPUT_DEVICE`: (Optional) Device names; defaults otherwise.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gemini_api_key = SecretString::from(lookup("GEMINI_API_KEY").unwrap_or_default());

        let model = lookup("GEMINI_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| gemini_realtime::DEFAULT_MODEL.to_string());
        let base_url = lookup("GEMINI_BASE_URL")
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| gemini_realtime::DEFAULT_BASE_URL.to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key,
            model,
            base_url,
            log_level,
            input_device: lookup("AUDIO_INPUT_DEVICE"),
            output_device: lookup("AUDIO_OUTPUT_DEVICE"),
        })
    }
}
