//! Configuration reading and data directory paths.

pub mod paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// Default bidi endpoint of the examiner agent backend.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default REST base for one-shot calls (cue-card generation).
pub const DEFAULT_REST_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
const DEFAULT_CUE_CARD_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_VOICE_NAME: &str = "Zephyr";

/// Top-level examiner_config.json shape (written by the UI settings panel).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// API key for the agent backend. Falls back to `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    pub live_model: String,
    pub cue_card_model: String,
    pub voice_name: String,
    pub live_endpoint: String,
    pub rest_endpoint: String,
    /// Named input device; `None` uses the system default microphone.
    pub input_device: Option<String>,
    /// Named output device; `None` uses the system default speakers.
    pub output_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            cue_card_model: DEFAULT_CUE_CARD_MODEL.to_string(),
            voice_name: DEFAULT_VOICE_NAME.to_string(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            rest_endpoint: DEFAULT_REST_ENDPOINT.to_string(),
            input_device: None,
            output_device: None,
        }
    }
}

impl Config {
    /// Read examiner_config.json from the data directory, falling back to
    /// defaults, then fill the API key from the environment if the file
    /// did not provide one.
    pub fn load() -> Self {
        let mut config: Config = read_json_file(&get_config_path()).unwrap_or_default();
        if config.api_key.is_none() {
            config.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        config
    }
}

/// Path to examiner_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("examiner_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.voice_name, "Zephyr");
        assert!(config.live_endpoint.starts_with("wss://"));
        assert!(config.rest_endpoint.starts_with("https://"));
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"apiKey": "k-123", "voiceName": "Kore"}"#).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.voice_name, "Kore");
        assert_eq!(config.live_model, DEFAULT_LIVE_MODEL);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let config: Config = serde_json::from_str(r#"{"theme": "dark"}"#).unwrap();
        assert_eq!(config.cue_card_model, DEFAULT_CUE_CARD_MODEL);
    }
}
