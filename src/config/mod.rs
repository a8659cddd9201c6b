//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, VoiceError};
use paths::get_data_dir;

/// Default live model. Matches what the shell's settings panel offers.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice name.
pub const DEFAULT_VOICE: &str = "Kore";

/// Default live endpoint (BidiGenerateContent over WebSocket).
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Top-level live_config.json shape (written by the shell's settings panel).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub input_device: Option<String>,
}

impl LiveConfig {
    /// Model name with the default applied.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Voice name with the default applied.
    pub fn voice(&self) -> &str {
        self.voice.as_deref().unwrap_or(DEFAULT_VOICE)
    }

    /// WebSocket endpoint with the default applied.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    /// Resolve the API key: `GEMINI_API_KEY` env overrides the config file.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(|k| k.to_string())
            .ok_or_else(|| {
                VoiceError::Config(
                    "no API key: set GEMINI_API_KEY or apiKey in live_config.json".to_string(),
                )
            })
    }
}

/// Read live_config.json from the data directory.
pub fn read_live_config() -> LiveConfig {
    read_live_config_from(&get_config_path())
}

/// Read a live config from an explicit path (missing/garbled file → defaults).
pub fn read_live_config_from(path: &Path) -> LiveConfig {
    read_json_file(path).unwrap_or_default()
}

/// Path to live_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("live_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
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
    fn test_config_defaults() {
        let cfg = LiveConfig::default();
        assert_eq!(cfg.model(), DEFAULT_MODEL);
        assert_eq!(cfg.voice(), "Kore");
        assert!(cfg.endpoint().starts_with("wss://"));
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live_config.json");
        std::fs::write(
            &path,
            r#"{"apiKey": "k-123", "voice": "Puck", "inputDevice": "USB Mic"}"#,
        )
        .unwrap();

        let cfg = read_live_config_from(&path);
        assert_eq!(cfg.api_key.as_deref(), Some("k-123"));
        assert_eq!(cfg.voice(), "Puck");
        assert_eq!(cfg.model(), DEFAULT_MODEL);
        assert_eq!(cfg.input_device.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn test_read_config_missing_or_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_live_config_from(&dir.path().join("nope.json"));
        assert!(missing.api_key.is_none());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json {").unwrap();
        let bad = read_live_config_from(&path);
        assert!(bad.api_key.is_none());
        assert_eq!(bad.model(), DEFAULT_MODEL);
    }
}
