//! TOML configuration file loading
//!
//! Supports `~/.config/voice-agent/config.toml` as a persistent config source.
//! All fields are optional. The file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceAgentConfigFile {
    /// Agent backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Capture and turn-taking configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Session continuity configuration
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the agent backend (e.g. "http://localhost:8000")
    pub url: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Capture and turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// TTS voice selector sent with every turn (e.g. "en-US-natalie")
    pub voice_id: Option<String>,

    /// Re-arm recording after the spoken response finishes
    pub auto_record: Option<bool>,

    /// Quiet interval before auto-record re-arms, in milliseconds
    pub auto_record_delay_ms: Option<u64>,

    /// Recording is stopped automatically after this many seconds (0 disables)
    pub max_recording_secs: Option<u64>,
}

/// Session continuity configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Page URL whose `session_id` query parameter carries the session token
    pub page_url: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceAgentConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceAgentConfigFile {
    config_file_path().map_or_else(VoiceAgentConfigFile::default, |path| {
        load_config_file_from(&path)
    })
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults.
pub fn load_config_file_from(path: &Path) -> VoiceAgentConfigFile {
    if !path.exists() {
        return VoiceAgentConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceAgentConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceAgentConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-agent/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-agent").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let parsed: VoiceAgentConfigFile = toml::from_str(
            r#"
            [voice]
            auto_record = true
            "#,
        )
        .unwrap();

        assert_eq!(parsed.voice.auto_record, Some(true));
        assert!(parsed.backend.url.is_none());
        assert!(parsed.session.page_url.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [backend]
            url = "http://agent.local:8000"

            [session]
            page_url = "http://agent.local:8000/?lang=en"
            "#,
        )
        .unwrap();

        let parsed = load_config_file_from(&path);
        assert_eq!(parsed.backend.url.as_deref(), Some("http://agent.local:8000"));
        assert_eq!(
            parsed.session.page_url.as_deref(),
            Some("http://agent.local:8000/?lang=en")
        );
    }

    #[test]
    fn test_malformed_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[voice\nauto_record = ").unwrap();

        let parsed = load_config_file_from(&path);
        assert!(parsed.voice.auto_record.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let parsed = load_config_file_from(Path::new("/nonexistent/voice-agent/config.toml"));
        assert!(parsed.voice.voice_id.is_none());
    }
}
