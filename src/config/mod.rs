//! Configuration management for the voice agent client

pub mod file;

use std::time::Duration;

use url::Url;

use crate::{Error, Result};
use file::VoiceAgentConfigFile;

/// Default agent backend location
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Default TTS voice selector
pub const DEFAULT_VOICE_ID: &str = "en-US-natalie";

/// Quiet interval between the end of playback and auto-record re-arming
pub const DEFAULT_AUTO_RECORD_DELAY: Duration = Duration::from_millis(1500);

const DEFAULT_MAX_RECORDING_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Voice agent client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent backend base URL
    pub backend_url: Url,

    /// Per-request timeout for backend calls
    pub request_timeout: Duration,

    /// Voice and turn-taking configuration
    pub voice: VoiceConfig,

    /// Page URL carrying the `session_id` query parameter
    pub page_url: Url,
}

/// Voice and turn-taking configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// TTS voice selector sent with every turn
    pub voice_id: String,

    /// Re-arm recording after playback ends
    pub auto_record: bool,

    /// Quiet interval before auto-record re-arms
    pub auto_record_delay: Duration,

    /// Implicit stop after this long; `None` records until stopped
    pub max_recording: Option<Duration>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: DEFAULT_VOICE_ID.to_string(),
            auto_record: false,
            auto_record_delay: DEFAULT_AUTO_RECORD_DELAY,
            max_recording: Some(Duration::from_secs(DEFAULT_MAX_RECORDING_SECS)),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the TOML config file
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns error if a URL setting cannot be parsed
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a URL setting cannot be parsed
    pub fn from_sources(
        fc: VoiceAgentConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let backend_url = env("VOICE_AGENT_BACKEND_URL")
            .or(fc.backend.url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let backend_url = Url::parse(&backend_url)
            .map_err(|e| Error::Config(format!("invalid backend url {backend_url:?}: {e}")))?;

        let request_timeout = env("VOICE_AGENT_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .or(fc.backend.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let voice = VoiceConfig {
            voice_id: env("VOICE_AGENT_VOICE_ID")
                .or(fc.voice.voice_id)
                .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            auto_record: env("VOICE_AGENT_AUTO_RECORD")
                .map(|v| parse_flag(&v))
                .or(fc.voice.auto_record)
                .unwrap_or(false),
            auto_record_delay: env("VOICE_AGENT_AUTO_RECORD_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .or(fc.voice.auto_record_delay_ms)
                .map_or(DEFAULT_AUTO_RECORD_DELAY, Duration::from_millis),
            max_recording: match env("VOICE_AGENT_MAX_RECORDING_SECS")
                .and_then(|v| v.parse().ok())
                .or(fc.voice.max_recording_secs)
                .unwrap_or(DEFAULT_MAX_RECORDING_SECS)
            {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        // The page defaults to the backend root, which is where the web UI is served
        let page_url = match env("VOICE_AGENT_PAGE_URL").or(fc.session.page_url) {
            Some(raw) => Url::parse(&raw)
                .map_err(|e| Error::Config(format!("invalid page url {raw:?}: {e}")))?,
            None => backend_url.clone(),
        };

        Ok(Self {
            backend_url,
            request_timeout: Duration::from_secs(request_timeout),
            voice,
            page_url,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
