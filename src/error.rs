//! Error types for the voice agent client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice agent client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone permission denied or no input device present
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio capture or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Backend answered with a non-success HTTP status
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend reported `success: false` for a turn
    #[error("backend turn failed: {0}")]
    BackendTurn(String),

    /// Backend refused to issue a new session
    #[error("session rotation failed: {0}")]
    SessionRotation(String),

    /// Host refused to start playback without a user gesture
    #[error("playback blocked: {0}")]
    PlaybackBlocked(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether the error came from the network path rather than the backend's verdict
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http(_) | Self::Serialization(_))
    }
}
