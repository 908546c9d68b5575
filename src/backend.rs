//! Agent backend HTTP contract
//!
//! The backend transcribes the uploaded audio, generates a reply with its
//! LLM and synthesizes speech. This module only speaks its wire format:
//!
//! - `POST /agent/session/new`
//! - `POST /agent/chat/{session_id}` (multipart `file` + `voice_id`)
//! - `GET /agent/chat/{session_id}/history`
//! - `GET /health`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::voice::RecordingPayload;
use crate::{Error, Result};

/// Multipart field carrying the recorded audio
pub const FILE_FIELD: &str = "file";

/// Multipart field carrying the TTS voice selector
pub const VOICE_FIELD: &str = "voice_id";

/// Interpreted outcome of one chat turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnResult {
    /// What the backend heard
    pub transcription: Option<String>,
    /// Agent reply text
    pub response_text: Option<String>,
    /// Synthesized reply audio, possibly relative to the backend
    pub audio_url: Option<String>,
    /// Whether the backend completed the turn
    pub success: bool,
    /// Failure reason reported by the backend
    pub error: Option<String>,
}

impl TurnResult {
    /// The backend's refusal as an error, if the turn did not succeed
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        (!self.success).then(|| {
            Error::BackendTurn(
                self.error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            )
        })
    }
}

/// Raw `POST /agent/chat/{session_id}` response body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurnResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub llm_response: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<ChatTurnResponse> for TurnResult {
    fn from(raw: ChatTurnResponse) -> Self {
        // Empty strings carry no content
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            transcription: present(raw.transcription),
            response_text: present(raw.llm_response),
            audio_url: present(raw.audio_url),
            success: raw.success,
            error: present(raw.error),
        }
    }
}

/// `POST /agent/session/new` response body
#[derive(Debug, Clone, Deserialize)]
struct NewSessionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    session_id: Option<String>,
}

/// One stored conversation message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
    /// ISO 8601 timestamp as recorded by the backend
    pub timestamp: String,
}

/// Conversation history of one session
#[derive(Debug, Clone, Deserialize)]
pub struct ChatHistory {
    /// False when the backend has never seen the session
    #[serde(default)]
    pub success: bool,
    pub session_id: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Remote conversational backend
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Request a fresh session token
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or when the backend declines
    async fn new_session(&self) -> Result<String>;

    /// Submit one recorded turn
    ///
    /// A reply with `success: false` is still `Ok`; only transport-level
    /// problems are errors.
    ///
    /// # Errors
    ///
    /// Returns error on network failure, non-2xx status or an unparseable body
    async fn submit_turn(
        &self,
        session_id: &str,
        payload: RecordingPayload,
        voice_id: &str,
    ) -> Result<TurnResult>;

    /// Fetch the conversation history of a session
    ///
    /// # Errors
    ///
    /// Returns error on transport failure
    async fn history(&self, session_id: &str) -> Result<ChatHistory>;
}

/// [`ConversationBackend`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend client rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot carry paths or the client cannot be built
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "backend url cannot carry paths: {base_url}"
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Backend base URL
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build an endpoint URL from path segments, escaping each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                Error::Config(format!("backend url cannot carry paths: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Query `GET /health`
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or non-2xx status
    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = self.endpoint(&["health"])?;
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::Transport(format!("health check returned {status}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn new_session(&self) -> Result<String> {
        let url = self.endpoint(&["agent", "session", "new"])?;
        tracing::debug!(url = %url, "requesting new session");

        let response = self.client.post(url).send().await.map_err(|e| {
            tracing::error!(error = %e, "new session request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "new session rejected");
            return Err(Error::Transport(format!("server error {status}: {body}")));
        }

        let result: NewSessionResponse = response.json().await?;
        match result.session_id.filter(|id| !id.is_empty()) {
            Some(id) if result.success => Ok(id),
            _ => Err(Error::SessionRotation(
                "backend did not issue a session id".to_string(),
            )),
        }
    }

    async fn submit_turn(
        &self,
        session_id: &str,
        payload: RecordingPayload,
        voice_id: &str,
    ) -> Result<TurnResult> {
        let url = self.endpoint(&["agent", "chat", session_id])?;
        tracing::debug!(
            session = session_id,
            audio_bytes = payload.len(),
            media_type = payload.media_type(),
            "submitting turn"
        );

        let file_name = payload.file_name();
        let media_type = payload.media_type();
        let form = reqwest::multipart::Form::new()
            .part(
                FILE_FIELD,
                reqwest::multipart::Part::bytes(payload.into_bytes())
                    .file_name(file_name)
                    .mime_str(media_type)?,
            )
            .text(VOICE_FIELD, voice_id.to_string());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "turn request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "server error");
            return Err(Error::Transport(format!("server error {status}")));
        }

        let raw: ChatTurnResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse turn response");
            e
        })?;

        Ok(raw.into())
    }

    async fn history(&self, session_id: &str) -> Result<ChatHistory> {
        let url = self.endpoint(&["agent", "chat", session_id, "history"])?;
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::Transport(format!("server error {status}")));
        }

        Ok(response.json().await?)
    }
}
