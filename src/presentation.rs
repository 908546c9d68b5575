//! Presentation boundary
//!
//! Everything the user sees goes through [`PresentationSink`], so the turn
//! protocol can run without a rendering surface.

use std::io::Write;

use crate::backend::ChatHistory;
use crate::turn::TurnState;

/// Advisory status text shown while a turn is being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Audio uploaded, waiting for speech-to-text
    Transcribing,
    /// Transcript ready, waiting for the agent reply
    Thinking,
    /// Reply ready, waiting for synthesized speech
    Synthesizing,
}

impl ProcessingStatus {
    /// User-facing label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Transcribing => "Transcribing your message...",
            Self::Thinking => "Generating a response...",
            Self::Synthesizing => "Converting to speech...",
        }
    }
}

/// Renders transcript, response, status and playback source
pub trait PresentationSink: Send {
    /// Reflect the record control's state
    fn set_turn_state(&mut self, state: TurnState);

    /// Show the active session token
    fn set_session(&mut self, token: &str);

    /// Update the processing indicator text
    fn set_status(&mut self, status: ProcessingStatus);

    /// Show or hide the processing indicator
    fn set_processing_visible(&mut self, visible: bool);

    /// Show or hide the conversation panel
    fn set_conversation_visible(&mut self, visible: bool);

    /// Set the transcript of what the user said
    fn show_transcript(&mut self, text: &str);

    /// Set the agent's reply text
    fn show_response(&mut self, text: &str);

    /// Set the response audio source
    fn set_playback_source(&mut self, url: &str);

    /// Blocking notification the user must acknowledge
    fn notify_error(&mut self, message: &str);

    /// Render a fetched conversation history
    ///
    /// Default implementation is a no-op for surfaces without a history view
    fn show_history(&mut self, _history: &ChatHistory) {}
}

/// Line-oriented terminal rendering
pub struct TerminalSink<W: Write + Send> {
    out: W,
    processing_visible: bool,
}

impl TerminalSink<std::io::Stdout> {
    /// Render to stdout
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    /// Render to an arbitrary writer
    pub const fn new(out: W) -> Self {
        Self {
            out,
            processing_visible: false,
        }
    }

    /// Consume the sink, returning the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}").and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }
}

impl<W: Write + Send> PresentationSink for TerminalSink<W> {
    fn set_turn_state(&mut self, state: TurnState) {
        let label = match state {
            TurnState::Ready => "Ready to listen (Enter to record)",
            TurnState::Recording => "Recording... (Enter to stop)",
            TurnState::Processing => "Processing...",
        };
        self.line(&format!("● {label}"));
    }

    fn set_session(&mut self, token: &str) {
        self.line(&format!("Session: {token}"));
    }

    fn set_status(&mut self, status: ProcessingStatus) {
        if self.processing_visible {
            self.line(&format!("  {}", status.label()));
        }
    }

    fn set_processing_visible(&mut self, visible: bool) {
        self.processing_visible = visible;
    }

    fn set_conversation_visible(&mut self, _visible: bool) {}

    fn show_transcript(&mut self, text: &str) {
        self.line(&format!("You:   {text}"));
    }

    fn show_response(&mut self, text: &str) {
        self.line(&format!("Agent: {text}"));
    }

    fn set_playback_source(&mut self, url: &str) {
        tracing::debug!(url, "playback source set");
    }

    fn notify_error(&mut self, message: &str) {
        self.line(&format!("! {message}"));
    }

    fn show_history(&mut self, history: &ChatHistory) {
        if !history.success {
            self.line(&format!("No history for session {}", history.session_id));
            return;
        }

        self.line(&format!(
            "History of {} ({} messages):",
            history.session_id, history.message_count
        ));
        for message in &history.messages {
            let who = if message.role == "user" { "You" } else { "Agent" };
            self.line(&format!("  [{}] {who}: {}", message.timestamp, message.content));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(sink: TerminalSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_status_hidden_without_indicator() {
        let mut sink = TerminalSink::new(Vec::new());
        sink.set_status(ProcessingStatus::Thinking);
        sink.set_processing_visible(true);
        sink.set_status(ProcessingStatus::Transcribing);

        let out = rendered(sink);
        assert!(!out.contains("Generating"));
        assert!(out.contains("Transcribing your message..."));
    }

    #[test]
    fn test_transcript_and_response_lines() {
        let mut sink = TerminalSink::new(Vec::new());
        sink.show_transcript("hi");
        sink.show_response("hello");

        let out = rendered(sink);
        assert!(out.contains("You:   hi"));
        assert!(out.contains("Agent: hello"));
    }
}
