//! Voice Agent Client - push-to-talk client for a conversational voice agent
//!
//! This library provides the client side of a spoken chat:
//! - Microphone capture and response playback
//! - Turn-taking with an optional hands-free re-arm
//! - Session identity carried in the page URL
//! - HTTP transport to the agent backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Host surface                        │
//! │   Terminal  │  Page URL  │  Microphone  │  Speaker   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ Event
//! ┌────────────────────▼────────────────────────────────┐
//! │                  VoiceClient                         │
//! │   ChatTurnController  │  TurnStateMachine            │
//! │   CaptureController   │  AutoRecordScheduler         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ multipart / JSON
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Agent backend                        │
//! │   STT  │  LLM  │  TTS  │  history                    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod presentation;
pub mod session;
pub mod turn;
pub mod voice;

pub use backend::{ChatHistory, ChatMessage, ConversationBackend, HttpBackend, TurnResult};
pub use client::{ClientHandle, VoiceClient};
pub use config::Config;
pub use error::{Error, Result};
pub use presentation::{PresentationSink, ProcessingStatus, TerminalSink};
pub use session::{NavigationState, PageUrl, SessionIdentity};
pub use turn::{
    ChatTurnController, Collaborators, Event, TurnSettings, TurnState, TurnStateMachine,
};
