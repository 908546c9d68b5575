//! Turn-taking
//!
//! A turn is one capture → submit → response → playback cycle. The
//! [`ChatTurnController`] runs turns against the [`TurnStateMachine`] and
//! re-arms itself through the [`AutoRecordScheduler`].

mod auto_record;
mod controller;
mod state;

pub use auto_record::AutoRecordScheduler;
pub use controller::{
    ChatTurnController, Collaborators, SettledTurn, TurnSettings, TurnSubmission, TurnTag,
};
pub use state::{Transition, TurnState, TurnStateMachine};

use crate::voice::CaptureHandle;

/// Inputs to the client's control loop
#[derive(Debug)]
pub enum Event {
    /// Combined record/stop control pressed
    RecordPressed,
    /// "New session" action
    NewSession,
    /// Auto-record preference toggled
    SetAutoRecord(bool),
    /// Response audio finished playing
    PlaybackEnded,
    /// Show the current session's history
    ShowHistory,
    /// Stop the control loop
    Shutdown,
    /// A submitted turn came back from the backend
    TurnSettled(SettledTurn),
    /// An auto-record quiet interval elapsed
    AutoRecordDue {
        /// Schedule that elapsed
        generation: u64,
    },
    /// A recording hit its maximum length
    RecordingLimit(CaptureHandle),
}
