//! Chat turn orchestration
//!
//! The controller owns every piece of mutable client state: the session
//! token, the turn state, the active capture, the pending auto-record timer
//! and the tag of the submission in flight. All mutation goes through its
//! methods, which the client loop calls one event at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{AutoRecordScheduler, Event, Transition, TurnState, TurnStateMachine};
use crate::backend::{ConversationBackend, TurnResult};
use crate::config::{Config, DEFAULT_AUTO_RECORD_DELAY, DEFAULT_VOICE_ID};
use crate::presentation::{PresentationSink, ProcessingStatus};
use crate::session::{NavigationState, SessionIdentity};
use crate::voice::{
    CaptureController, CaptureHandle, Microphone, PlaybackDone, Player, RecordingPayload,
};
use crate::{Error, Result};

/// Shown when the microphone can't be acquired
pub const DEVICE_UNAVAILABLE_NOTICE: &str = "Microphone access denied or not available.";

/// External collaborators the controller drives
pub struct Collaborators {
    /// Agent backend
    pub backend: Arc<dyn ConversationBackend>,
    /// Audio input
    pub microphone: Arc<dyn Microphone>,
    /// Response audio output
    pub player: Arc<dyn Player>,
    /// Rendering surface
    pub sink: Box<dyn PresentationSink>,
    /// Page URL holding the session token
    pub navigation: Box<dyn NavigationState>,
}

/// Turn-taking knobs
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// TTS voice selector sent with every turn
    pub voice_id: String,
    /// Initial auto-record preference
    pub auto_record: bool,
    /// Quiet interval before auto-record re-arms
    pub auto_record_delay: Duration,
    /// Implicit stop after this long
    pub max_recording: Option<Duration>,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            voice_id: DEFAULT_VOICE_ID.to_string(),
            auto_record: false,
            auto_record_delay: DEFAULT_AUTO_RECORD_DELAY,
            max_recording: None,
        }
    }
}

impl From<&Config> for TurnSettings {
    fn from(config: &Config) -> Self {
        Self {
            voice_id: config.voice.voice_id.clone(),
            auto_record: config.voice.auto_record,
            auto_record_delay: config.voice.auto_record_delay,
            max_recording: config.voice.max_recording,
        }
    }
}

/// Identifies which turn, under which session, a submission belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTag {
    /// Monotonic per-client turn number
    pub turn_id: u64,
    /// Session token active at submission time
    pub session: String,
}

/// A finalized recording ready to be posted
#[derive(Debug)]
pub struct TurnSubmission {
    tag: TurnTag,
    payload: RecordingPayload,
    voice_id: String,
}

impl TurnSubmission {
    /// Tag the result will carry
    #[must_use]
    pub const fn tag(&self) -> &TurnTag {
        &self.tag
    }

    /// Post the recording and wrap whatever comes back
    pub async fn send(self, backend: &dyn ConversationBackend) -> SettledTurn {
        let outcome = backend
            .submit_turn(&self.tag.session, self.payload, &self.voice_id)
            .await;
        SettledTurn {
            tag: self.tag,
            outcome,
        }
    }
}

/// Backend outcome of a submission
#[derive(Debug)]
pub struct SettledTurn {
    /// Tag of the originating submission
    pub tag: TurnTag,
    /// Parsed reply, or the transport failure
    pub outcome: Result<TurnResult>,
}

/// Orchestrates capture, submission, presentation and playback
pub struct ChatTurnController {
    session: SessionIdentity,
    state: TurnStateMachine,
    capture: CaptureController,
    scheduler: AutoRecordScheduler,
    backend: Arc<dyn ConversationBackend>,
    player: Arc<dyn Player>,
    sink: Box<dyn PresentationSink>,
    events: mpsc::UnboundedSender<Event>,
    voice_id: String,
    max_recording: Option<Duration>,
    recording: Option<CaptureHandle>,
    recording_limit: Option<CancellationToken>,
    in_flight: Option<TurnTag>,
    next_turn_id: u64,
}

impl ChatTurnController {
    /// Create the controller and render the initial session and state
    ///
    /// Timers and playback completions are reported on `events`.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        settings: TurnSettings,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let Collaborators {
            backend,
            microphone,
            player,
            sink,
            navigation,
        } = collaborators;

        let mut controller = Self {
            session: SessionIdentity::new(navigation),
            state: TurnStateMachine::new(),
            capture: CaptureController::new(microphone),
            scheduler: AutoRecordScheduler::new(
                settings.auto_record,
                settings.auto_record_delay,
                events.clone(),
            ),
            backend,
            player,
            sink,
            events,
            voice_id: settings.voice_id,
            max_recording: settings.max_recording,
            recording: None,
            recording_limit: None,
            in_flight: None,
            next_turn_id: 1,
        };

        let token = controller.session.current();
        controller.sink.set_session(&token);
        controller.sink.set_turn_state(controller.state.state());
        tracing::info!(session = %token, "voice chat ready");

        controller
    }

    /// Get current turn state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state.state()
    }

    /// Active session token
    #[must_use]
    pub fn session_token(&self) -> &str {
        self.session.peek().unwrap_or_default()
    }

    /// Whether the auto-record preference is on
    #[must_use]
    pub const fn auto_record_enabled(&self) -> bool {
        self.scheduler.is_enabled()
    }

    /// Whether an auto-record re-arm is waiting to fire
    #[must_use]
    pub const fn auto_record_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Tag of the submission awaiting its result
    #[must_use]
    pub const fn in_flight(&self) -> Option<&TurnTag> {
        self.in_flight.as_ref()
    }

    /// Check if the microphone is held
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    /// Backend used for submissions
    #[must_use]
    pub fn backend(&self) -> Arc<dyn ConversationBackend> {
        Arc::clone(&self.backend)
    }

    /// Dispatch one event
    ///
    /// Returns a submission when the event closed a recording; the caller
    /// posts it and feeds the result back as [`Event::TurnSettled`].
    pub async fn handle(&mut self, event: Event) -> Option<TurnSubmission> {
        match event {
            Event::RecordPressed => return self.press_record().await,
            Event::RecordingLimit(handle) => return self.on_recording_limit(handle),
            Event::NewSession => {
                self.rotate_session().await;
            }
            Event::SetAutoRecord(enabled) => self.set_auto_record(enabled),
            Event::PlaybackEnded => self.on_playback_ended(),
            Event::ShowHistory => self.show_history().await,
            Event::TurnSettled(settled) => self.settle(settled),
            Event::AutoRecordDue { generation } => {
                self.on_auto_record_due(generation).await;
            }
            Event::Shutdown => self.shutdown(),
        }
        None
    }

    /// Combined record/stop control
    pub async fn press_record(&mut self) -> Option<TurnSubmission> {
        match self.state.state() {
            TurnState::Ready => {
                self.start_recording().await;
                None
            }
            TurnState::Recording => self.stop_recording(),
            TurnState::Processing => {
                tracing::debug!("record pressed while processing, ignored");
                None
            }
        }
    }

    /// Begin capturing if the machine is ready
    ///
    /// Returns false when not ready or when the microphone can't be
    /// acquired; the state stays `ready` in both cases.
    pub async fn start_recording(&mut self) -> bool {
        if !self.state.is_ready() {
            tracing::debug!(state = %self.state.state(), "start ignored");
            return false;
        }

        self.scheduler.cancel();

        let handle = match self.capture.start().await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "error accessing microphone");
                let notice = match e {
                    Error::DeviceUnavailable(_) => DEVICE_UNAVAILABLE_NOTICE.to_string(),
                    other => format!("Could not start recording: {other}"),
                };
                self.sink.notify_error(&notice);
                return false;
            }
        };

        self.transition(Transition::Start);
        self.recording = Some(handle);
        self.arm_recording_limit(handle);
        tracing::info!("recording started");
        true
    }

    /// Close the recording and prepare its submission
    ///
    /// Returns `None` when nothing is recording or the payload could not be
    /// finalized; in the latter case the turn is already closed.
    pub fn stop_recording(&mut self) -> Option<TurnSubmission> {
        let Some(handle) = self.recording.take() else {
            tracing::debug!("stop ignored, not recording");
            return None;
        };
        self.disarm_recording_limit();
        self.transition(Transition::Stop);

        self.sink.set_conversation_visible(false);
        self.sink.set_processing_visible(true);
        self.sink.set_status(ProcessingStatus::Transcribing);

        let payload = match self.capture.stop(handle) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::warn!("recording already finalized");
                self.close_turn();
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to finalize recording");
                self.close_turn();
                return None;
            }
        };

        let tag = TurnTag {
            turn_id: self.next_turn_id,
            session: self.session.current(),
        };
        self.next_turn_id += 1;
        self.in_flight = Some(tag.clone());
        self.sink.set_status(ProcessingStatus::Thinking);

        tracing::info!(
            turn = tag.turn_id,
            session = %tag.session,
            audio_bytes = payload.len(),
            "submitting turn"
        );

        Some(TurnSubmission {
            tag,
            payload,
            voice_id: self.voice_id.clone(),
        })
    }

    /// Stop the recording, submit it and apply the result without yielding
    /// to other events
    ///
    /// Returns false if nothing was recording.
    pub async fn finish_turn(&mut self) -> bool {
        let Some(submission) = self.stop_recording() else {
            return false;
        };
        let settled = submission.send(self.backend.as_ref()).await;
        self.settle(settled);
        true
    }

    /// Implicit stop once a recording reaches its maximum length
    pub fn on_recording_limit(&mut self, handle: CaptureHandle) -> Option<TurnSubmission> {
        if self.recording != Some(handle) {
            tracing::trace!(?handle, "recording limit for finished capture ignored");
            return None;
        }

        tracing::info!("maximum recording length reached");
        self.stop_recording()
    }

    /// Apply a backend outcome
    ///
    /// Results whose tag no longer matches the in-flight turn or the active
    /// session are dropped without touching presentation or state.
    pub fn settle(&mut self, settled: SettledTurn) {
        let SettledTurn { tag, outcome } = settled;

        let current = self.in_flight.as_ref() == Some(&tag)
            && self.session.peek() == Some(tag.session.as_str());
        if !current {
            tracing::info!(
                turn = tag.turn_id,
                session = %tag.session,
                "discarding stale turn result"
            );
            return;
        }
        self.in_flight = None;

        match outcome {
            Ok(result) if result.success => self.present_success(result),
            Ok(result) => self.present_failure(&result),
            Err(e) => {
                tracing::error!(error = %e, transport = e.is_transport(), "turn request failed");
                self.close_turn();
            }
        }
    }

    fn present_success(&mut self, result: TurnResult) {
        if let (Some(transcript), Some(response)) = (&result.transcription, &result.response_text)
        {
            self.sink.show_transcript(transcript);
            self.sink.show_response(response);
            self.sink.set_conversation_visible(true);
        }

        self.sink.set_status(ProcessingStatus::Synthesizing);

        let Some(audio_url) = result.audio_url else {
            self.close_turn();
            return;
        };

        self.sink.set_playback_source(&audio_url);
        self.close_turn();
        self.start_playback(audio_url);
    }

    /// Start response audio on its own task
    ///
    /// Fetching can take as long as a request timeout; the loop keeps
    /// handling events meanwhile. A blocked or failed start is logged only.
    fn start_playback(&self, audio_url: String) {
        let player = Arc::clone(&self.player);
        let done = PlaybackDone::new(self.events.clone());

        tokio::spawn(async move {
            match player.play(&audio_url, done).await {
                Ok(()) => tracing::debug!(url = %audio_url, "playback started"),
                Err(Error::PlaybackBlocked(reason)) => {
                    tracing::info!(reason = %reason, "auto-play blocked");
                }
                Err(e) => tracing::warn!(error = %e, url = %audio_url, "playback failed"),
            }
        });
    }

    fn present_failure(&mut self, result: &TurnResult) {
        self.close_turn();
        if let Some(e) = result.failure() {
            tracing::error!(error = %e, "chat processing failed");
        }

        if let Some(transcript) = &result.transcription {
            self.sink.show_transcript(transcript);
            self.sink.set_conversation_visible(true);
        }
    }

    /// Replace the session with a fresh backend-issued one
    ///
    /// On success the presentation is reset, any capture is discarded, the
    /// in-flight turn is orphaned and the machine returns to `ready`. On
    /// failure nothing changes.
    pub async fn rotate_session(&mut self) -> bool {
        let token = match self.session.rotate(self.backend.as_ref()).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "error creating new session");
                return false;
            }
        };

        if let Some(orphaned) = self.in_flight.take() {
            tracing::info!(turn = orphaned.turn_id, "in-flight turn superseded by new session");
        }
        self.disarm_recording_limit();
        self.recording = None;
        self.capture.abort();

        self.sink.set_session(&token);
        self.sink.set_conversation_visible(false);
        self.sink.set_processing_visible(false);
        self.transition(Transition::Reset);

        true
    }

    /// Toggle the auto-record preference
    pub fn set_auto_record(&mut self, enabled: bool) {
        self.scheduler.set_enabled(enabled);
    }

    /// Response audio finished; schedule a re-arm if enabled
    pub fn on_playback_ended(&mut self) {
        if !self.scheduler.schedule() {
            tracing::trace!("playback ended, auto-record off");
        }
    }

    /// A re-arm quiet interval elapsed
    ///
    /// Returns true if a new recording started.
    pub async fn on_auto_record_due(&mut self, generation: u64) -> bool {
        if !self.scheduler.claim(generation) {
            return false;
        }

        if !self.state.is_ready() {
            tracing::debug!(state = %self.state.state(), "auto-record skipped, turn in progress");
            return false;
        }

        tracing::info!("auto-starting recording");
        self.start_recording().await
    }

    /// Fetch and render the active session's history
    pub async fn show_history(&mut self) {
        let session = self.session.current();
        match self.backend.history(&session).await {
            Ok(history) => self.sink.show_history(&history),
            Err(e) => tracing::warn!(error = %e, session = %session, "failed to fetch history"),
        }
    }

    /// Release the microphone and cancel every timer
    pub fn shutdown(&mut self) {
        self.scheduler.cancel();
        self.disarm_recording_limit();
        self.recording = None;
        self.capture.abort();
    }

    fn close_turn(&mut self) {
        self.sink.set_processing_visible(false);
        self.transition(Transition::Complete);
    }

    fn transition(&mut self, transition: Transition) -> bool {
        let applied = self.state.apply(transition);
        if applied {
            self.sink.set_turn_state(self.state.state());
        }
        applied
    }

    fn arm_recording_limit(&mut self, handle: CaptureHandle) {
        let Some(limit) = self.max_recording else {
            return;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(limit) => {
                    let _ = events.send(Event::RecordingLimit(handle));
                }
            }
        });

        self.recording_limit = Some(token);
    }

    fn disarm_recording_limit(&mut self) {
        if let Some(token) = self.recording_limit.take() {
            token.cancel();
        }
    }
}

impl Drop for ChatTurnController {
    fn drop(&mut self) {
        self.scheduler.cancel();
        self.disarm_recording_limit();
    }
}
