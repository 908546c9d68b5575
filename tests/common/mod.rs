//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voice_agent_client::backend::{ChatHistory, ChatMessage, ConversationBackend, TurnResult};
use voice_agent_client::presentation::{PresentationSink, ProcessingStatus};
use voice_agent_client::session::{NavigationState, PageUrl};
use voice_agent_client::turn::{ChatTurnController, Collaborators, Event, TurnSettings, TurnState};
use voice_agent_client::voice::{AudioTrack, Microphone, PlaybackDone, Player, RecordingPayload};
use voice_agent_client::{Error, Result};

/// Media type reported by the mock microphone
pub const MOCK_MEDIA_TYPE: &str = "audio/webm;codecs=opus";

/// Everything a presentation surface was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    TurnState(TurnState),
    Session(String),
    Status(ProcessingStatus),
    ProcessingVisible(bool),
    ConversationVisible(bool),
    Transcript(String),
    Response(String),
    PlaybackSource(String),
    Notify(String),
    History(String),
}

/// Presentation sink that records every call
#[derive(Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn contains(&self, call: &SinkCall) -> bool {
        self.calls().contains(call)
    }

    /// Last rendered turn state
    pub fn last_state(&self) -> Option<TurnState> {
        self.calls().into_iter().rev().find_map(|c| match c {
            SinkCall::TurnState(s) => Some(s),
            _ => None,
        })
    }

    fn push(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PresentationSink for RecordingSink {
    fn set_turn_state(&mut self, state: TurnState) {
        self.push(SinkCall::TurnState(state));
    }

    fn set_session(&mut self, token: &str) {
        self.push(SinkCall::Session(token.to_string()));
    }

    fn set_status(&mut self, status: ProcessingStatus) {
        self.push(SinkCall::Status(status));
    }

    fn set_processing_visible(&mut self, visible: bool) {
        self.push(SinkCall::ProcessingVisible(visible));
    }

    fn set_conversation_visible(&mut self, visible: bool) {
        self.push(SinkCall::ConversationVisible(visible));
    }

    fn show_transcript(&mut self, text: &str) {
        self.push(SinkCall::Transcript(text.to_string()));
    }

    fn show_response(&mut self, text: &str) {
        self.push(SinkCall::Response(text.to_string()));
    }

    fn set_playback_source(&mut self, url: &str) {
        self.push(SinkCall::PlaybackSource(url.to_string()));
    }

    fn notify_error(&mut self, message: &str) {
        self.push(SinkCall::Notify(message.to_string()));
    }

    fn show_history(&mut self, history: &ChatHistory) {
        self.push(SinkCall::History(history.session_id.clone()));
    }
}

/// Microphone that hands out fixed fragments and counts device use
#[derive(Default)]
pub struct MockMicrophone {
    pub deny: AtomicBool,
    pub fail_finalize: Arc<AtomicBool>,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
}

impl MockMicrophone {
    pub fn denying() -> Self {
        let mic = Self::default();
        mic.deny.store(true, Ordering::SeqCst);
        mic
    }

    /// Tracks open fine but error out when stopped
    pub fn failing_finalize() -> Self {
        let mic = Self::default();
        mic.fail_finalize.store(true, Ordering::SeqCst);
        mic
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

struct MockTrack {
    released: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    fail: bool,
}

impl AudioTrack for MockTrack {
    fn media_type(&self) -> &'static str {
        MOCK_MEDIA_TYPE
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Audio("encoder flush failed".to_string()));
        }
        Ok(vec![b"frag-1".to_vec(), b"frag-2".to_vec()])
    }
}

#[async_trait]
impl Microphone for MockMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioTrack>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("permission denied".to_string()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(MockTrack {
            released: Arc::clone(&self.released),
            live: Arc::clone(&self.live),
            fail: self.fail_finalize.load(Ordering::SeqCst),
        }))
    }
}

/// Player that records sources and finishes instantly
#[derive(Default)]
pub struct MockPlayer {
    pub blocked: AtomicBool,
    pub stall: Option<Duration>,
    pub played: Mutex<Vec<String>>,
}

impl MockPlayer {
    pub fn blocking() -> Self {
        let player = Self::default();
        player.blocked.store(true, Ordering::SeqCst);
        player
    }

    /// Player whose start takes `stall`, like a slow audio download
    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::default()
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl Player for MockPlayer {
    async fn play(&self, source: &str, done: PlaybackDone) -> Result<()> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(Error::PlaybackBlocked("user gesture required".to_string()));
        }

        self.played.lock().unwrap().push(source.to_string());
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        done.notify();
        Ok(())
    }
}

/// A recorded `submit_turn` call
#[derive(Debug, Clone)]
pub struct Submitted {
    pub session: String,
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub voice_id: String,
}

/// Backend replaying queued replies
#[derive(Default)]
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<Result<TurnResult>>>,
    sessions: Mutex<VecDeque<Result<String>>>,
    pub submitted: Mutex<Vec<Submitted>>,
}

impl ScriptedBackend {
    pub fn push_turn(&self, result: Result<TurnResult>) {
        self.turns.lock().unwrap().push_back(result);
    }

    pub fn push_session(&self, result: Result<String>) {
        self.sessions.lock().unwrap().push_back(result);
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    async fn new_session(&self) -> Result<String> {
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::SessionRotation("no scripted session".to_string())))
    }

    async fn submit_turn(
        &self,
        session_id: &str,
        payload: RecordingPayload,
        voice_id: &str,
    ) -> Result<TurnResult> {
        self.submitted.lock().unwrap().push(Submitted {
            session: session_id.to_string(),
            file_name: payload.file_name(),
            bytes: payload.into_bytes(),
            voice_id: voice_id.to_string(),
        });

        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transport("no scripted turn".to_string())))
    }

    async fn history(&self, session_id: &str) -> Result<ChatHistory> {
        Ok(ChatHistory {
            success: true,
            session_id: session_id.to_string(),
            message_count: 1,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
                timestamp: "2024-01-01T00:00:00".to_string(),
            }],
        })
    }
}

/// Page URL observable from the test after the controller takes ownership
#[derive(Clone)]
pub struct SharedPage {
    page: Arc<Mutex<PageUrl>>,
}

impl SharedPage {
    pub fn parse(raw: &str) -> Self {
        Self {
            page: Arc::new(Mutex::new(PageUrl::parse(raw).unwrap())),
        }
    }

    pub fn url(&self) -> String {
        self.page.lock().unwrap().as_url().to_string()
    }

    pub fn session_param(&self) -> Option<String> {
        self.page.lock().unwrap().query_param("session_id")
    }
}

impl NavigationState for SharedPage {
    fn query_param(&self, key: &str) -> Option<String> {
        self.page.lock().unwrap().query_param(key)
    }

    fn replace_query_param(&mut self, key: &str, value: &str) {
        self.page.lock().unwrap().replace_query_param(key, value);
    }
}

/// Successful reply with all fields
pub fn success(transcription: &str, response: &str, audio_url: Option<&str>) -> TurnResult {
    TurnResult {
        transcription: Some(transcription.to_string()),
        response_text: Some(response.to_string()),
        audio_url: audio_url.map(ToString::to_string),
        success: true,
        error: None,
    }
}

/// Failed reply
pub fn failure(transcription: Option<&str>, error: &str) -> TurnResult {
    TurnResult {
        transcription: transcription.map(ToString::to_string),
        response_text: None,
        audio_url: None,
        success: false,
        error: Some(error.to_string()),
    }
}

/// A controller wired to mocks
pub struct Harness {
    pub controller: ChatTurnController,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub sink: RecordingSink,
    pub backend: Arc<ScriptedBackend>,
    pub microphone: Arc<MockMicrophone>,
    pub player: Arc<MockPlayer>,
    pub page: SharedPage,
}

pub struct HarnessBuilder {
    page: String,
    microphone: MockMicrophone,
    player: MockPlayer,
    settings: TurnSettings,
}

impl HarnessBuilder {
    pub fn page(mut self, raw: &str) -> Self {
        self.page = raw.to_string();
        self
    }

    pub fn microphone(mut self, microphone: MockMicrophone) -> Self {
        self.microphone = microphone;
        self
    }

    pub fn player(mut self, player: MockPlayer) -> Self {
        self.player = player;
        self
    }

    pub fn auto_record(mut self, enabled: bool) -> Self {
        self.settings.auto_record = enabled;
        self
    }

    pub fn max_recording(mut self, limit: Option<Duration>) -> Self {
        self.settings.max_recording = limit;
        self
    }

    pub fn build(self) -> Harness {
        let sink = RecordingSink::default();
        let backend = Arc::new(ScriptedBackend::default());
        let microphone = Arc::new(self.microphone);
        let player = Arc::new(self.player);
        let page = SharedPage::parse(&self.page);
        let (tx, events) = mpsc::unbounded_channel();

        let collaborators = Collaborators {
            backend: backend.clone(),
            microphone: microphone.clone(),
            player: player.clone(),
            sink: Box::new(sink.clone()),
            navigation: Box::new(page.clone()),
        };

        Harness {
            controller: ChatTurnController::new(collaborators, self.settings, tx),
            events,
            sink,
            backend,
            microphone,
            player,
            page,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            page: "http://localhost:8000/".to_string(),
            microphone: MockMicrophone::default(),
            player: MockPlayer::default(),
            settings: TurnSettings::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Record and immediately finish one turn against the scripted backend
    ///
    /// Also lets a spawned playback start run to completion.
    pub async fn run_turn(&mut self) {
        assert!(self.controller.start_recording().await);
        assert!(self.controller.finish_turn().await);
        settle_tasks().await;
    }
}

/// Give spawned tasks a chance to run on the current-thread runtime
pub async fn settle_tasks() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
