//! Client control loop
//!
//! [`VoiceClient::run`] is the only place the controller is touched. User
//! actions, timers and playback completions arrive as [`Event`]s. Backend
//! submissions run as spawned tasks and report back as
//! [`Event::TurnSettled`]; response audio is fetched and started on its own
//! task. The loop never blocks on the network.

use tokio::sync::mpsc;

use crate::turn::{ChatTurnController, Collaborators, Event, TurnSettings};

/// Voice chat client
pub struct VoiceClient {
    controller: ChatTurnController,
    events: mpsc::UnboundedReceiver<Event>,
    handle: ClientHandle,
}

impl VoiceClient {
    /// Create a client and render its initial state
    #[must_use]
    pub fn new(collaborators: Collaborators, settings: TurnSettings) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let controller = ChatTurnController::new(collaborators, settings, tx.clone());

        Self {
            controller,
            events,
            handle: ClientHandle { tx },
        }
    }

    /// Handle for driving the client from other tasks
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Borrow the controller
    #[must_use]
    pub const fn controller(&self) -> &ChatTurnController {
        &self.controller
    }

    /// Process events until [`Event::Shutdown`]
    pub async fn run(mut self) {
        tracing::debug!("client loop running");

        while let Some(event) = self.events.recv().await {
            if matches!(event, Event::Shutdown) {
                tracing::info!("shutdown requested");
                break;
            }

            if let Some(submission) = self.controller.handle(event).await {
                let backend = self.controller.backend();
                let tx = self.handle.tx.clone();

                tokio::spawn(async move {
                    let settled = submission.send(backend.as_ref()).await;
                    let _ = tx.send(Event::TurnSettled(settled));
                });
            }
        }

        self.controller.shutdown();
        tracing::debug!("client loop stopped");
    }
}

/// Cloneable sender of user actions
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl ClientHandle {
    /// Press the combined record/stop control
    pub fn press_record(&self) -> bool {
        self.send(Event::RecordPressed)
    }

    /// Ask for a new session
    pub fn new_session(&self) -> bool {
        self.send(Event::NewSession)
    }

    /// Toggle the auto-record preference
    pub fn set_auto_record(&self, enabled: bool) -> bool {
        self.send(Event::SetAutoRecord(enabled))
    }

    /// Report that response audio finished
    pub fn playback_ended(&self) -> bool {
        self.send(Event::PlaybackEnded)
    }

    /// Render the session history
    pub fn show_history(&self) -> bool {
        self.send(Event::ShowHistory)
    }

    /// Stop the client loop
    pub fn shutdown(&self) -> bool {
        self.send(Event::Shutdown)
    }

    /// Send a raw event
    ///
    /// Returns false once the loop has stopped.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}
