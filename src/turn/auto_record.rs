//! Hands-free re-arming after the spoken response ends

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Event;

/// Re-arms capture a quiet interval after playback ends
///
/// Each schedule is numbered; only the newest one may fire, and only while
/// the preference is still enabled.
pub struct AutoRecordScheduler {
    enabled: bool,
    delay: Duration,
    generation: u64,
    pending: Option<CancellationToken>,
    events: mpsc::UnboundedSender<Event>,
}

impl AutoRecordScheduler {
    /// Create a scheduler that reports due re-arms on `events`
    #[must_use]
    pub const fn new(enabled: bool, delay: Duration, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            enabled,
            delay,
            generation: 0,
            pending: None,
            events,
        }
    }

    /// Whether the auto-record preference is on
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Quiet interval before a re-arm
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a re-arm is waiting to fire
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Toggle the preference; turning it off drops any pending re-arm
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
        tracing::info!(enabled, "auto-record");
    }

    /// Schedule a re-arm, superseding any pending one
    ///
    /// Returns false when the preference is off.
    pub fn schedule(&mut self) -> bool {
        if !self.enabled {
            return false;
        }

        self.cancel();
        self.generation += 1;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let generation = self.generation;
        let delay = self.delay;
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(Event::AutoRecordDue { generation });
                }
            }
        });

        self.pending = Some(token);
        tracing::debug!(generation, delay_ms = delay.as_millis(), "auto-record scheduled");
        true
    }

    /// Drop the pending re-arm, if any
    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
            tracing::trace!(generation = self.generation, "auto-record cancelled");
        }
    }

    /// Claim a due re-arm
    ///
    /// Returns true only for the newest pending schedule while the
    /// preference is still enabled.
    pub fn claim(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.pending.is_none() {
            tracing::trace!(generation, current = self.generation, "stale auto-record ignored");
            return false;
        }

        self.pending = None;
        self.enabled
    }
}
