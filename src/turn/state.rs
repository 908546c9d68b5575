//! Recording lifecycle state machine

use std::fmt;

/// Where the record control is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Idle; a new recording may start
    #[default]
    Ready,
    /// Microphone is capturing
    Recording,
    /// Payload submitted, waiting for the backend
    Processing,
}

impl TurnState {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triggers that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `ready -> recording`
    Start,
    /// `recording -> processing`
    Stop,
    /// `processing -> ready`
    Complete,
    /// any -> `ready` (session replaced)
    Reset,
}

/// Single source of truth for whether a recording may start
#[derive(Debug, Default)]
pub struct TurnStateMachine {
    state: TurnState,
}

impl TurnStateMachine {
    /// Create a machine in [`TurnState::Ready`]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: TurnState::Ready,
        }
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Check if a recording may start
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, TurnState::Ready)
    }

    /// Apply a transition
    ///
    /// Returns false, leaving the state untouched, when `transition` is not
    /// legal from the current state.
    pub fn apply(&mut self, transition: Transition) -> bool {
        let next = match (self.state, transition) {
            (TurnState::Ready, Transition::Start) => TurnState::Recording,
            (TurnState::Recording, Transition::Stop) => TurnState::Processing,
            (TurnState::Processing, Transition::Complete) | (_, Transition::Reset) => {
                TurnState::Ready
            }
            (state, transition) => {
                tracing::trace!(%state, ?transition, "illegal transition ignored");
                return false;
            }
        };

        tracing::trace!(from = %self.state, to = %next, "turn state");
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut machine = TurnStateMachine::new();

        assert!(machine.apply(Transition::Start));
        assert_eq!(machine.state(), TurnState::Recording);
        assert!(machine.apply(Transition::Stop));
        assert_eq!(machine.state(), TurnState::Processing);
        assert!(machine.apply(Transition::Complete));
        assert!(machine.is_ready());
    }

    #[test]
    fn test_illegal_transitions_are_noops() {
        let mut machine = TurnStateMachine::new();

        assert!(!machine.apply(Transition::Stop));
        assert!(!machine.apply(Transition::Complete));
        assert_eq!(machine.state(), TurnState::Ready);

        machine.apply(Transition::Start);
        assert!(!machine.apply(Transition::Start));
        assert!(!machine.apply(Transition::Complete));
        assert_eq!(machine.state(), TurnState::Recording);

        machine.apply(Transition::Stop);
        assert!(!machine.apply(Transition::Start));
        assert!(!machine.apply(Transition::Stop));
        assert_eq!(machine.state(), TurnState::Processing);
    }

    #[test]
    fn test_reset_from_any_state() {
        for steps in 0..3 {
            let mut machine = TurnStateMachine::new();
            for transition in [Transition::Start, Transition::Stop].iter().take(steps) {
                machine.apply(*transition);
            }
            assert!(machine.apply(Transition::Reset));
            assert!(machine.is_ready());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(TurnState::Processing.to_string(), "processing");
    }
}
