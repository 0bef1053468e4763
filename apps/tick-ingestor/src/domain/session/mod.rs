//! Stream Session State Machine
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Receiving -> ShuttingDown -> Stopped
//!       ^             |             |             |
//!       +-------------+-------------+-------------+   (transport errors)
//! ```
//!
//! Any live state may also fall into `Failed` (missing credential, feed
//! gave up reconnecting). `ShuttingDown` only leads to `Stopped`;
//! `Stopped` and `Failed` are terminal for the session.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of one ingestion session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport connection.
    Disconnected,
    /// Opening the transport connection.
    Connecting,
    /// Subscription for the full instrument set issued.
    Subscribed,
    /// Tick batches flowing.
    Receiving,
    /// Cutoff reached, draining the in-flight batch.
    ShuttingDown,
    /// Session ended normally.
    Stopped,
    /// Session ended abnormally.
    Failed,
}

impl SessionState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the session is subscribed and able to receive ticks.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Subscribed | Self::Receiving)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Connecting, Disconnected, Failed, Receiving, ShuttingDown, Stopped, Subscribed,
        };
        match (self, next) {
            (Stopped | Failed, _) => false,
            (ShuttingDown, next) => matches!(next, Stopped),
            (_, ShuttingDown | Failed) => true,
            (Disconnected, Connecting)
            | (Connecting, Subscribed)
            | (Subscribed | Receiving, Receiving)
            | (Connecting | Subscribed | Receiving, Disconnected) => true,
            _ => false,
        }
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Subscribed => 2,
            Self::Receiving => 3,
            Self::ShuttingDown => 4,
            Self::Stopped => 5,
            Self::Failed => 6,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Receiving => "receiving",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State before.
    pub from: SessionState,
    /// Requested state.
    pub to: SessionState,
}

/// Tracks the current state and enforces the transition table.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    reconnects: u64,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Start in `Disconnected`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            reconnects: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Number of times the session fell back to `Disconnected` after
    /// having been connected.
    #[must_use]
    pub const fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the table forbids the move; the
    /// state is left unchanged.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next == SessionState::Disconnected && self.state.is_ready() {
            self.reconnects += 1;
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::SessionState::*;
    use super::*;

    #[test_case(Disconnected, Connecting ; "connect")]
    #[test_case(Connecting, Subscribed ; "subscribe")]
    #[test_case(Subscribed, Receiving ; "first batch")]
    #[test_case(Receiving, Receiving ; "next batch")]
    #[test_case(Receiving, Disconnected ; "transport drop")]
    #[test_case(Connecting, Disconnected ; "connect failed")]
    #[test_case(Receiving, ShuttingDown ; "cutoff")]
    #[test_case(Disconnected, ShuttingDown ; "cutoff while reconnecting")]
    #[test_case(ShuttingDown, Stopped ; "drained")]
    #[test_case(Disconnected, Failed ; "no credential")]
    fn allowed(from: SessionState, to: SessionState) {
        assert!(from.can_transition_to(to));
    }

    #[test_case(Disconnected, Receiving ; "skip connect")]
    #[test_case(ShuttingDown, Disconnected ; "reconnect after cutoff")]
    #[test_case(ShuttingDown, Failed ; "fail while draining")]
    #[test_case(Stopped, Connecting ; "restart stopped")]
    #[test_case(Failed, Disconnected ; "leave failed")]
    #[test_case(Disconnected, Subscribed ; "subscribe without connect")]
    fn forbidden(from: SessionState, to: SessionState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn machine_counts_reconnects() {
        let mut machine = SessionStateMachine::new();
        machine.transition(Connecting).unwrap();
        machine.transition(Subscribed).unwrap();
        machine.transition(Receiving).unwrap();
        machine.transition(Disconnected).unwrap();
        machine.transition(Connecting).unwrap();
        machine.transition(Disconnected).unwrap();

        assert_eq!(machine.reconnects(), 1);
        assert_eq!(machine.state(), Disconnected);
    }

    #[test]
    fn rejected_transition_keeps_state() {
        let mut machine = SessionStateMachine::new();
        let err = machine.transition(Stopped).unwrap_err();
        assert_eq!(err.from, Disconnected);
        assert_eq!(machine.state(), Disconnected);
    }

    #[test]
    fn terminal_states() {
        assert!(Stopped.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!ShuttingDown.is_terminal());
        assert!(Receiving.is_ready());
    }
}
