//! Connection lifecycle states and their legal transitions.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a [`ReverseConnection`](crate::ReverseConnection).
///
/// ```text
///   Idle ──► Connecting ──► Connected
///    │        │    ▲           │
///    │        ▼    │           ▼
///    │       Backoff ◄─────────┘
///    │        │
///    └────────┴──► Stopped ◄── (Connecting, Connected)
/// ```
///
/// `Disabled` is entered at construction and never left. `Stopped` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    Disabled,
    Idle,
    Connecting,
    Connected,
    Backoff,
    Stopped,
}

impl ConnState {
    pub fn can_transition_to(self, next: ConnState) -> bool {
        use ConnState::{Backoff, Connected, Connecting, Idle, Stopped};

        matches!(
            (self, next),
            (Idle, Connecting | Stopped)
                | (Connecting, Connected | Backoff | Stopped)
                | (Connected, Backoff | Stopped)
                | (Backoff, Connecting | Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disabled | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the current state and publishes changes.
///
/// Only the manager loop writes; any number of observers may watch.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnState>,
}

impl StateCell {
    pub(crate) fn new(initial: ConnState) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    pub(crate) fn get(&self) -> ConnState {
        *self.tx.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnState> {
        self.tx.subscribe()
    }

    /// Applies `next` if the transition is legal. An illegal transition is a
    /// bug in the manager loop; it is logged and ignored.
    pub(crate) fn advance(&self, next: ConnState) -> bool {
        let mut from = None;
        let applied = self.tx.send_if_modified(|state| {
            from = Some(*state);
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if applied {
            tracing::debug!(from = ?from, to = %next, "state transition");
        } else {
            tracing::error!(from = ?from, to = %next, "illegal state transition ignored");
        }
        applied
    }
}
