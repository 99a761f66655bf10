//! Session bus message types.
//!
//! Everything a rendering layer needs to know about a running session flows
//! as a `SessionMessage` on a single broadcast channel. Each message has a
//! source (the participant that produced it), a timestamp and a typed event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Role, WinTally};

// ---------------------------------------------------------------------------
// Top-level message
// ---------------------------------------------------------------------------

/// A single event on the session bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub event: SessionEvent,
}

impl SessionMessage {
    /// Create a new message with the current UTC timestamp.
    pub fn new(event: impl Into<SessionEvent>) -> Self {
        Self {
            source: String::new(),
            timestamp: Utc::now(),
            event: event.into(),
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl From<AlertMessage> for SessionEvent {
    fn from(alert: AlertMessage) -> Self {
        SessionEvent::Alert(alert)
    }
}

impl From<WinTally> for SessionEvent {
    fn from(tally: WinTally) -> Self {
        SessionEvent::TallyUpdated {
            creator_wins: tally.creator_wins,
            invited_wins: tally.invited_wins,
        }
    }
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// The typed event payload carried by a `SessionMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The invited participant arrived (`waiting -> ready`).
    PeerJoined,
    /// The room entered `Connected`.
    Connected,
    /// The peer left or tore down its view while connected. Emitted at most
    /// once per session view; the UI acknowledges and returns to a neutral
    /// screen.
    PeerDisconnected,
    /// The opponent's mirrored slot changed.
    OpponentUpdated { score: u32, field_changed: bool },
    /// An attack record from the opponent was consumed.
    AttackReceived { count: u32 },
    /// Garbage rows were inserted into the local board.
    GarbageApplied { lines: u32 },
    /// The opponent lost a round; the local win was credited.
    RoundWon,
    /// The local player lost a round.
    RoundLost,
    TallyUpdated { creator_wins: u32, invited_wins: u32 },
    /// The local engine was restarted in response to a reset record.
    Restarted { initiator: Role },
    Alert(AlertMessage),
}

// ---------------------------------------------------------------------------
// AlertMessage: user-visible warn/error notifications
// ---------------------------------------------------------------------------

/// Severity level for alert messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warn,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Warn => write!(f, "warn"),
            AlertLevel::Error => write!(f, "error"),
        }
    }
}

/// A user-visible alert. Info/debug/trace stays in the tracing backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub level: AlertLevel,
    pub message: String,
}
