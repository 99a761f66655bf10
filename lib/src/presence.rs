//! Device liveness and heart-rate sample records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application lifecycle state reported by the presence heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Active,
    Background,
    Terminated,
}

impl AppState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Background => write!(f, "background"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Record at `presence/{userId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub is_active: bool,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_change_reason: Option<AppState>,
}

impl PresenceRecord {
    pub fn new(state: AppState, include_timestamp: bool) -> Self {
        Self {
            is_active: state.is_active(),
            last_connected: include_timestamp.then(Utc::now),
            state_change_reason: Some(state),
        }
    }
}

/// Record at `heartRates/{userId}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSample {
    pub bpm: u16,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl HeartRateSample {
    pub fn now(bpm: u16) -> Self {
        Self {
            bpm,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_without_timestamp_omits_key() {
        let v = serde_json::to_value(PresenceRecord::new(AppState::Background, false)).unwrap();
        assert_eq!(v["isActive"], false);
        assert_eq!(v["stateChangeReason"], "background");
        assert!(v.get("lastConnected").is_none());
    }

    #[test]
    fn presence_with_timestamp() {
        let rec = PresenceRecord::new(AppState::Active, true);
        assert!(rec.is_active);
        assert!(rec.last_connected.is_some());
        let back: PresenceRecord =
            serde_json::from_value(serde_json::to_value(&rec).unwrap()).unwrap();
        assert_eq!(back.state_change_reason, Some(AppState::Active));
    }
}
