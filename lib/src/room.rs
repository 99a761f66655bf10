//! Room records: the shared session coordinating two participants.
//!
//! Serialized field names and enum spellings match what is stored under
//! `rooms/{sessionId}`, including the capitalised `"Connected"` status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A participant's position in a session. Fixed at room creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Invited,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Creator, Role::Invited];

    /// The other side of the session.
    pub fn opponent(self) -> Role {
        match self {
            Role::Creator => Role::Invited,
            Role::Invited => Role::Creator,
        }
    }

    /// Store key segment for this role.
    pub fn key(self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Invited => "invited",
        }
    }

    /// Key of this role's counter inside the wins record.
    pub fn wins_key(self) -> &'static str {
        match self {
            Role::Creator => "creatorWins",
            Role::Invited => "invitedWins",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Peer-visible connection state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "Connected")]
    Connected,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl RoomStatus {
    /// Whether `self -> next` is a legal transition within one matchmaking
    /// attempt. Re-entry after cancellation (`cancelled -> waiting`) is the
    /// only way back to the start.
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        use RoomStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (_, Cancelled) => true,
            (Waiting, Ready) | (Waiting, Connected) | (Ready, Connected) => true,
            (Cancelled, Waiting) => true,
            // Disconnect propagation: a torn-down room may be re-opened as waiting.
            (Connected, Waiting) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Connected => "Connected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which game a room is currently used for. Mutable: a room can be
/// repurposed when the pair picks another game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "camelCase")]
pub enum GameKind {
    Tetris,
    Othello,
    CardGame,
    HeartRate,
}

impl GameKind {
    pub fn key(self) -> &'static str {
        match self {
            Self::Tetris => "tetris",
            Self::Othello => "othello",
            Self::CardGame => "cardGame",
            Self::HeartRate => "heartRate",
        }
    }

    /// Real-time kinds exchange board state and attacks continuously.
    pub fn is_realtime(self) -> bool {
        matches!(self, Self::Tetris)
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Session id for an ordered participant pair: `"{first}_{second}"`.
pub fn session_id(first: &str, second: &str) -> String {
    format!("{first}_{second}")
}

/// Stored room record at `rooms/{sessionId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub creator_id: String,
    pub invited_id: String,
    pub game_kind: GameKind,
    pub status: RoomStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl RoomRecord {
    pub fn new(creator_id: &str, invited_id: &str, game_kind: GameKind) -> Self {
        Self {
            creator_id: creator_id.to_string(),
            invited_id: invited_id.to_string(),
            game_kind,
            status: RoomStatus::Waiting,
            updated_at: Utc::now(),
        }
    }

    /// Role of `user_id` in this room, if it is a participant.
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if self.creator_id == user_id {
            Some(Role::Creator)
        } else if self.invited_id == user_id {
            Some(Role::Invited)
        } else {
            None
        }
    }

    pub fn participant(&self, role: Role) -> &str {
        match role {
            Role::Creator => &self.creator_id,
            Role::Invited => &self.invited_id,
        }
    }
}

/// Invitation appended to a peer's notification inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    #[serde(rename = "type")]
    pub kind: String,
    pub from_id: String,
    pub session_id: String,
    pub game_kind: GameKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Invitation {
    pub const KIND: &'static str = "gameInvite";

    pub fn new(from_id: &str, session_id: &str, game_kind: GameKind) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            from_id: from_id.to_string(),
            session_id: session_id.to_string(),
            game_kind,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_spellings() {
        assert_eq!(
            serde_json::to_value(RoomStatus::Connected).unwrap(),
            serde_json::json!("Connected")
        );
        assert_eq!(
            serde_json::from_value::<RoomStatus>(serde_json::json!("cancelled")).unwrap(),
            RoomStatus::Cancelled
        );
    }

    #[test]
    fn connected_never_falls_back_to_ready() {
        assert!(!RoomStatus::Connected.can_transition_to(RoomStatus::Ready));
        assert!(RoomStatus::Waiting.can_transition_to(RoomStatus::Ready));
        assert!(RoomStatus::Ready.can_transition_to(RoomStatus::Connected));
        assert!(RoomStatus::Connected.can_transition_to(RoomStatus::Cancelled));
        assert!(!RoomStatus::Cancelled.can_transition_to(RoomStatus::Connected));
    }

    #[test]
    fn room_record_roles() {
        let room = RoomRecord::new("alice", "bob", GameKind::Tetris);
        assert_eq!(room.role_of("alice"), Some(Role::Creator));
        assert_eq!(room.role_of("bob"), Some(Role::Invited));
        assert_eq!(room.role_of("carol"), None);
        assert_eq!(room.participant(Role::Invited), "bob");
        assert_eq!(Role::Creator.opponent(), Role::Invited);
    }

    #[test]
    fn room_record_camel_case_keys() {
        let room = RoomRecord::new("a", "b", GameKind::CardGame);
        let v = serde_json::to_value(&room).unwrap();
        assert_eq!(v["creatorId"], "a");
        assert_eq!(v["gameKind"], "cardGame");
        assert_eq!(v["status"], "waiting");
        assert!(v["updatedAt"].is_i64());
    }
}
