//! Per-game records: player slots, round outcome, win tally, reset and
//! attack records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Role;

/// Cell code in a field. `0` is empty; other values are game-defined.
pub type CellCode = u8;

pub const EMPTY_CELL: CellCode = 0;

/// Cell code used for injected garbage rows.
pub const GARBAGE_CELL: CellCode = 8;

/// Largest garbage batch a single clear can send.
pub const MAX_GARBAGE_PER_CLEAR: u32 = 4;

/// Garbage lines owed to the opponent for clearing `lines` rows at once.
///
/// 1 → 0, 2 → 1, 3 → 2, 4 → 4. Clears larger than four are capped at the
/// four-row reward.
pub fn garbage_for_lines(lines: u32) -> u32 {
    match lines {
        0 | 1 => 0,
        2 => 1,
        3 => 2,
        _ => MAX_GARBAGE_PER_CLEAR,
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// A 2D grid of cell codes, rows ordered top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Field {
    rows: Vec<Vec<CellCode>>,
}

impl Field {
    pub fn empty(columns: usize, rows: usize) -> Self {
        Self {
            rows: vec![vec![EMPTY_CELL; columns]; rows],
        }
    }

    pub fn from_rows(rows: Vec<Vec<CellCode>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<CellCode>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<CellCode> {
        self.rows.get(row).and_then(|r| r.get(column)).copied()
    }

    /// Number of rows (from the bottom) made entirely of garbage cells
    /// with a single hole.
    pub fn garbage_rows_at_bottom(&self) -> usize {
        self.rows
            .iter()
            .rev()
            .take_while(|row| {
                let holes = row.iter().filter(|&&c| c == EMPTY_CELL).count();
                let garbage = row.iter().filter(|&&c| c == GARBAGE_CELL).count();
                holes == 1 && garbage + 1 == row.len()
            })
            .count()
    }

    pub fn occupied_cells(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .filter(|&&c| c != EMPTY_CELL)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Player slot
// ---------------------------------------------------------------------------

/// A role's authoritative slot at `games/{sid}/{kind}/players/{role}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlot {
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub field: Field,
    #[serde(default)]
    pub pending_attack_lines: u32,
}

/// Partial write to the caller's own slot. Only the keys that are `Some`
/// are written; everything else in the slot is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
}

impl PlayerUpdate {
    pub fn score(score: u32) -> Self {
        Self {
            score: Some(score),
            field: None,
        }
    }

    pub fn field(field: Field) -> Self {
        Self {
            score: None,
            field: Some(field),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.score.is_none() && self.field.is_none()
    }
}

// ---------------------------------------------------------------------------
// Round outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    Playing,
    GameOver,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playing => write!(f, "playing"),
            Self::GameOver => write!(f, "gameOver"),
        }
    }
}

/// Record at `games/{sid}/{kind}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatusRecord {
    pub game_status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loser_role: Option<Role>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl GameStatusRecord {
    pub fn playing() -> Self {
        Self {
            game_status: GameStatus::Playing,
            loser_role: None,
            timestamp: Utc::now(),
        }
    }

    pub fn game_over(loser: Role) -> Self {
        Self {
            game_status: GameStatus::GameOver,
            loser_role: Some(loser),
            timestamp: Utc::now(),
        }
    }

    /// Whether this record is older than `window` relative to `now`.
    /// Records stamped in the future (clock skew) are never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) > window
    }
}

/// Record at `games/{sid}/{kind}/wins`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinTally {
    #[serde(default)]
    pub creator_wins: u32,
    #[serde(default)]
    pub invited_wins: u32,
}

impl WinTally {
    pub fn wins(&self, role: Role) -> u32 {
        match role {
            Role::Creator => self.creator_wins,
            Role::Invited => self.invited_wins,
        }
    }
}

/// Record at `games/{sid}/{kind}/reset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRecord {
    pub reset_flag: bool,
    pub initiator: Role,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ResetRecord {
    pub fn raised(initiator: Role) -> Self {
        Self {
            reset_flag: true,
            initiator,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Attack records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttackKind {
    Garbage,
}

/// Record pushed under `games/{sid}/{kind}/attacks/{fromRole}/{autoId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackRecord {
    #[serde(rename = "type")]
    pub kind: AttackKind,
    pub count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl AttackRecord {
    pub fn garbage(count: u32) -> Self {
        Self {
            kind: AttackKind::Garbage,
            count,
            timestamp: Utc::now(),
        }
    }
}
