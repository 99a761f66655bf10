//! Per-game state channel: own slot publishing, opponent mirroring, round
//! outcome and win tally.
//!
//! Each client writes only its own role's slot. The opponent's slot is
//! observed and diffed locally.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::store::{SharedStateStore, Snapshot, StoreError, StoreExt, ValueSubscription};
use pulsepair::{
    GameKind, GameStatus, GameStatusRecord, PlayerSlot, PlayerUpdate, Role, WinTally, paths,
};

pub struct GameStateChannel {
    store: Arc<dyn SharedStateStore>,
    session_id: String,
    kind: GameKind,
    role: Role,
}

impl GameStateChannel {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        session_id: impl Into<String>,
        kind: GameKind,
        role: Role,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            kind,
            role,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Write the present keys of `update` into the caller's own slot.
    pub fn publish_self(&self, update: &PlayerUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        self.store.update_from(&self.slot_path(self.role), update)
    }

    pub fn read_slot(&self, role: Role) -> Result<PlayerSlot, StoreError> {
        Ok(self
            .store
            .get_as::<PlayerSlot>(&self.slot_path(role))?
            .unwrap_or_default())
    }

    pub fn subscribe_opponent(&self) -> Result<ValueSubscription, StoreError> {
        self.store.observe_value(&self.slot_path(self.role.opponent()))
    }

    /// Report that the local player topped out. The caller is the loser.
    pub fn publish_game_over(&self) -> Result<GameStatusRecord, StoreError> {
        let record = GameStatusRecord::game_over(self.role);
        self.store
            .set_as(&paths::game_status(&self.session_id, self.kind), &record)?;
        info!("channel: {} reported game over in {}", self.role, self.session_id);
        Ok(record)
    }

    pub fn reset_game_status(&self) -> Result<(), StoreError> {
        self.store.set_as(
            &paths::game_status(&self.session_id, self.kind),
            &GameStatusRecord::playing(),
        )
    }

    pub fn subscribe_game_status(&self) -> Result<ValueSubscription, StoreError> {
        self.store
            .observe_value(&paths::game_status(&self.session_id, self.kind))
    }

    pub fn reset_tally(&self) -> Result<(), StoreError> {
        self.store
            .set_as(&paths::wins(&self.session_id, self.kind), &WinTally::default())
    }

    /// Atomically add one win for `winner`. Returns the new count.
    pub fn credit_win(&self, winner: Role) -> Result<u32, StoreError> {
        let path = paths::wins(&self.session_id, self.kind).child(winner.wins_key());
        let count = self.store.increment(&path, 1)?;
        info!("channel: credited win to {winner} in {} ({count})", self.session_id);
        Ok(count.max(0) as u32)
    }

    pub fn tally(&self) -> Result<WinTally, StoreError> {
        Ok(self
            .store
            .get_as::<WinTally>(&paths::wins(&self.session_id, self.kind))?
            .unwrap_or_default())
    }

    pub fn subscribe_tally(&self) -> Result<ValueSubscription, StoreError> {
        self.store
            .observe_value(&paths::wins(&self.session_id, self.kind))
    }

    fn slot_path(&self, role: Role) -> pulsepair::StorePath {
        paths::player(&self.session_id, self.kind, role)
    }
}

// ---------------------------------------------------------------------------
// Opponent mirror
// ---------------------------------------------------------------------------

/// What changed in the opponent's slot since the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorDelta {
    pub score: u32,
    pub score_changed: bool,
    pub field_changed: bool,
}

/// Local copy of the opponent's slot, diffed per snapshot.
#[derive(Debug, Default)]
pub struct OpponentMirror {
    slot: PlayerSlot,
}

impl OpponentMirror {
    pub fn slot(&self) -> &PlayerSlot {
        &self.slot
    }

    /// Apply a snapshot of the opponent's slot. A missing slot reads as the
    /// default (empty field, zero score). Returns `None` when neither score
    /// nor field changed.
    pub fn apply(&mut self, snapshot: &Snapshot) -> Result<Option<MirrorDelta>, StoreError> {
        let next = snapshot.decode::<PlayerSlot>()?.unwrap_or_default();
        let delta = MirrorDelta {
            score: next.score,
            score_changed: next.score != self.slot.score,
            field_changed: next.field != self.slot.field,
        };
        self.slot = next;
        if delta.score_changed || delta.field_changed {
            Ok(Some(delta))
        } else {
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Round judge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundVerdict {
    Playing,
    /// The opponent lost; credit the local role.
    Won,
    /// The local role lost.
    Lost,
    /// Older than the staleness window; a leftover from an earlier session.
    Stale,
    /// This exact record was already judged.
    Duplicate,
}

/// Judges observed `gameOver` records. Guards against stale records and
/// against crediting the same record twice when a snapshot is redelivered.
#[derive(Debug)]
pub struct RoundJudge {
    role: Role,
    window: chrono::Duration,
    last_judged: Option<DateTime<Utc>>,
}

impl RoundJudge {
    pub fn new(role: Role, window: chrono::Duration) -> Self {
        Self {
            role,
            window,
            last_judged: None,
        }
    }

    pub fn judge(&mut self, record: &GameStatusRecord, now: DateTime<Utc>) -> RoundVerdict {
        if record.game_status == GameStatus::Playing {
            return RoundVerdict::Playing;
        }
        if record.is_stale(now, self.window) {
            debug!("judge: ignoring stale gameOver from {}", record.timestamp);
            return RoundVerdict::Stale;
        }
        if self.last_judged == Some(record.timestamp) {
            return RoundVerdict::Duplicate;
        }
        self.last_judged = Some(record.timestamp);
        match record.loser_role {
            Some(loser) if loser == self.role => RoundVerdict::Lost,
            Some(_) => RoundVerdict::Won,
            // Legacy records without a loser cannot be attributed.
            None => RoundVerdict::Stale,
        }
    }
}
