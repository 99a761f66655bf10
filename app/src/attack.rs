//! Garbage attack queue between the two roles.
//!
//! An attack has two halves. An append-only record under
//! `attacks/{fromRole}` gives the receiver a per-attack event, and the
//! opponent's `pendingAttackLines` counter is incremented in one
//! transaction. The receiver drains the counter when it applies garbage.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::store::{
    ChildAdded, ChildSubscription, SharedStateStore, StoreError, StoreExt, ValueSubscription,
};
use pulsepair::{AttackRecord, DrainMode, GameKind, Role, StorePath, garbage_for_lines, paths};

pub struct AttackQueue {
    store: Arc<dyn SharedStateStore>,
    session_id: String,
    kind: GameKind,
    role: Role,
    drain: DrainMode,
}

impl AttackQueue {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        session_id: impl Into<String>,
        kind: GameKind,
        role: Role,
        drain: DrainMode,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            kind,
            role,
            drain,
        }
    }

    /// Send the garbage earned by clearing `lines_cleared` lines at once.
    /// Returns the garbage line count sent; clears below two lines send
    /// nothing and touch no state.
    pub fn send_attack(&self, lines_cleared: u32) -> Result<u32, StoreError> {
        let garbage = garbage_for_lines(lines_cleared);
        if garbage == 0 {
            return Ok(0);
        }
        let key = self.store.push_as(
            &paths::attacks(&self.session_id, self.kind, self.role),
            &AttackRecord::garbage(garbage),
        )?;
        let total = self
            .store
            .increment(&self.pending_path(self.role.opponent()), i64::from(garbage))?;
        info!(
            "attack: {} cleared {lines_cleared}, sent {garbage} garbage ({key}), opponent pending {total}",
            self.role
        );
        Ok(garbage)
    }

    /// Current value of the local pending counter.
    pub fn peek_pending(&self) -> Result<u32, StoreError> {
        Ok(self
            .store
            .get_as::<u32>(&self.pending_path(self.role))?
            .unwrap_or(0))
    }

    /// Take the local pending counter, leaving zero behind.
    ///
    /// `DrainMode::Atomic` does it in one transaction. `DrainMode::ReadThenReset`
    /// reads and then overwrites, losing increments that land in between.
    pub fn drain_pending(&self) -> Result<u32, StoreError> {
        let path = self.pending_path(self.role);
        let taken = match self.drain {
            DrainMode::Atomic => self.store.take_counter(&path)?.max(0) as u32,
            DrainMode::ReadThenReset => {
                let taken = self.peek_pending()?;
                if taken > 0 {
                    self.store.set(&path, Value::from(0))?;
                }
                taken
            }
        };
        if taken > 0 {
            debug!("attack: {} drained {taken} pending lines ({})", self.role, self.drain);
        }
        Ok(taken)
    }

    pub fn reset_pending(&self) -> Result<(), StoreError> {
        self.store.set(&self.pending_path(self.role), Value::from(0))
    }

    /// Observe the local pending counter.
    pub fn subscribe_pending(&self) -> Result<ValueSubscription, StoreError> {
        self.store.observe_value(&self.pending_path(self.role))
    }

    /// Observe attack records sent by the opponent.
    pub fn subscribe_incoming(&self) -> Result<ChildSubscription, StoreError> {
        self.store.observe_child_added(&self.incoming_path())
    }

    /// Decode an incoming record and delete it from the store.
    pub fn consume(&self, child: &ChildAdded) -> Result<AttackRecord, StoreError> {
        let parent = self.incoming_path();
        let record = child.decode::<AttackRecord>(&parent);
        if let Err(e) = self.store.remove(&parent.child(&child.key)) {
            warn!("attack: failed to delete consumed record {}: {e}", child.key);
        }
        record
    }

    /// Delete every record this role has sent.
    pub fn clear_outgoing(&self) -> Result<(), StoreError> {
        self.store
            .remove(&paths::attacks(&self.session_id, self.kind, self.role))
    }

    fn pending_path(&self, role: Role) -> StorePath {
        paths::pending_attack_lines(&self.session_id, self.kind, role)
    }

    fn incoming_path(&self) -> StorePath {
        paths::attacks(&self.session_id, self.kind, self.role.opponent())
    }
}
