//! Round reset signalling.
//!
//! Either peer raises the reset flag with itself as initiator. Both sides
//! restart their local game when they observe a fresh raised record; only
//! the non-initiator clears the flag, after a short delay, and only if the
//! record it handled is still the current one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::store::{SharedStateStore, Snapshot, StoreError, StoreExt, TxDecision, ValueSubscription};
use pulsepair::{GameKind, ResetRecord, Role, StorePath, paths};

pub struct ResetSignal {
    store: Arc<dyn SharedStateStore>,
    session_id: String,
    kind: GameKind,
    role: Role,
    clear_delay: Duration,
    last_handled: Option<DateTime<Utc>>,
    pending_clear: Option<(Instant, DateTime<Utc>)>,
}

impl ResetSignal {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        session_id: impl Into<String>,
        kind: GameKind,
        role: Role,
        clear_delay: Duration,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            kind,
            role,
            clear_delay,
            last_handled: None,
            pending_clear: None,
        }
    }

    /// Raise the reset flag with the local role as initiator.
    pub fn notify_reset(&self) -> Result<ResetRecord, StoreError> {
        let record = ResetRecord::raised(self.role);
        self.store.set_as(&self.path(), &record)?;
        info!("reset: {} raised reset in {}", self.role, self.session_id);
        Ok(record)
    }

    pub fn subscribe(&self) -> Result<ValueSubscription, StoreError> {
        self.store.observe_value(&self.path())
    }

    /// Feed one reset snapshot. Returns the initiator when the local game
    /// must restart. Each raised record is handled once.
    pub fn observe(&mut self, snapshot: &Snapshot, now: Instant) -> Result<Option<Role>, StoreError> {
        let Some(record) = snapshot.decode::<ResetRecord>()? else {
            return Ok(None);
        };
        if !record.reset_flag || self.last_handled == Some(record.timestamp) {
            return Ok(None);
        }
        self.last_handled = Some(record.timestamp);
        if record.initiator != self.role {
            self.pending_clear = Some((now + self.clear_delay, record.timestamp));
            debug!("reset: clear scheduled in {:?}", self.clear_delay);
        }
        info!("reset: {} restarting (initiated by {})", self.role, record.initiator);
        Ok(Some(record.initiator))
    }

    /// Clear the flag if a scheduled clear is due. Returns `true` when the
    /// store was written.
    pub fn poll_clear(&mut self, now: Instant) -> Result<bool, StoreError> {
        let Some((due, stamp)) = self.pending_clear else {
            return Ok(false);
        };
        if now < due {
            return Ok(false);
        }
        self.pending_clear = None;

        let stamp_ms = stamp.timestamp_millis();
        let result = self
            .store
            .run_transaction(&self.path(), &mut |current: Option<&Value>| {
                let Some(mut record) =
                    current.and_then(|v| serde_json::from_value::<ResetRecord>(v.clone()).ok())
                else {
                    return TxDecision::Abort;
                };
                // A newer raise landed since; leave it for its own handling.
                if !record.reset_flag || record.timestamp.timestamp_millis() != stamp_ms {
                    return TxDecision::Abort;
                }
                record.reset_flag = false;
                match serde_json::to_value(&record) {
                    Ok(value) => TxDecision::Commit(value),
                    Err(_) => TxDecision::Abort,
                }
            })?;
        if result.committed {
            debug!("reset: {} cleared flag", self.role);
        }
        Ok(result.committed)
    }

    pub fn has_pending_clear(&self) -> bool {
        self.pending_clear.is_some()
    }

    fn path(&self) -> StorePath {
        paths::reset(&self.session_id, self.kind)
    }
}
