//! Room directory: rendezvous of two participants on one room record.
//!
//! There is no matchmaker. Both clients compute the two possible session
//! ids for their pair, reuse whichever exists and otherwise create one. The
//! second arrival's `waiting -> ready` write is what unblocks the first
//! arrival's status listener.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::SessionError;
use crate::store::{SharedStateStore, StoreExt, TxDecision};
use pulsepair::{GameKind, Invitation, Role, RoomRecord, RoomStatus, paths, session_id};

/// What `resolve_or_create` did to reach the returned room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// No room existed; a new one was created with the caller as creator.
    Created,
    /// The room was cancelled and has been reset to `waiting`.
    Reactivated,
    /// The caller is the invited participant and flipped `waiting -> ready`.
    Joined,
    /// Idempotent re-entry (app relaunch, creator returning, already joined).
    Rejoined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub session_id: String,
    pub role: Role,
    pub status: RoomStatus,
    pub outcome: ResolveOutcome,
}

pub struct RoomDirectory {
    store: Arc<dyn SharedStateStore>,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn SharedStateStore>) -> Self {
        Self { store }
    }

    /// Find the canonical room for a pair, if any.
    ///
    /// When both orderings exist the lexicographically smaller session id
    /// wins, so every client picks the same one.
    pub fn find(&self, a: &str, b: &str) -> Result<Option<(String, RoomRecord)>, SessionError> {
        let forward = session_id(a, b);
        let reverse = session_id(b, a);
        let fwd = self.store.get_as::<RoomRecord>(&paths::room(&forward))?;
        let rev = self.store.get_as::<RoomRecord>(&paths::room(&reverse))?;
        Ok(match (fwd, rev) {
            (Some(f), Some(r)) => {
                warn!("directory: both {forward} and {reverse} exist, using the smaller id");
                if forward <= reverse {
                    Some((forward, f))
                } else {
                    Some((reverse, r))
                }
            }
            (Some(f), None) => Some((forward, f)),
            (None, Some(r)) => Some((reverse, r)),
            (None, None) => None,
        })
    }

    /// Resolve the pair `(self_id, peer_id)` to a room for `game_kind`,
    /// creating or re-activating it as needed.
    pub fn resolve_or_create(
        &self,
        self_id: &str,
        peer_id: &str,
        game_kind: GameKind,
    ) -> Result<Resolution, SessionError> {
        validate_participants(self_id, peer_id)?;

        let Some((sid, room)) = self.find(self_id, peer_id)? else {
            return self.create(self_id, peer_id, game_kind);
        };

        let role = room
            .role_of(self_id)
            .ok_or_else(|| SessionError::NotParticipant {
                user: self_id.to_string(),
                session_id: sid.clone(),
            })?;

        // Decide against the value in the store, not the copy read above.
        let mut decided: Option<(RoomStatus, ResolveOutcome)> = None;
        let status_path = paths::room_status(&sid);
        self.store
            .run_transaction(&status_path, &mut |current: Option<&Value>| {
                let current = current
                    .and_then(|v| serde_json::from_value::<RoomStatus>(v.clone()).ok())
                    .unwrap_or(RoomStatus::Waiting);
                let (next, outcome) = match next_status(current, role) {
                    (next, outcome) if current.can_transition_to(next) => (next, outcome),
                    _ => (current, ResolveOutcome::Rejoined),
                };
                decided = Some((next, outcome));
                if next == current {
                    TxDecision::Abort
                } else {
                    TxDecision::Commit(Value::from(next.as_str()))
                }
            })?;
        let (status, outcome) = decided.unwrap_or((room.status, ResolveOutcome::Rejoined));

        let mut fields = Map::new();
        fields.insert("gameKind".into(), serde_json::to_value(game_kind)?);
        fields.insert("updatedAt".into(), Value::from(Utc::now().timestamp_millis()));
        self.store.update(&paths::room(&sid), fields)?;

        if outcome == ResolveOutcome::Reactivated {
            self.send_invitation(self_id, peer_id, &sid, game_kind);
        }

        info!("directory: {self_id} -> room {sid} as {role} ({outcome:?}, status {status})");
        Ok(Resolution {
            session_id: sid,
            role,
            status,
            outcome,
        })
    }

    fn create(
        &self,
        self_id: &str,
        peer_id: &str,
        game_kind: GameKind,
    ) -> Result<Resolution, SessionError> {
        let sid = session_id(self_id, peer_id);
        let room = RoomRecord::new(self_id, peer_id, game_kind);
        self.store.set_as(&paths::room(&sid), &room)?;
        self.send_invitation(self_id, peer_id, &sid, game_kind);
        info!("directory: {self_id} created room {sid} for {game_kind}");
        Ok(Resolution {
            session_id: sid,
            role: Role::Creator,
            status: RoomStatus::Waiting,
            outcome: ResolveOutcome::Created,
        })
    }

    /// Append an invitation to the peer's inbox. Delivery is someone else's
    /// problem; a failed write is logged and dropped.
    fn send_invitation(&self, from: &str, to: &str, sid: &str, game_kind: GameKind) {
        let invite = Invitation::new(from, sid, game_kind);
        if let Err(e) = self.store.push_as(&paths::notifications(to), &invite) {
            warn!("directory: failed to send invitation to {to}: {e}");
        }
    }
}

/// Status a caller with `role` moves an existing room to.
fn next_status(current: RoomStatus, role: Role) -> (RoomStatus, ResolveOutcome) {
    match current {
        RoomStatus::Cancelled => (RoomStatus::Waiting, ResolveOutcome::Reactivated),
        RoomStatus::Waiting if role == Role::Invited => (RoomStatus::Ready, ResolveOutcome::Joined),
        other => (other, ResolveOutcome::Rejoined),
    }
}

fn validate_participants(self_id: &str, peer_id: &str) -> Result<(), SessionError> {
    for id in [self_id, peer_id] {
        if id.is_empty() {
            return Err(SessionError::InvalidParticipants("empty id".into()));
        }
        if id.contains('/') {
            return Err(SessionError::InvalidParticipants(format!(
                "id {id:?} contains '/'"
            )));
        }
    }
    if self_id == peer_id {
        return Err(SessionError::InvalidParticipants(format!(
            "cannot pair {self_id} with itself"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pulsepair::StorePath;

    fn directory() -> (MemoryStore, RoomDirectory) {
        let store = MemoryStore::new();
        let dir = RoomDirectory::new(Arc::new(store.clone()));
        (store, dir)
    }

    fn invitations(store: &MemoryStore, user: &str) -> usize {
        store
            .get(&paths::notifications(user))
            .unwrap()
            .and_then(|v| v.as_object().map(|m| m.len()))
            .unwrap_or(0)
    }

    #[test]
    fn first_arrival_creates_room() {
        let (store, dir) = directory();
        let res = dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        assert_eq!(res.session_id, "alice_bob");
        assert_eq!(res.role, Role::Creator);
        assert_eq!(res.status, RoomStatus::Waiting);
        assert_eq!(res.outcome, ResolveOutcome::Created);
        assert_eq!(invitations(&store, "bob"), 1);
    }

    #[test]
    fn both_call_orders_converge() {
        for (first, second) in [("alice", "bob"), ("bob", "alice")] {
            let (_store, dir) = directory();
            let a = dir.resolve_or_create(first, second, GameKind::Tetris).unwrap();
            let b = dir.resolve_or_create(second, first, GameKind::Tetris).unwrap();
            assert_eq!(a.session_id, b.session_id);
            assert_eq!(a.session_id, session_id(first, second));
            assert_eq!(b.role, Role::Invited);
            assert_eq!(b.status, RoomStatus::Ready);
            assert_eq!(b.outcome, ResolveOutcome::Joined);
        }
    }

    #[test]
    fn reentry_is_idempotent() {
        let (_store, dir) = directory();
        dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        dir.resolve_or_create("bob", "alice", GameKind::Tetris).unwrap();
        let again = dir.resolve_or_create("bob", "alice", GameKind::Tetris).unwrap();
        assert_eq!(again.status, RoomStatus::Ready);
        assert_eq!(again.outcome, ResolveOutcome::Rejoined);
        let creator = dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        assert_eq!(creator.status, RoomStatus::Ready);
        assert_eq!(creator.role, Role::Creator);
    }

    #[test]
    fn creator_reentry_keeps_waiting() {
        let (_store, dir) = directory();
        dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        let again = dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        assert_eq!(again.status, RoomStatus::Waiting);
        assert_eq!(again.outcome, ResolveOutcome::Rejoined);
    }

    #[test]
    fn cancelled_room_is_reactivated_and_reinvites() {
        let (store, dir) = directory();
        dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        store
            .set_as(&paths::room_status("alice_bob"), &RoomStatus::Cancelled)
            .unwrap();
        let res = dir.resolve_or_create("bob", "alice", GameKind::Othello).unwrap();
        assert_eq!(res.session_id, "alice_bob");
        assert_eq!(res.status, RoomStatus::Waiting);
        assert_eq!(res.outcome, ResolveOutcome::Reactivated);
        assert_eq!(invitations(&store, "alice"), 1);

        let room: RoomRecord = store.get_as(&paths::room("alice_bob")).unwrap().unwrap();
        assert_eq!(room.game_kind, GameKind::Othello);
        assert_eq!(room.creator_id, "alice");
    }

    #[test]
    fn connected_room_never_drops_to_ready() {
        let (store, dir) = directory();
        dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        store
            .set_as(&paths::room_status("alice_bob"), &RoomStatus::Connected)
            .unwrap();
        let res = dir.resolve_or_create("bob", "alice", GameKind::Tetris).unwrap();
        assert_eq!(res.status, RoomStatus::Connected);
    }

    #[test]
    fn dual_rooms_resolve_to_smaller_id() {
        let (store, dir) = directory();
        for (sid, creator, invited) in [("bob_alice", "bob", "alice"), ("alice_bob", "alice", "bob")] {
            store
                .set_as(
                    &paths::room(sid),
                    &RoomRecord::new(creator, invited, GameKind::Tetris),
                )
                .unwrap();
        }
        let from_bob = dir.resolve_or_create("bob", "alice", GameKind::Tetris).unwrap();
        let from_alice = dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        assert_eq!(from_bob.session_id, "alice_bob");
        assert_eq!(from_alice.session_id, "alice_bob");
        assert_eq!(from_bob.role, Role::Invited);
    }

    #[test]
    fn rejects_bad_participants() {
        let (_store, dir) = directory();
        for (a, b) in [("", "bob"), ("alice", "alice"), ("a/b", "c")] {
            assert!(matches!(
                dir.resolve_or_create(a, b, GameKind::Tetris),
                Err(SessionError::InvalidParticipants(_))
            ));
        }
    }

    #[test]
    fn stranger_is_not_a_participant() {
        let (store, dir) = directory();
        // A room under the pair's id whose record names someone else.
        store
            .set_as(
                &StorePath::parse("rooms/alice_bob"),
                &RoomRecord::new("carol", "bob", GameKind::Tetris),
            )
            .unwrap();
        assert!(matches!(
            dir.resolve_or_create("alice", "bob", GameKind::Tetris),
            Err(SessionError::NotParticipant { .. })
        ));
    }

    #[test]
    fn next_status_only_proposes_legal_transitions() {
        use RoomStatus::*;
        for current in [Waiting, Ready, Connected, Cancelled] {
            for role in [Role::Creator, Role::Invited] {
                let (next, _) = next_status(current, role);
                assert!(current.can_transition_to(next), "{current} -> {next} as {role}");
            }
        }
    }
}
