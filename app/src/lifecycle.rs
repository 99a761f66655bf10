//! Room status state machine as seen by one client.
//!
//! The room status is observed, cached locally and compared with the
//! previous value to derive UI-facing signals. The peer-disconnected signal
//! fires at most once, only when leaving `Connected`, and never for a
//! transition this client wrote itself.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::store::{SharedStateStore, Snapshot, StoreError, StoreExt, TxDecision, ValueSubscription};
use pulsepair::{GameKind, GameStatusRecord, Role, RoomStatus, WinTally, paths};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    PeerJoined,
    Connected,
    PeerDisconnected,
}

pub struct SessionLifecycle {
    store: Arc<dyn SharedStateStore>,
    session_id: String,
    kind: GameKind,
    role: Role,
    last_status: Option<RoomStatus>,
    /// This client saw the room `Connected` through `set_connected` and has
    /// not observed a status since.
    connect_unobserved: bool,
    self_initiated: bool,
    terminal_written: bool,
    disconnect_reported: bool,
}

impl SessionLifecycle {
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
            last_status: None,
            connect_unobserved: false,
            self_initiated: false,
            terminal_written: false,
            disconnect_reported: false,
        }
    }

    pub fn subscribe(&self) -> Result<ValueSubscription, StoreError> {
        self.store.observe_value(&paths::room_status(&self.session_id))
    }

    /// Last status seen by `observe` or written by this client.
    pub fn status(&self) -> Option<RoomStatus> {
        self.last_status
    }

    pub fn disconnect_reported(&self) -> bool {
        self.disconnect_reported
    }

    /// Move the room to `Connected`. Only legal from `waiting` or `ready`.
    ///
    /// Returns `true` when this client performed the transition. That client
    /// alone resets the win tally to 0/0 and the game status to `playing`;
    /// the peer finding the room already `Connected` gets `false`.
    pub fn set_connected(&mut self) -> Result<bool, SessionError> {
        let path = paths::room_status(&self.session_id);
        let mut seen = None;
        let tx = self
            .store
            .run_transaction(&path, &mut |current: Option<&Value>| {
                let status = current.and_then(|v| serde_json::from_value::<RoomStatus>(v.clone()).ok());
                seen = status;
                match status {
                    Some(from)
                        if from != RoomStatus::Connected
                            && from.can_transition_to(RoomStatus::Connected) =>
                    {
                        TxDecision::Commit(Value::from(RoomStatus::Connected.as_str()))
                    }
                    _ => TxDecision::Abort,
                }
            })?;

        if !tx.committed {
            return match seen {
                Some(RoomStatus::Connected) => {
                    debug!("lifecycle: {} already connected", self.session_id);
                    self.connect_unobserved = true;
                    Ok(false)
                }
                Some(from) => Err(SessionError::IllegalTransition {
                    from,
                    to: RoomStatus::Connected,
                }),
                None => Err(SessionError::RoomNotFound(self.session_id.clone())),
            };
        }

        self.connect_unobserved = true;
        self.touch()?;
        self.store
            .set_as(&paths::wins(&self.session_id, self.kind), &WinTally::default())?;
        self.store.set_as(
            &paths::game_status(&self.session_id, self.kind),
            &GameStatusRecord::playing(),
        )?;
        info!("lifecycle: {} connected by {}", self.session_id, self.role);
        Ok(true)
    }

    /// Explicit leave: write `cancelled`. The peer sees a disconnect; this
    /// client never does.
    pub fn leave(&mut self) -> Result<(), SessionError> {
        self.self_initiated = true;
        self.terminal_written = true;
        self.write_status(RoomStatus::Cancelled)?;
        info!("lifecycle: {} left {}", self.role, self.session_id);
        Ok(())
    }

    /// View teardown. Writes an implicit `cancelled` if the session was
    /// `Connected` (observed, or just set by this client) and nothing
    /// terminal was written yet. Failures are logged.
    pub fn close(&mut self) {
        let connected = self.connect_unobserved || self.last_status == Some(RoomStatus::Connected);
        if self.terminal_written || !connected {
            self.terminal_written = true;
            return;
        }
        self.self_initiated = true;
        self.terminal_written = true;
        match self.write_status(RoomStatus::Cancelled) {
            Ok(()) => info!("lifecycle: {} closed {} (implicit cancel)", self.role, self.session_id),
            Err(e) => warn!("lifecycle: implicit cancel of {} failed: {e}", self.session_id),
        }
    }

    /// Feed one room-status snapshot. Returns the signal the transition
    /// produces, if any.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Option<LifecycleSignal> {
        let next = match snapshot.decode::<RoomStatus>() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                warn!("lifecycle: ignoring undecodable status: {e}");
                return None;
            }
        };
        self.connect_unobserved = false;
        let prev = self.last_status.replace(next);
        if prev == Some(next) {
            return None;
        }
        match prev {
            Some(from) if !from.can_transition_to(next) => {
                warn!("lifecycle: {} moved {from} -> {next} outside the state machine", self.session_id)
            }
            _ => debug!("lifecycle: {} {:?} -> {next}", self.session_id, prev),
        }

        match (prev, next) {
            (Some(RoomStatus::Connected), RoomStatus::Cancelled | RoomStatus::Waiting) => {
                if self.self_initiated || self.disconnect_reported {
                    None
                } else {
                    self.disconnect_reported = true;
                    info!("lifecycle: peer left {}", self.session_id);
                    Some(LifecycleSignal::PeerDisconnected)
                }
            }
            (_, RoomStatus::Ready) => Some(LifecycleSignal::PeerJoined),
            (_, RoomStatus::Connected) => Some(LifecycleSignal::Connected),
            _ => None,
        }
    }

    fn write_status(&mut self, status: RoomStatus) -> Result<(), StoreError> {
        self.store
            .set_as(&paths::room_status(&self.session_id), &status)?;
        self.touch()?;
        self.last_status = Some(status);
        Ok(())
    }

    fn touch(&self) -> Result<(), StoreError> {
        self.store.set(
            &paths::room(&self.session_id).child("updatedAt"),
            Value::from(Utc::now().timestamp_millis()),
        )
    }
}

impl Drop for SessionLifecycle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RoomDirectory;
    use crate::store::MemoryStore;
    use pulsepair::GameStatus;

    fn setup() -> (MemoryStore, SessionLifecycle, SessionLifecycle) {
        let store = MemoryStore::new();
        let shared: Arc<dyn SharedStateStore> = Arc::new(store.clone());
        let dir = RoomDirectory::new(shared.clone());
        let a = dir.resolve_or_create("alice", "bob", GameKind::Tetris).unwrap();
        let b = dir.resolve_or_create("bob", "alice", GameKind::Tetris).unwrap();
        (
            store,
            SessionLifecycle::new(shared.clone(), a.session_id, GameKind::Tetris, a.role),
            SessionLifecycle::new(shared, b.session_id, GameKind::Tetris, b.role),
        )
    }

    fn feed(lc: &mut SessionLifecycle, sub: &mut ValueSubscription) -> Vec<LifecycleSignal> {
        let mut out = Vec::new();
        while let Ok(Some(snap)) = sub.poll() {
            out.extend(lc.observe(&snap));
        }
        out
    }

    #[test]
    fn only_transitioning_client_resets_round_state() {
        let (store, mut a, mut b) = setup();
        store
            .set_as(
                &paths::wins("alice_bob", GameKind::Tetris),
                &WinTally {
                    creator_wins: 3,
                    invited_wins: 2,
                },
            )
            .unwrap();

        assert!(a.set_connected().unwrap());
        let wins: WinTally = store
            .get_as(&paths::wins("alice_bob", GameKind::Tetris))
            .unwrap()
            .unwrap();
        assert_eq!(wins, WinTally::default());

        // The peer's call must not clobber a win credited in between.
        store
            .set_as(
                &paths::wins("alice_bob", GameKind::Tetris),
                &WinTally {
                    creator_wins: 1,
                    invited_wins: 0,
                },
            )
            .unwrap();
        assert!(!b.set_connected().unwrap());
        let wins: WinTally = store
            .get_as(&paths::wins("alice_bob", GameKind::Tetris))
            .unwrap()
            .unwrap();
        assert_eq!(wins.creator_wins, 1);

        let status: GameStatusRecord = store
            .get_as(&paths::game_status("alice_bob", GameKind::Tetris))
            .unwrap()
            .unwrap();
        assert_eq!(status.game_status, GameStatus::Playing);
    }

    #[test]
    fn connect_from_cancelled_is_illegal() {
        let (_store, mut a, _b) = setup();
        a.leave().unwrap();
        assert!(matches!(
            a.set_connected(),
            Err(SessionError::IllegalTransition {
                from: RoomStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn peer_leave_signals_disconnect_once() {
        let (_store, mut a, mut b) = setup();
        let mut sub = a.subscribe().unwrap();
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::PeerJoined]);

        b.set_connected().unwrap();
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::Connected]);

        b.leave().unwrap();
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::PeerDisconnected]);
        assert!(a.disconnect_reported());
    }

    #[test]
    fn own_leave_is_not_a_disconnect() {
        let (_store, mut a, mut b) = setup();
        let mut sub = a.subscribe().unwrap();
        b.set_connected().unwrap();
        feed(&mut a, &mut sub);
        a.leave().unwrap();
        assert!(feed(&mut a, &mut sub).is_empty());
    }

    #[test]
    fn connected_to_waiting_is_a_disconnect() {
        let (store, mut a, mut b) = setup();
        let mut sub = a.subscribe().unwrap();
        b.set_connected().unwrap();
        feed(&mut a, &mut sub);
        store
            .set_as(&paths::room_status("alice_bob"), &RoomStatus::Waiting)
            .unwrap();
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::PeerDisconnected]);

        // A second bounce through connected stays silent.
        store
            .set_as(&paths::room_status("alice_bob"), &RoomStatus::Connected)
            .unwrap();
        feed(&mut a, &mut sub);
        store
            .set_as(&paths::room_status("alice_bob"), &RoomStatus::Cancelled)
            .unwrap();
        assert!(feed(&mut a, &mut sub).is_empty());
    }

    #[test]
    fn drop_while_connected_cancels_implicitly() {
        let (store, mut a, mut b) = setup();
        let mut sub = a.subscribe().unwrap();
        b.set_connected().unwrap();
        feed(&mut a, &mut sub);
        let mut b_sub = b.subscribe().unwrap();
        feed(&mut b, &mut b_sub);
        drop(b_sub);
        drop(b);

        let status: RoomStatus = store
            .get_as(&paths::room_status("alice_bob"))
            .unwrap()
            .unwrap();
        assert_eq!(status, RoomStatus::Cancelled);
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::PeerDisconnected]);
        assert!(feed(&mut a, &mut sub).is_empty());
    }

    #[test]
    fn drop_before_connect_writes_nothing() {
        let (store, _a, b) = setup();
        drop(b);
        let status: RoomStatus = store
            .get_as(&paths::room_status("alice_bob"))
            .unwrap()
            .unwrap();
        assert_eq!(status, RoomStatus::Ready);
    }

    #[test]
    fn explicit_leave_suppresses_implicit_cancel() {
        let (store, mut a, mut b) = setup();
        b.set_connected().unwrap();
        b.leave().unwrap();
        // Peer reactivates the room; dropping the leaver must not cancel it.
        store
            .set_as(&paths::room_status("alice_bob"), &RoomStatus::Waiting)
            .unwrap();
        drop(b);
        a.close();
        let status: RoomStatus = store
            .get_as(&paths::room_status("alice_bob"))
            .unwrap()
            .unwrap();
        assert_eq!(status, RoomStatus::Waiting);
    }

    #[test]
    fn drop_right_after_connecting_cancels_implicitly() {
        let (store, mut a, mut b) = setup();
        let mut sub = a.subscribe().unwrap();
        let mut b_sub = b.subscribe().unwrap();
        feed(&mut a, &mut sub);
        feed(&mut b, &mut b_sub);

        // b connects and is torn down before it observes its own write.
        assert!(b.set_connected().unwrap());
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::Connected]);
        drop(b_sub);
        drop(b);

        let status: RoomStatus = store
            .get_as(&paths::room_status("alice_bob"))
            .unwrap()
            .unwrap();
        assert_eq!(status, RoomStatus::Cancelled);
        assert_eq!(feed(&mut a, &mut sub), vec![LifecycleSignal::PeerDisconnected]);
    }

    #[test]
    fn peer_finding_room_connected_also_cancels_on_drop() {
        let (store, mut a, mut b) = setup();
        assert!(b.set_connected().unwrap());
        assert!(!a.set_connected().unwrap());
        drop(a);
        let status: RoomStatus = store
            .get_as(&paths::room_status("alice_bob"))
            .unwrap()
            .unwrap();
        assert_eq!(status, RoomStatus::Cancelled);
    }
}
