//! Shared state store abstraction.
//!
//! The store is a remote tree of JSON values observed by every client. It
//! offers point reads and writes, partial updates, auto-id pushes, atomic
//! transactions, and two kinds of subscription:
//!
//! - value observers (`tokio::sync::watch`): the latest snapshot of a
//!   subtree. Intermediate values may be coalesced away under rapid writes.
//! - child-added observers (`tokio::sync::mpsc`): every child key added
//!   under a path, delivered at least once.
//!
//! Subscriptions are guards. Dropping one detaches its observer.

mod memory;

pub use memory::MemoryStore;

use std::sync::Weak;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use pulsepair::StorePath;

pub type ObserverId = u64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable (offline)")]
    Offline,

    #[error("cannot write to the store root")]
    RootWrite,

    #[error("update at {0} requires an object value")]
    NotAnObject(StorePath),

    #[error("failed to decode value at {path}: {source}")]
    Decode {
        path: StorePath,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Error from `poll()` on a subscription: the observer was detached or the
/// store went away.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    #[error("subscription closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// What a transaction function decided for the current value.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    /// Write this value. `Value::Null` deletes the node.
    Commit(Value),
    /// Leave the node untouched.
    Abort,
}

/// Outcome of `run_transaction`.
#[derive(Debug, Clone, PartialEq)]
pub struct TxResult {
    pub committed: bool,
    /// Value the transaction function saw.
    pub previous: Option<Value>,
    /// Value at the path after the transaction.
    pub current: Option<Value>,
}

/// Operations required from the shared store. Implementations must be
/// usable from several client threads at once; the store is the only
/// shared mutable resource.
pub trait SharedStateStore: Send + Sync {
    fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Overwrite the node at `path`. `Value::Null` deletes it.
    fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Overwrite only the listed children of `path`.
    fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError>;

    fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Append `value` under a new, time-ordered unique key. Returns the key.
    fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Atomic read-modify-write of one node. `apply` may be called more than
    /// once by backends that retry on contention.
    fn run_transaction(
        &self,
        path: &StorePath,
        apply: &mut dyn FnMut(Option<&Value>) -> TxDecision,
    ) -> Result<TxResult, StoreError>;

    /// Observe the whole subtree at `path`. The current value is delivered
    /// first.
    fn observe_value(&self, path: &StorePath) -> Result<ValueSubscription, StoreError>;

    /// Observe children added under `path`. Existing children are delivered
    /// first.
    fn observe_child_added(&self, path: &StorePath) -> Result<ChildSubscription, StoreError>;

    fn remove_observer(&self, id: ObserverId);
}

/// Typed helpers over any `SharedStateStore`, including trait objects.
pub trait StoreExt: SharedStateStore {
    fn get_as<T: DeserializeOwned>(&self, path: &StorePath) -> Result<Option<T>, StoreError> {
        match self.get(path)? {
            None => Ok(None),
            Some(value) => decode(path, value).map(Some),
        }
    }

    fn set_as<T: Serialize + ?Sized>(&self, path: &StorePath, value: &T) -> Result<(), StoreError> {
        self.set(path, serde_json::to_value(value)?)
    }

    /// Partial update from a struct: every serialized key overwrites the
    /// matching child, other children are untouched.
    fn update_from<T: Serialize + ?Sized>(
        &self,
        path: &StorePath,
        fields: &T,
    ) -> Result<(), StoreError> {
        match serde_json::to_value(fields)? {
            Value::Object(map) => self.update(path, map),
            _ => Err(StoreError::NotAnObject(path.clone())),
        }
    }

    fn push_as<T: Serialize + ?Sized>(
        &self,
        path: &StorePath,
        value: &T,
    ) -> Result<String, StoreError> {
        self.push(path, serde_json::to_value(value)?)
    }

    /// Transactionally add `delta` to an integer counter (absent counts as
    /// zero). Returns the new value.
    fn increment(&self, path: &StorePath, delta: i64) -> Result<i64, StoreError> {
        let mut next = 0;
        self.run_transaction(path, &mut |current: Option<&Value>| {
            let base = current.and_then(Value::as_i64).unwrap_or(0);
            next = base + delta;
            TxDecision::Commit(Value::from(next))
        })?;
        Ok(next)
    }

    /// Transactionally read an integer counter and write zero in its place.
    /// Returns what was taken.
    fn take_counter(&self, path: &StorePath) -> Result<i64, StoreError> {
        let mut taken = 0;
        self.run_transaction(path, &mut |current: Option<&Value>| {
            taken = current.and_then(Value::as_i64).unwrap_or(0);
            if taken == 0 {
                TxDecision::Abort
            } else {
                TxDecision::Commit(Value::from(0))
            }
        })?;
        Ok(taken)
    }
}

impl<S: SharedStateStore + ?Sized> StoreExt for S {}

/// Generate a push key: 12 hex chars of epoch milliseconds, 6 of a
/// process-wide sequence, then 8 random. Keys sort in creation order.
pub fn push_key() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let seq = SEQ.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;
    let entropy = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{millis:012x}{seq:06x}{entropy}")
}

pub(crate) fn decode<T: DeserializeOwned>(path: &StorePath, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        path: path.clone(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Scoped subscriptions
// ---------------------------------------------------------------------------

/// Something observers can be detached from. Held weakly by subscriptions
/// so a dropped store does not outlive its clients.
pub trait ObserverRegistry: Send + Sync {
    fn detach(&self, id: ObserverId);
}

/// Detaches an observer when dropped.
struct DetachGuard {
    id: ObserverId,
    registry: Weak<dyn ObserverRegistry>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

/// One delivered value-observer snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: StorePath,
    pub value: Option<Value>,
}

impl Snapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match &self.value {
            None => Ok(None),
            Some(v) => decode(&self.path, v.clone()).map(Some),
        }
    }
}

/// Value observer on one path. Each `poll()` yields the latest snapshot if
/// it changed since the previous one.
pub struct ValueSubscription {
    path: StorePath,
    rx: watch::Receiver<Option<Value>>,
    guard: DetachGuard,
}

impl ValueSubscription {
    pub fn new(
        id: ObserverId,
        path: StorePath,
        rx: watch::Receiver<Option<Value>>,
        registry: Weak<dyn ObserverRegistry>,
    ) -> Self {
        Self {
            path,
            rx,
            guard: DetachGuard { id, registry },
        }
    }

    pub fn id(&self) -> ObserverId {
        self.guard.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Non-blocking: the latest snapshot if it changed, `Ok(None)` if not.
    pub fn poll(&mut self) -> Result<Option<Snapshot>, PollError> {
        match self.rx.has_changed() {
            Ok(true) => Ok(Some(self.take())),
            Ok(false) => Ok(None),
            Err(_) => Err(PollError::Closed),
        }
    }

    /// Wait for the next change.
    pub async fn changed(&mut self) -> Result<Snapshot, PollError> {
        self.rx.changed().await.map_err(|_| PollError::Closed)?;
        Ok(self.take())
    }

    fn take(&mut self) -> Snapshot {
        Snapshot {
            path: self.path.clone(),
            value: self.rx.borrow_and_update().clone(),
        }
    }
}

/// A child key added under an observed path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildAdded {
    pub key: String,
    pub value: Value,
}

impl ChildAdded {
    pub fn decode<T: DeserializeOwned>(&self, parent: &StorePath) -> Result<T, StoreError> {
        decode(&parent.child(&self.key), self.value.clone())
    }
}

/// Child-added observer on one path. Every added child is queued.
pub struct ChildSubscription {
    path: StorePath,
    rx: mpsc::UnboundedReceiver<ChildAdded>,
    guard: DetachGuard,
}

impl ChildSubscription {
    pub fn new(
        id: ObserverId,
        path: StorePath,
        rx: mpsc::UnboundedReceiver<ChildAdded>,
        registry: Weak<dyn ObserverRegistry>,
    ) -> Self {
        Self {
            path,
            rx,
            guard: DetachGuard { id, registry },
        }
    }

    pub fn id(&self) -> ObserverId {
        self.guard.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Non-blocking: the next queued child, `Ok(None)` if the queue is empty.
    pub fn poll(&mut self) -> Result<Option<ChildAdded>, PollError> {
        match self.rx.try_recv() {
            Ok(child) => Ok(Some(child)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(PollError::Closed),
        }
    }
}
