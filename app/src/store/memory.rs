//! In-process `SharedStateStore`.
//!
//! Holds the whole tree in one `serde_json::Value` behind a mutex and fans
//! changes out to observers on every write. Semantics follow a hosted
//! realtime tree: nulls and empty objects are never stored, value observers
//! see whole-subtree snapshots with intermediate values coalesced, and
//! child-added observers see every key that appears under their path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use super::{
    ChildAdded, ChildSubscription, ObserverId, ObserverRegistry, SharedStateStore, StoreError,
    TxDecision, TxResult, ValueSubscription, push_key,
};
use pulsepair::StorePath;

struct ValueObserver {
    path: StorePath,
    tx: watch::Sender<Option<Value>>,
}

struct ChildObserver {
    path: StorePath,
    tx: mpsc::UnboundedSender<ChildAdded>,
    known: HashSet<String>,
}

#[derive(Default)]
struct TreeState {
    root: Value,
    next_id: ObserverId,
    values: HashMap<ObserverId, ValueObserver>,
    children: HashMap<ObserverId, ChildObserver>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<TreeState>,
    offline: AtomicBool,
}

impl ObserverRegistry for Inner {
    fn detach(&self, id: ObserverId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.values.remove(&id);
        state.children.remove(&id);
    }
}

/// Cloneable handle to an in-process store. Clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing connectivity: every operation fails with
    /// `StoreError::Offline` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Relaxed);
    }

    /// Copy of the whole tree.
    pub fn export(&self) -> Value {
        let state = self.lock();
        state.root.clone()
    }

    /// Number of attached observers of both kinds.
    pub fn observer_count(&self) -> usize {
        let state = self.lock();
        state.values.len() + state.children.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TreeState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::Relaxed) {
            Err(StoreError::Offline)
        } else {
            Ok(())
        }
    }

    fn registry(&self) -> Weak<dyn ObserverRegistry> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        weak
    }
}

impl SharedStateStore for MemoryStore {
    fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.check_online()?;
        let state = self.lock();
        Ok(lookup(&state.root, path).cloned())
    }

    fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.check_online()?;
        if path.is_root() {
            return Err(StoreError::RootWrite);
        }
        let mut state = self.lock();
        write(&mut state.root, path.segments(), value);
        state.notify(path);
        Ok(())
    }

    fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.lock();
        for (key, value) in fields {
            let child = path.child(&key);
            if child.is_root() {
                return Err(StoreError::RootWrite);
            }
            write(&mut state.root, child.segments(), value);
        }
        state.notify(path);
        Ok(())
    }

    fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.set(path, Value::Null)
    }

    fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let key = push_key();
        self.set(&path.child(&key), value)?;
        Ok(key)
    }

    fn run_transaction(
        &self,
        path: &StorePath,
        apply: &mut dyn FnMut(Option<&Value>) -> TxDecision,
    ) -> Result<TxResult, StoreError> {
        self.check_online()?;
        if path.is_root() {
            return Err(StoreError::RootWrite);
        }
        // The tree lock is held across `apply`, so no other writer can land
        // between the read and the write.
        let mut state = self.lock();
        let previous = lookup(&state.root, path).cloned();
        match apply(previous.as_ref()) {
            TxDecision::Abort => Ok(TxResult {
                committed: false,
                current: previous.clone(),
                previous,
            }),
            TxDecision::Commit(value) => {
                write(&mut state.root, path.segments(), value);
                state.notify(path);
                Ok(TxResult {
                    committed: true,
                    current: lookup(&state.root, path).cloned(),
                    previous,
                })
            }
        }
    }

    fn observe_value(&self, path: &StorePath) -> Result<ValueSubscription, StoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let initial = lookup(&state.root, path).cloned();
        let (tx, mut rx) = watch::channel(initial);
        // The current value counts as the first delivery.
        rx.mark_changed();
        let id = state.allocate_id();
        state.values.insert(
            id,
            ValueObserver {
                path: path.clone(),
                tx,
            },
        );
        Ok(ValueSubscription::new(id, path.clone(), rx, self.registry()))
    }

    fn observe_child_added(&self, path: &StorePath) -> Result<ChildSubscription, StoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.allocate_id();
        let mut observer = ChildObserver {
            path: path.clone(),
            tx,
            known: HashSet::new(),
        };
        observer.deliver_new(&state.root);
        state.children.insert(id, observer);
        Ok(ChildSubscription::new(id, path.clone(), rx, self.registry()))
    }

    fn remove_observer(&self, id: ObserverId) {
        self.inner.detach(id);
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

impl TreeState {
    fn allocate_id(&mut self) -> ObserverId {
        self.next_id += 1;
        self.next_id
    }

    /// Push fresh snapshots to every observer whose path shares a branch
    /// with `changed`. Observers whose receivers are gone are dropped.
    fn notify(&mut self, changed: &StorePath) {
        let TreeState {
            root,
            values,
            children,
            ..
        } = self;
        let root: &Value = root;

        values.retain(|_, obs| {
            if obs.tx.is_closed() {
                return false;
            }
            if obs.path.overlaps(changed) {
                let snapshot = lookup(root, &obs.path).cloned();
                obs.tx.send_if_modified(|current| {
                    if *current != snapshot {
                        *current = snapshot;
                        true
                    } else {
                        false
                    }
                });
            }
            true
        });

        children.retain(|_, obs| {
            if obs.tx.is_closed() {
                return false;
            }
            if obs.path.overlaps(changed) {
                obs.deliver_new(root);
            }
            true
        });
    }
}

impl ChildObserver {
    /// Send every child not seen on the previous pass. Keys that disappear
    /// are forgotten, so a re-added key is delivered again.
    fn deliver_new(&mut self, root: &Value) {
        let current: Vec<(&String, &Value)> = match lookup(root, &self.path) {
            Some(Value::Object(map)) => map.iter().collect(),
            _ => Vec::new(),
        };
        let mut seen = HashSet::with_capacity(current.len());
        for (key, value) in current {
            if !self.known.contains(key) {
                let _ = self.tx.send(ChildAdded {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
            seen.insert(key.clone());
        }
        self.known = seen;
    }
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn lookup<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for seg in path.segments() {
        node = node.as_object()?.get(seg)?;
    }
    if node.is_null() { None } else { Some(node) }
}

/// Drop nulls and empty objects, recursively. `None` means "nothing to
/// store".
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

fn write(root: &mut Value, segments: &[String], value: Value) {
    match normalize(value) {
        Some(value) => insert_at(root, segments, value),
        None => {
            remove_at(root, segments);
        }
    }
}

fn insert_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.clone()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

/// Remove the node at `segments`. Returns true when `node` itself became
/// empty and should be pruned by its parent.
fn remove_at(node: &mut Value, segments: &[String]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Null;
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    let prune_child = match map.get_mut(first) {
        Some(child) => remove_at(child, rest),
        None => false,
    };
    if prune_child {
        map.remove(first);
    }
    map.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PollError, StoreExt};
    use serde_json::json;

    fn p(s: &str) -> StorePath {
        StorePath::parse(s)
    }

    #[test]
    fn set_get_and_nested_paths() {
        let store = MemoryStore::new();
        store.set(&p("rooms/a_b/status"), json!("waiting")).unwrap();
        assert_eq!(
            store.get(&p("rooms/a_b")).unwrap(),
            Some(json!({ "status": "waiting" }))
        );
        assert_eq!(store.get(&p("rooms/b_a")).unwrap(), None);
    }

    #[test]
    fn update_touches_only_listed_keys() {
        let store = MemoryStore::new();
        store
            .set(&p("players/creator"), json!({ "score": 1, "pendingAttackLines": 3 }))
            .unwrap();
        let mut fields = Map::new();
        fields.insert("score".into(), json!(5));
        store.update(&p("players/creator"), fields).unwrap();
        assert_eq!(
            store.get(&p("players/creator")).unwrap(),
            Some(json!({ "score": 5, "pendingAttackLines": 3 }))
        );
    }

    #[test]
    fn remove_prunes_empty_parents() {
        let store = MemoryStore::new();
        store.set(&p("a/b/c"), json!(1)).unwrap();
        store.set(&p("a/x"), json!(2)).unwrap();
        store.remove(&p("a/b/c")).unwrap();
        assert_eq!(store.export(), json!({ "a": { "x": 2 } }));
        store.remove(&p("a/x")).unwrap();
        assert_eq!(store.export(), json!({}));
    }

    #[test]
    fn transaction_commit_and_abort() {
        let store = MemoryStore::new();
        assert_eq!(store.increment(&p("c"), 2).unwrap(), 2);
        assert_eq!(store.increment(&p("c"), 3).unwrap(), 5);
        let res = store
            .run_transaction(&p("c"), &mut |_: Option<&Value>| TxDecision::Abort)
            .unwrap();
        assert!(!res.committed);
        assert_eq!(res.current, Some(json!(5)));
        assert_eq!(store.take_counter(&p("c")).unwrap(), 5);
        assert_eq!(store.get(&p("c")).unwrap(), Some(json!(0)));
        assert_eq!(store.take_counter(&p("c")).unwrap(), 0);
    }

    #[test]
    fn value_observer_delivers_initial_then_coalesces() {
        let store = MemoryStore::new();
        store.set(&p("s"), json!("waiting")).unwrap();
        let mut sub = store.observe_value(&p("s")).unwrap();
        assert_eq!(sub.poll().unwrap().unwrap().value, Some(json!("waiting")));
        assert_eq!(sub.poll().unwrap(), None);

        store.set(&p("s"), json!("ready")).unwrap();
        store.set(&p("s"), json!("Connected")).unwrap();
        // Only the latest value survives.
        assert_eq!(sub.poll().unwrap().unwrap().value, Some(json!("Connected")));
        assert_eq!(sub.poll().unwrap(), None);

        // Writing the same value again is not a change.
        store.set(&p("s"), json!("Connected")).unwrap();
        assert_eq!(sub.poll().unwrap(), None);
    }

    #[test]
    fn value_observer_sees_descendant_and_ancestor_writes() {
        let store = MemoryStore::new();
        let mut sub = store.observe_value(&p("g/players/invited")).unwrap();
        let _ = sub.poll();
        store.set(&p("g/players/invited/score"), json!(4)).unwrap();
        assert_eq!(sub.poll().unwrap().unwrap().value, Some(json!({ "score": 4 })));
        store.remove(&p("g")).unwrap();
        assert_eq!(sub.poll().unwrap().unwrap().value, None);
        store.set(&p("g/players/creator/score"), json!(1)).unwrap();
        assert_eq!(sub.poll().unwrap(), None);
    }

    #[test]
    fn child_added_delivers_existing_and_new() {
        let store = MemoryStore::new();
        let first = store.push(&p("q"), json!({ "count": 1 })).unwrap();
        let mut sub = store.observe_child_added(&p("q")).unwrap();
        assert_eq!(sub.poll().unwrap().unwrap().key, first);
        let second = store.push(&p("q"), json!({ "count": 2 })).unwrap();
        let third = store.push(&p("q"), json!({ "count": 3 })).unwrap();
        assert!(second < third);
        let keys: Vec<String> = std::iter::from_fn(|| sub.poll().unwrap())
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, vec![second.clone(), third]);

        // Removal does not re-deliver the survivors.
        store.remove(&p("q").child(&second)).unwrap();
        assert_eq!(sub.poll().unwrap(), None);
    }

    #[test]
    fn dropping_subscription_detaches() {
        let store = MemoryStore::new();
        let sub = store.observe_value(&p("x")).unwrap();
        let child = store.observe_child_added(&p("y")).unwrap();
        assert_eq!(store.observer_count(), 2);
        drop(sub);
        assert_eq!(store.observer_count(), 1);
        store.remove_observer(child.id());
        assert_eq!(store.observer_count(), 0);
        let mut child = child;
        assert_eq!(child.poll(), Err(PollError::Closed));
    }

    #[test]
    fn offline_store_rejects_operations() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(store.get(&p("a")), Err(StoreError::Offline)));
        assert!(matches!(store.set(&p("a"), json!(1)), Err(StoreError::Offline)));
        store.set_offline(false);
        store.set(&p("a"), json!(1)).unwrap();
    }

    #[test]
    fn typed_helpers() {
        let store = MemoryStore::new();
        store.set_as(&p("n"), &42u32).unwrap();
        assert_eq!(store.get_as::<u32>(&p("n")).unwrap(), Some(42));
        assert!(matches!(
            store.get_as::<String>(&p("n")),
            Err(StoreError::Decode { .. })
        ));
    }
}
