//! Heart-rate sample exchange for the `heartRate` game kind.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{PollError, SharedStateStore, Snapshot, StoreError, StoreExt, ValueSubscription};
use pulsepair::{HeartRateSample, paths};

pub struct HeartRateFeed {
    store: Arc<dyn SharedStateStore>,
    user_id: String,
}

impl HeartRateFeed {
    pub fn new(store: Arc<dyn SharedStateStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    pub fn publish(&self, bpm: u16) -> Result<HeartRateSample, StoreError> {
        let sample = HeartRateSample::now(bpm);
        self.store
            .set_as(&paths::heart_rate(&self.user_id), &sample)?;
        debug!("heart_rate: {} published {bpm} bpm", self.user_id);
        Ok(sample)
    }

    pub fn subscribe(&self, peer_id: &str) -> Result<HeartRateSubscription, StoreError> {
        Ok(HeartRateSubscription {
            inner: self.store.observe_value(&paths::heart_rate(peer_id))?,
        })
    }
}

/// Scoped observer of a peer's latest sample.
pub struct HeartRateSubscription {
    inner: ValueSubscription,
}

impl HeartRateSubscription {
    /// Latest sample if it changed. Undecodable values read as `None`.
    pub fn poll(&mut self) -> Result<Option<HeartRateSample>, PollError> {
        Ok(self.inner.poll()?.and_then(|snap| sample(&snap)))
    }

    pub async fn changed(&mut self) -> Result<Option<HeartRateSample>, PollError> {
        let snap = self.inner.changed().await?;
        Ok(sample(&snap))
    }
}

fn sample(snapshot: &Snapshot) -> Option<HeartRateSample> {
    match snapshot.decode::<HeartRateSample>() {
        Ok(sample) => sample,
        Err(e) => {
            warn!("heart_rate: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn peer_sees_latest_sample() {
        let store: Arc<dyn SharedStateStore> = Arc::new(MemoryStore::new());
        let alice = HeartRateFeed::new(store.clone(), "alice");
        let bob = HeartRateFeed::new(store, "bob");

        let mut sub = bob.subscribe("alice").unwrap();
        assert_eq!(sub.poll().unwrap(), None);

        alice.publish(72).unwrap();
        alice.publish(75).unwrap();
        let latest = sub.poll().unwrap().unwrap();
        assert_eq!(latest.bpm, 75);
        assert_eq!(sub.poll().unwrap(), None);
    }

    #[tokio::test]
    async fn changed_waits_for_publish() {
        let store: Arc<dyn SharedStateStore> = Arc::new(MemoryStore::new());
        let alice = HeartRateFeed::new(store.clone(), "alice");
        let bob = HeartRateFeed::new(store, "bob");
        let mut sub = bob.subscribe("alice").unwrap();
        sub.poll().unwrap();

        let publisher = tokio::spawn(async move {
            alice.publish(90).unwrap();
        });
        let got = sub.changed().await.unwrap().unwrap();
        assert_eq!(got.bpm, 90);
        publisher.await.unwrap();
    }
}
