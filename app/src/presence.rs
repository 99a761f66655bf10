//! Presence heartbeat.
//!
//! Reports `active` on a fixed interval while the app is foregrounded, and
//! one-shot state changes on background and terminate. Every write is
//! best-effort: failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::{SharedStateStore, StoreExt};
use pulsepair::{AppState, PresenceRecord, PresenceSection, StorePath, paths};

pub struct PresenceHeartbeat {
    store: Arc<dyn SharedStateStore>,
    user_id: String,
    interval: Duration,
    grace: Duration,
    ticker: Option<JoinHandle<()>>,
}

impl PresenceHeartbeat {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        user_id: impl Into<String>,
        config: &PresenceSection,
    ) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            interval: config.interval(),
            grace: config.background_grace(),
            ticker: None,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn report_state(&self, state: AppState, include_timestamp: bool) {
        report(&*self.store, &paths::presence(&self.user_id), state, include_timestamp);
    }

    /// Report `active` now and start the interval ticker. Must be called
    /// from within a tokio runtime.
    pub fn on_foreground(&mut self) {
        self.stop_ticker();
        self.report_state(AppState::Active, true);

        let store = Arc::clone(&self.store);
        let path = paths::presence(&self.user_id);
        let period = self.interval;
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; `active` was just written.
            interval.tick().await;
            loop {
                interval.tick().await;
                report(&*store, &path, AppState::Active, true);
            }
        }));
        info!("presence: {} foregrounded", self.user_id);
    }

    /// Stop the ticker and flush `background`, waiting at most the grace
    /// period for the write.
    pub async fn on_background(&mut self) {
        self.stop_ticker();
        let store = Arc::clone(&self.store);
        let path = paths::presence(&self.user_id);
        let flush = tokio::task::spawn_blocking(move || {
            report(&*store, &path, AppState::Background, true);
        });
        match tokio::time::timeout(self.grace, flush).await {
            Ok(Ok(())) => info!("presence: {} backgrounded", self.user_id),
            Ok(Err(e)) => warn!("presence: background flush panicked: {e}"),
            Err(_) => warn!(
                "presence: background flush for {} exceeded {:?}",
                self.user_id, self.grace
            ),
        }
    }

    pub fn on_terminate(&mut self) {
        self.stop_ticker();
        self.report_state(AppState::Terminated, true);
        info!("presence: {} terminated", self.user_id);
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            debug!("presence: ticker stopped for {}", self.user_id);
        }
    }
}

impl Drop for PresenceHeartbeat {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn report(store: &dyn SharedStateStore, path: &StorePath, state: AppState, include_timestamp: bool) {
    let record = PresenceRecord::new(state, include_timestamp);
    if let Err(e) = store.set_as(path, &record) {
        warn!("presence: failed to report {state} at {path}: {e}");
    }
}
