pub mod config;
mod scoreboard;

pub use scoreboard::{BotReport, Scoreboard, ScoreboardWriter};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::actors::Actor;
use crate::store::SharedStateStore;
use config::SystemConfig;

/// Root entry point for all managed application state.
///
/// Passed as `Arc<SystemState>` to all actors.
pub struct SystemState {
    pub system: SystemConfig,
    pub store: Arc<dyn SharedStateStore>,
    pub scoreboard: Scoreboard,
    actors: RwLock<HashMap<String, (Box<dyn Actor>, Arc<AtomicBool>)>>,
}

impl SystemState {
    pub fn new(config_path: PathBuf, store: Arc<dyn SharedStateStore>) -> (Self, ScoreboardWriter) {
        Self::with_config(SystemConfig::new(config_path), store)
    }

    pub fn with_config(
        system: SystemConfig,
        store: Arc<dyn SharedStateStore>,
    ) -> (Self, ScoreboardWriter) {
        let (scoreboard, writer) = Scoreboard::new();
        (
            Self {
                system,
                store,
                scoreboard,
                actors: RwLock::new(HashMap::new()),
            },
            writer,
        )
    }

    // ----- Actor registry -----

    /// Register an actor in the registry with its shutdown flag.
    pub fn register_actor(&self, id: String, actor: Box<dyn Actor>, shutdown: Arc<AtomicBool>) {
        self.actors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (actor, shutdown));
    }

    /// Get the list of all registered actor IDs.
    pub fn actor_ids(&self) -> Vec<String> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Stop an actor by setting its shutdown flag and calling `stop()`.
    pub fn stop_actor(&self, id: &str) {
        let guard = self.actors.read().unwrap_or_else(|e| e.into_inner());
        if let Some((actor, shutdown)) = guard.get(id) {
            shutdown.store(true, Ordering::Relaxed);
            actor.stop();
        }
    }
}
