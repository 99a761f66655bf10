//! Configuration loading, resolution, and persistence.
//!
//! Handles the TOML config file (~/.config/pulsepair/config.toml). Simulated
//! participants live in indexed sections: `[bot.0]`, `[bot.1]`, etc.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub use pulsepair::{BotSection, PulsepairConfig};

/// Build a global ID from a type prefix and index: `"bot.0"`, `"bot.1"`, etc.
pub fn global_id(prefix: &str, index: &str) -> String {
    format!("{prefix}.{index}")
}

// ---------------------------------------------------------------------------
// Persistence I/O
// ---------------------------------------------------------------------------

/// Returns `~/.config/pulsepair/config.toml`.
pub fn default_config_path() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pulsepair");
    dir.join("config.toml")
}

/// Load persisted config from disk. If the file does not exist, creates it
/// with all-defaults and returns that. A file that fails to parse is left
/// untouched and defaults are used.
pub fn load(path: &Path) -> PulsepairConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<PulsepairConfig>(&contents) {
            Ok(config) => {
                tracing::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                PulsepairConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let defaults = PulsepairConfig::with_default_bots();
            tracing::info!("no config file found, creating {}", path.display());
            save_to(path, &defaults);
            defaults
        }
        Err(e) => {
            tracing::warn!("failed to read {}: {e}", path.display());
            PulsepairConfig::default()
        }
    }
}

/// Write config to a specific path. Creates parent dirs if needed. Never panics.
pub fn save_to(path: &Path, config: &PulsepairConfig) {
    if let Some(dir) = path.parent()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        tracing::warn!("failed to create config dir {}: {e}", dir.display());
        return;
    }
    match toml::to_string_pretty(config) {
        Ok(contents) => {
            if let Err(e) = std::fs::write(path, contents) {
                tracing::warn!("failed to write {}: {e}", path.display());
            }
        }
        Err(e) => {
            tracing::warn!("failed to serialize config: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Cached config
// ---------------------------------------------------------------------------

/// Cached configuration backed by a TOML file.
///
/// Reads are cheap (RwLock read guard + clone). `update` mutates the cached
/// copy and persists it; `override_with` changes only the running copy
/// (command-line overrides).
pub struct SystemConfig {
    path: PathBuf,
    inner: RwLock<PulsepairConfig>,
}

impl SystemConfig {
    /// Load config from disk (or create defaults) and cache it.
    pub fn new(path: PathBuf) -> Self {
        let config = load(&path);
        Self {
            path,
            inner: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone the current cached config.
    pub fn snapshot(&self) -> PulsepairConfig {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutate the cached config in place, then persist to disk.
    pub fn update(&self, f: impl FnOnce(&mut PulsepairConfig)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
        save_to(&self.path, &guard);
    }

    /// Mutate the cached config without persisting.
    pub fn override_with(&self, f: impl FnOnce(&mut PulsepairConfig)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsepair::DrainMode;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("pulsepair-test-{}-{name}", std::process::id()))
            .join("config.toml")
    }

    #[test]
    fn missing_file_is_created_with_default_bots() {
        let path = scratch_path("missing");
        let _ = std::fs::remove_file(&path);
        let config = load(&path);
        assert_eq!(config.bot.len(), 2);
        assert!(path.exists());
        assert_eq!(load(&path), config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn update_persists_and_override_does_not() {
        let path = scratch_path("persist");
        let _ = std::fs::remove_file(&path);
        let system = SystemConfig::new(path.clone());
        system.update(|c| c.attack.drain = DrainMode::ReadThenReset);
        system.override_with(|c| c.simulation.rounds = 9);

        assert_eq!(system.snapshot().simulation.rounds, 9);
        let on_disk = load(&path);
        assert_eq!(on_disk.attack.drain, DrainMode::ReadThenReset);
        assert_ne!(on_disk.simulation.rounds, 9);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let path = scratch_path("garbage");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[session\nnot toml").unwrap();
        assert_eq!(load(&path), PulsepairConfig::default());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn global_id_format() {
        assert_eq!(global_id("bot", "0"), "bot.0");
    }
}
