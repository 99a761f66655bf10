use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the receiving client takes its pending attack counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// One transaction reads the counter and writes zero.
    #[default]
    Atomic,
    /// Read, then overwrite with zero. Increments landing between the two
    /// writes are lost.
    ReadThenReset,
}

impl fmt::Display for DrainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::ReadThenReset => write!(f, "read_then_reset"),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted config types
// ---------------------------------------------------------------------------

/// Top-level persisted config. Every section has defaults so a partial
/// (or empty) TOML file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulsepairConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub attack: AttackSection,
    #[serde(default)]
    pub board: BoardSection,
    #[serde(default)]
    pub presence: PresenceSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub bot: HashMap<String, BotSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSection {
    /// `gameOver` records older than this are ignored.
    #[serde(default = "default_staleness_window_secs")]
    pub staleness_window_secs: u64,
    /// Delay before the non-initiating peer clears a raised reset flag.
    #[serde(default = "default_reset_clear_delay_ms")]
    pub reset_clear_delay_ms: u64,
}

impl SessionSection {
    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_window_secs as i64)
    }

    pub fn reset_clear_delay(&self) -> Duration {
        Duration::from_millis(self.reset_clear_delay_ms)
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            staleness_window_secs: default_staleness_window_secs(),
            reset_clear_delay_ms: default_reset_clear_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSection {
    #[serde(default)]
    pub drain: DrainMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSection {
    #[serde(default = "default_columns")]
    pub columns: usize,
    #[serde(default = "default_rows")]
    pub rows: usize,
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            rows: default_rows(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSection {
    #[serde(default = "default_presence_interval_secs")]
    pub interval_secs: u64,
    /// Time a background transition is allowed to flush its final write.
    #[serde(default = "default_background_grace_ms")]
    pub background_grace_ms: u64,
}

impl PresenceSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn background_grace(&self) -> Duration {
        Duration::from_millis(self.background_grace_ms)
    }
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            interval_secs: default_presence_interval_secs(),
            background_grace_ms: default_background_grace_ms(),
        }
    }
}

/// Headless simulator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Rounds to play before both bots leave.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Bot loop period.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Loop iterations between gravity steps.
    #[serde(default = "default_gravity_ticks")]
    pub gravity_ticks: u32,
    /// Engine and bot RNG seed. `None` seeds from the clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            tick_ms: default_tick_ms(),
            gravity_ticks: default_gravity_ticks(),
            seed: None,
        }
    }
}

/// A simulated participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSection {
    #[serde(default)]
    pub name: String,
    pub user_id: String,
}

fn default_staleness_window_secs() -> u64 {
    60
}

fn default_reset_clear_delay_ms() -> u64 {
    500
}

fn default_columns() -> usize {
    10
}

fn default_rows() -> usize {
    20
}

fn default_presence_interval_secs() -> u64 {
    30
}

fn default_background_grace_ms() -> u64 {
    1000
}

fn default_rounds() -> u32 {
    3
}

fn default_tick_ms() -> u64 {
    20
}

fn default_gravity_ticks() -> u32 {
    5
}

impl PulsepairConfig {
    /// Known good defaults plus the two simulated participants the
    /// simulator needs.
    pub fn with_default_bots() -> Self {
        let mut bot = HashMap::new();
        bot.insert(
            "0".into(),
            BotSection {
                name: "Alice".into(),
                user_id: "alice".into(),
            },
        );
        bot.insert(
            "1".into(),
            BotSection {
                name: "Bob".into(),
                user_id: "bob".into(),
            },
        );
        Self {
            bot,
            ..Self::default()
        }
    }
}
