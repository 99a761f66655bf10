//! Scoreboard: final per-bot results of a simulator run.
//!
//! Bots report through a `ScoreboardWriter`; the binary reads snapshots
//! through `Scoreboard` on `SystemState`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use pulsepair::{Role, WinTally};

/// How one bot's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReport {
    pub name: String,
    pub session_id: String,
    pub role: Role,
    pub rounds: u32,
    pub tally: WinTally,
    /// The bot saw its peer disconnect rather than leaving itself.
    pub peer_left: bool,
}

/// Read-only view of the reports.
pub struct Scoreboard {
    inner: Arc<RwLock<BTreeMap<String, BotReport>>>,
}

/// Write handle. Cloned into every bot.
#[derive(Clone)]
pub struct ScoreboardWriter {
    inner: Arc<RwLock<BTreeMap<String, BotReport>>>,
}

impl Scoreboard {
    /// Create a new `Scoreboard` and its companion `ScoreboardWriter`.
    pub fn new() -> (Self, ScoreboardWriter) {
        let inner = Arc::new(RwLock::new(BTreeMap::new()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            ScoreboardWriter { inner },
        )
    }

    /// Reports keyed by actor ID.
    pub fn snapshot(&self) -> BTreeMap<String, BotReport> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScoreboardWriter {
    pub fn report(&self, actor_id: &str, report: BotReport) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(actor_id.to_string(), report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reports_are_visible() {
        let (board, writer) = Scoreboard::new();
        assert!(board.is_empty());
        writer.clone().report(
            "bot.0",
            BotReport {
                name: "Alice".into(),
                session_id: "alice_bob".into(),
                role: Role::Creator,
                rounds: 3,
                tally: WinTally {
                    creator_wins: 2,
                    invited_wins: 1,
                },
                peer_left: false,
            },
        );
        assert_eq!(board.len(), 1);
        assert_eq!(board.snapshot()["bot.0"].rounds, 3);
    }
}
