//! Actor infrastructure: shared trait, bus helpers, and actor resolution.

pub mod bot;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::broadcast;

use crate::bus::{BusReceiver, BusSender};
use crate::state::config::{PulsepairConfig, global_id};
use crate::state::{ScoreboardWriter, SystemState};
use pulsepair::SessionMessage;

// ---------------------------------------------------------------------------
// Actor trait
// ---------------------------------------------------------------------------

/// Common trait for self-managed actors. Each actor struct holds its own config;
/// `start()` clones what it needs and spawns a thread.
pub trait Actor: Send + Sync {
    /// Spawn the actor's run loop.
    fn start(&self, state: Arc<SystemState>, sender: BusSender, receiver: BusReceiver);

    /// Request the actor to stop. Default: no-op (actors check the shutdown
    /// flag via `BusReceiver::is_shutdown()`).
    fn stop(&self) {}
}

// ---------------------------------------------------------------------------
// Actor resolution
// ---------------------------------------------------------------------------

/// A concrete actor ready to be started, resolved from config.
pub struct ResolvedActor {
    pub id: String,
    pub name: String,
    pub actor: Box<dyn Actor>,
}

/// Build the bot actors from the persisted config.
///
/// Bots are paired in index order (`bot.0` with `bot.1`, `bot.2` with
/// `bot.3`, ...). An unpaired bot is logged and skipped.
pub fn resolve_actors(config: &PulsepairConfig, writer: &ScoreboardWriter) -> Vec<ResolvedActor> {
    let mut indices: Vec<&String> = config.bot.keys().collect();
    indices.sort_by_key(|index| (index.parse::<u64>().unwrap_or(u64::MAX), index.to_string()));

    let base_seed = config.simulation.seed.unwrap_or_else(clock_seed);
    let mut actors = Vec::new();
    for (pair, chunk) in indices.chunks(2).enumerate() {
        let [a, b] = chunk else {
            tracing::warn!("bot '{}' has no partner, skipping", global_id("bot", chunk[0]));
            continue;
        };
        let (sa, sb) = (&config.bot[*a], &config.bot[*b]);
        for (slot, (index, me, peer)) in [(a, sa, sb), (b, sb, sa)].into_iter().enumerate() {
            let seed = base_seed.wrapping_add((pair * 2 + slot) as u64);
            actors.push(ResolvedActor {
                id: global_id("bot", index),
                name: display_name(me),
                actor: Box::new(bot::BotActor {
                    name: display_name(me),
                    user_id: me.user_id.clone(),
                    peer_id: peer.user_id.clone(),
                    seed,
                    writer: writer.clone(),
                }),
            });
        }
    }
    actors
}

fn display_name(section: &pulsepair::BotSection) -> String {
    if section.name.is_empty() {
        section.user_id.clone()
    } else {
        section.name.clone()
    }
}

fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Start a resolved actor: create bus wrappers, call start(), register in state.
pub fn start_actor(
    id: String,
    actor: Box<dyn Actor>,
    state: &Arc<SystemState>,
    bus_tx: &broadcast::Sender<SessionMessage>,
) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let sender = BusSender::new(id.clone(), bus_tx.clone(), Arc::clone(&shutdown));
    let receiver = sender.subscribe();
    actor.start(Arc::clone(state), sender, receiver);
    state.register_actor(id, actor, shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Scoreboard;
    use pulsepair::BotSection;

    fn bot(user_id: &str) -> BotSection {
        BotSection {
            name: String::new(),
            user_id: user_id.into(),
        }
    }

    #[test]
    fn bots_pair_in_index_order() {
        let mut config = PulsepairConfig::default();
        config.simulation.seed = Some(7);
        for (index, user) in [("0", "alice"), ("1", "bob"), ("2", "carol"), ("10", "dave")] {
            config.bot.insert(index.into(), bot(user));
        }
        let (_board, writer) = Scoreboard::new();
        let ids: Vec<String> = resolve_actors(&config, &writer)
            .into_iter()
            .map(|ra| ra.id)
            .collect();
        assert_eq!(ids, vec!["bot.0", "bot.1", "bot.2", "bot.10"]);
    }

    #[test]
    fn unpaired_bot_is_skipped() {
        let mut config = PulsepairConfig::default();
        config.bot.insert("0".into(), bot("alice"));
        config.bot.insert("1".into(), bot("bob"));
        config.bot.insert("2".into(), bot("carol"));
        let (_board, writer) = Scoreboard::new();
        let resolved = resolve_actors(&config, &writer);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].name, "alice");
    }
}
