use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use pulsepair::{AlertLevel, DrainMode, SessionEvent, SessionMessage};
use pulsepair_app::actors;
use pulsepair_app::presence::PresenceHeartbeat;
use pulsepair_app::state::SystemState;
use pulsepair_app::state::config::{self, SystemConfig};
use pulsepair_app::store::{MemoryStore, SharedStateStore};

#[derive(Parser, Debug, Clone)]
#[command(name = "pulsepair", about = "Two-bot game session simulator")]
struct Config {
    /// Config file path (default: ~/.config/pulsepair/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rounds to play before the bots leave
    #[arg(long)]
    rounds: Option<u32>,

    /// Seed for engines and bot input
    #[arg(long)]
    seed: Option<u64>,

    /// How received garbage counters are drained
    #[arg(long, value_enum)]
    drain: Option<DrainMode>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("pulsepair=info,pulsepair_app=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("debug logging enabled");

    let cli = Config::parse();

    // Load (or create) config file
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let system = SystemConfig::new(config_path);

    // The simulator needs two participants. Persist them so the file
    // reflects what ran.
    if system.snapshot().bot.is_empty() {
        let defaults = pulsepair::PulsepairConfig::with_default_bots();
        system.update(|c| c.bot = defaults.bot);
    }
    system.override_with(|c| {
        if let Some(rounds) = cli.rounds {
            c.simulation.rounds = rounds;
        }
        if let Some(seed) = cli.seed {
            c.simulation.seed = Some(seed);
        }
        if let Some(drain) = cli.drain {
            c.attack.drain = drain;
        }
    });

    let rt = tokio::runtime::Runtime::new()?;
    let _guard = rt.enter();

    let memory = MemoryStore::new();
    let store: Arc<dyn SharedStateStore> = Arc::new(memory.clone());
    let (system_state, writer) = SystemState::with_config(system, Arc::clone(&store));
    let state = Arc::new(system_state);
    let snap = state.system.snapshot();

    // Single unified bus
    let (bus_tx, _) = broadcast::channel::<SessionMessage>(1024);

    // Log bus traffic (keeps broadcast channel healthy when no other subscriber)
    let mut log_rx = bus_tx.subscribe();
    let log_handle = tokio::spawn(async move {
        loop {
            match log_rx.recv().await {
                Ok(msg) => log_message(&msg),
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("log subscriber lagged, dropped {n} events");
                }
            }
        }
    });

    let resolved = actors::resolve_actors(&snap, &writer);
    let expected = resolved.len();
    if expected == 0 {
        anyhow::bail!("no bot pairs configured in {}", state.system.path().display());
    }

    let mut heartbeats = Vec::new();
    for section in snap.bot.values() {
        let mut hb = PresenceHeartbeat::new(Arc::clone(&store), &section.user_id, &snap.presence);
        hb.on_foreground();
        heartbeats.push(hb);
    }

    for ra in resolved {
        tracing::info!("starting actor '{}' ({})", ra.id, ra.name);
        actors::start_actor(ra.id, ra.actor, &state, &bus_tx);
    }

    let finished = rt.block_on(async {
        let wait = async {
            let mut poll = tokio::time::interval(Duration::from_millis(100));
            while state.scoreboard.len() < expected {
                poll.tick().await;
            }
        };
        tokio::select! {
            _ = wait => true,
            _ = tokio::signal::ctrl_c() => false,
        }
    });
    if !finished {
        tracing::info!("interrupted");
    }

    // Stop all actors via the registry
    tracing::info!("shutting down...");
    for id in state.actor_ids() {
        state.stop_actor(&id);
    }
    rt.block_on(async {
        for hb in &mut heartbeats {
            hb.on_background().await;
        }
    });
    for hb in &mut heartbeats {
        hb.on_terminate();
    }
    drop(bus_tx);
    log_handle.abort();

    println!("{:<8} {:<10} {:<14} {:>6} {:>8} {:>8}", "bot", "name", "room", "rounds", "creator", "invited");
    for (id, report) in state.scoreboard.snapshot() {
        println!(
            "{:<8} {:<10} {:<14} {:>6} {:>8} {:>8}{}",
            id,
            report.name,
            report.session_id,
            report.rounds,
            report.tally.creator_wins,
            report.tally.invited_wins,
            if report.peer_left { "  (peer left)" } else { "" },
        );
    }
    tracing::debug!("final store: {}", memory.export());

    Ok(())
}

fn log_message(msg: &SessionMessage) {
    match &msg.event {
        SessionEvent::Alert(alert) => match alert.level {
            AlertLevel::Warn => tracing::warn!("[{}] {}", msg.source, alert.message),
            AlertLevel::Error => tracing::error!("[{}] {}", msg.source, alert.message),
        },
        SessionEvent::OpponentUpdated { .. } => {
            tracing::trace!("[{}] {:?}", msg.source, msg.event);
        }
        event => tracing::debug!("[{}] {event:?}", msg.source),
    }
}
