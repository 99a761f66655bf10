//! Bot actor: a simulated participant playing block-stacking rounds.
//!
//! Each bot runs on its own thread and owns one `MatchSession`: it resolves
//! the room with its partner, connects once the partner has joined, plays
//! random inputs under gravity, and counts rounds. The creator restarts
//! finished rounds and leaves after the configured number; the invited bot
//! stops when it sees the creator go.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::actors::Actor;
use crate::bus::{BusReceiver, BusSender, PollError};
use crate::directory::RoomDirectory;
use crate::engine::{Action, engine_for};
use crate::session::{MatchSession, SessionContext};
use crate::state::{BotReport, ScoreboardWriter, SystemState};
use pulsepair::{AlertLevel, AlertMessage, GameKind, Role, SessionEvent, SessionMessage};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_PAUSE: Duration = Duration::from_millis(300);
const INPUT_CHANCE: f64 = 0.4;

/// Simulated participant.
pub struct BotActor {
    pub name: String,
    pub user_id: String,
    pub peer_id: String,
    pub seed: u64,
    pub writer: ScoreboardWriter,
}

impl Actor for BotActor {
    fn start(&self, state: Arc<SystemState>, sender: BusSender, receiver: BusReceiver) {
        let bot = Bot {
            name: self.name.clone(),
            user_id: self.user_id.clone(),
            peer_id: self.peer_id.clone(),
            seed: self.seed,
            writer: self.writer.clone(),
        };
        let thread_name = format!("bot:{}", sender.source());

        if let Err(e) = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || bot.run(state, sender, receiver))
        {
            tracing::error!("failed to spawn bot thread: {e}");
        }
    }
}

struct Bot {
    name: String,
    user_id: String,
    peer_id: String,
    seed: u64,
    writer: ScoreboardWriter,
}

fn alert(sender: &BusSender, level: AlertLevel, message: String) {
    warn!("{}: {message}", sender.source());
    sender.send(SessionMessage::new(AlertMessage { level, message }));
}

impl Bot {
    fn run(self, state: Arc<SystemState>, sender: BusSender, mut receiver: BusReceiver) {
        let config = state.system.snapshot();
        let sim = config.simulation;
        let kind = GameKind::Tetris;

        let directory = RoomDirectory::new(Arc::clone(&state.store));
        let resolution = match directory.resolve_or_create(&self.user_id, &self.peer_id, kind) {
            Ok(resolution) => resolution,
            Err(e) => {
                alert(&sender, AlertLevel::Error, format!("room resolution failed: {e}"));
                return;
            }
        };
        let engine = engine_for(kind, config.board, sim.gravity_ticks, self.seed);
        let ctx = SessionContext::from_resolution(
            Arc::clone(&state.store),
            self.user_id.as_str(),
            kind,
            &resolution,
            config.clone(),
        );
        let mut session = match MatchSession::new(ctx, engine, sender.clone()) {
            Ok(session) => session,
            Err(e) => {
                alert(&sender, AlertLevel::Error, format!("session setup failed: {e}"));
                return;
            }
        };
        if let Err(e) = session.open() {
            alert(&sender, AlertLevel::Error, format!("session open failed: {e}"));
            return;
        }
        info!("{}: {} in {} as {}", sender.source(), self.name, session.session_id(), session.role());

        let mut rng = StdRng::seed_from_u64(self.seed ^ 0x5eed);
        let tick = Duration::from_millis(sim.tick_ms.max(1));
        let started = Instant::now();
        let mut connected = false;
        let mut peer_left = false;
        let mut rounds = 0u32;
        let mut round_counted = false;
        let mut restart_at: Option<Instant> = None;

        'run: loop {
            // Drain the bus; only the shutdown flag matters here.
            loop {
                match receiver.poll() {
                    Err(PollError::Shutdown) => {
                        info!("{}: shutdown requested", sender.source());
                        break 'run;
                    }
                    Ok(None) => break,
                    Ok(Some(_)) => {}
                }
            }

            let events = match session.pump() {
                Ok(events) => events,
                Err(e) => {
                    alert(&sender, AlertLevel::Error, format!("session failed: {e}"));
                    break;
                }
            };
            for event in events {
                match event {
                    SessionEvent::PeerJoined => {
                        if let Err(e) = session.set_connected() {
                            alert(&sender, AlertLevel::Warn, format!("connect failed: {e}"));
                        }
                    }
                    SessionEvent::Connected => connected = true,
                    SessionEvent::PeerDisconnected => peer_left = true,
                    SessionEvent::RoundWon | SessionEvent::RoundLost if !round_counted => {
                        round_counted = true;
                        rounds += 1;
                        info!(
                            "{}: round {rounds} {}",
                            sender.source(),
                            if event == SessionEvent::RoundWon { "won" } else { "lost" }
                        );
                        if session.role() == Role::Creator && rounds < sim.rounds {
                            restart_at = Some(Instant::now() + RESTART_PAUSE);
                        }
                    }
                    SessionEvent::Restarted { .. } => round_counted = false,
                    _ => {}
                }
            }

            if peer_left {
                break;
            }
            if session.role() == Role::Creator && rounds >= sim.rounds {
                if let Err(e) = session.leave() {
                    alert(&sender, AlertLevel::Warn, format!("leave failed: {e}"));
                }
                break;
            }
            if !connected && started.elapsed() > CONNECT_TIMEOUT {
                alert(
                    &sender,
                    AlertLevel::Warn,
                    format!("{} never connected, giving up", self.peer_id),
                );
                break;
            }
            if let Some(at) = restart_at
                && Instant::now() >= at
            {
                restart_at = None;
                if let Err(e) = session.request_restart() {
                    alert(&sender, AlertLevel::Warn, format!("restart failed: {e}"));
                }
            }

            if connected && !session.is_round_over() {
                play(&mut session, &mut rng);
            }
            if let Err(e) = session.flush_engine() {
                alert(&sender, AlertLevel::Error, format!("publish failed: {e}"));
                break;
            }
            std::thread::sleep(tick);
        }

        self.writer.report(
            sender.source(),
            BotReport {
                name: self.name.clone(),
                session_id: session.session_id().to_string(),
                role: session.role(),
                rounds,
                tally: session.tally(),
                peer_left,
            },
        );
        session.close();
        info!("{}: done after {rounds} rounds", sender.source());
    }
}

/// One simulation step: maybe a random input, then gravity.
fn play(session: &mut MatchSession, rng: &mut StdRng) {
    let Some(engine) = session.engine_mut() else {
        return;
    };
    if engine.is_game_over() {
        return;
    }
    if rng.random_bool(INPUT_CHANCE) {
        let action = Action::ALL[rng.random_range(0..Action::ALL.len())];
        engine.apply(action);
    }
    engine.tick();
}
