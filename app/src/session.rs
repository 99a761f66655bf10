//! Match session: one participant's view of a running room.
//!
//! A `MatchSession` owns every component and subscription for a single
//! client. It is driven by its owner's loop: `pump()` drains store
//! notifications and reacts to them, `flush_engine()` publishes what the
//! local engine produced. Reactions are emitted on the session bus.
//!
//! Subscriptions are released when the session is closed or dropped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::attack::AttackQueue;
use crate::bus::BusSender;
use crate::channel::{GameStateChannel, OpponentMirror, RoundJudge, RoundVerdict};
use crate::directory::Resolution;
use crate::engine::{EngineEvent, GameEngine};
use crate::error::SessionError;
use crate::lifecycle::{LifecycleSignal, SessionLifecycle};
use crate::reset::ResetSignal;
use crate::store::{ChildSubscription, SharedStateStore, ValueSubscription};
use pulsepair::{
    GameKind, GameStatus, GameStatusRecord, PlayerUpdate, PulsepairConfig, Role, RoomStatus,
    SessionEvent, SessionMessage, WinTally,
};

/// Everything a session needs to know about where it lives.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn SharedStateStore>,
    pub session_id: String,
    pub kind: GameKind,
    pub role: Role,
    pub self_id: String,
    pub config: PulsepairConfig,
}

impl SessionContext {
    pub fn from_resolution(
        store: Arc<dyn SharedStateStore>,
        self_id: impl Into<String>,
        kind: GameKind,
        resolution: &Resolution,
        config: PulsepairConfig,
    ) -> Self {
        Self {
            store,
            session_id: resolution.session_id.clone(),
            kind,
            role: resolution.role,
            self_id: self_id.into(),
            config,
        }
    }
}

struct Subscriptions {
    status: ValueSubscription,
    opponent: ValueSubscription,
    pending: ValueSubscription,
    game_status: ValueSubscription,
    wins: ValueSubscription,
    reset: ValueSubscription,
    incoming: ChildSubscription,
}

pub struct MatchSession {
    session_id: String,
    role: Role,
    engine: Option<Box<dyn GameEngine>>,
    lifecycle: SessionLifecycle,
    channel: GameStateChannel,
    attacks: AttackQueue,
    reset: ResetSignal,
    mirror: OpponentMirror,
    judge: RoundJudge,
    bus: BusSender,
    subs: Option<Subscriptions>,
    tally: WinTally,
    round_over: bool,
}

impl MatchSession {
    /// Build a session. Real-time game kinds require an engine.
    pub fn new(
        ctx: SessionContext,
        engine: Option<Box<dyn GameEngine>>,
        bus: BusSender,
    ) -> Result<Self, SessionError> {
        match engine.as_deref() {
            None if ctx.kind.is_realtime() => return Err(SessionError::NoEngine(ctx.kind)),
            Some(engine) if engine.kind() != ctx.kind => {
                return Err(SessionError::EngineKind {
                    expected: ctx.kind,
                    actual: engine.kind(),
                });
            }
            _ => {}
        }
        let store = ctx.store;
        let sid = ctx.session_id;
        let session = &ctx.config.session;
        Ok(Self {
            lifecycle: SessionLifecycle::new(store.clone(), sid.clone(), ctx.kind, ctx.role),
            channel: GameStateChannel::new(store.clone(), sid.clone(), ctx.kind, ctx.role),
            attacks: AttackQueue::new(
                store.clone(),
                sid.clone(),
                ctx.kind,
                ctx.role,
                ctx.config.attack.drain,
            ),
            reset: ResetSignal::new(
                store,
                sid.clone(),
                ctx.kind,
                ctx.role,
                session.reset_clear_delay(),
            ),
            mirror: OpponentMirror::default(),
            judge: RoundJudge::new(ctx.role, session.staleness_window()),
            session_id: sid,
            role: ctx.role,
            engine,
            bus,
            subs: None,
            tally: WinTally::default(),
            round_over: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> Option<RoomStatus> {
        self.lifecycle.status()
    }

    pub fn tally(&self) -> WinTally {
        self.tally
    }

    pub fn is_round_over(&self) -> bool {
        self.round_over
    }

    pub fn is_open(&self) -> bool {
        self.subs.is_some()
    }

    pub fn opponent(&self) -> &OpponentMirror {
        &self.mirror
    }

    pub fn engine(&self) -> Option<&dyn GameEngine> {
        self.engine.as_deref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut (dyn GameEngine + 'static)> {
        self.engine.as_deref_mut()
    }

    /// Attach every subscription and publish the initial slot.
    pub fn open(&mut self) -> Result<(), SessionError> {
        if self.subs.is_some() {
            return Ok(());
        }
        self.subs = Some(Subscriptions {
            status: self.lifecycle.subscribe()?,
            opponent: self.channel.subscribe_opponent()?,
            pending: self.attacks.subscribe_pending()?,
            game_status: self.channel.subscribe_game_status()?,
            wins: self.channel.subscribe_tally()?,
            reset: self.reset.subscribe()?,
            incoming: self.attacks.subscribe_incoming()?,
        });
        if let Some(engine) = self.engine.as_mut() {
            engine.take_events();
            self.channel.publish_self(&PlayerUpdate {
                score: Some(engine.score()),
                field: Some(engine.field()),
            })?;
        }
        info!("session: {} opened {} as {}", self.bus.source(), self.session_id, self.role);
        Ok(())
    }

    pub fn set_connected(&mut self) -> Result<bool, SessionError> {
        self.lifecycle.set_connected()
    }

    /// Drain pending store notifications and react to them. Returns the
    /// events emitted on the bus, in order.
    pub fn pump(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let Some(mut subs) = self.subs.take() else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();
        let result = self.pump_with(&mut subs, &mut events);
        self.subs = Some(subs);
        for event in &events {
            self.bus.send(SessionMessage::new(event.clone()));
        }
        result.map(|()| events)
    }

    fn pump_with(
        &mut self,
        subs: &mut Subscriptions,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        while let Some(snap) = subs.status.poll()? {
            if let Some(signal) = self.lifecycle.observe(&snap) {
                events.push(match signal {
                    LifecycleSignal::PeerJoined => SessionEvent::PeerJoined,
                    LifecycleSignal::Connected => SessionEvent::Connected,
                    LifecycleSignal::PeerDisconnected => SessionEvent::PeerDisconnected,
                });
            }
        }

        while let Some(snap) = subs.opponent.poll()? {
            if let Some(delta) = self.mirror.apply(&snap)? {
                events.push(SessionEvent::OpponentUpdated {
                    score: delta.score,
                    field_changed: delta.field_changed,
                });
            }
        }

        while let Some(snap) = subs.pending.poll()? {
            let owed = snap.decode::<u32>()?.unwrap_or(0);
            if owed == 0 {
                continue;
            }
            let lines = self.attacks.drain_pending()?;
            if lines == 0 {
                continue;
            }
            match self.engine.as_mut() {
                Some(engine) if !engine.is_game_over() => {
                    engine.receive_garbage_lines(lines);
                    events.push(SessionEvent::GarbageApplied { lines });
                }
                _ => debug!("session: discarded {lines} garbage lines, no live engine"),
            }
        }

        while let Some(child) = subs.incoming.poll()? {
            match self.attacks.consume(&child) {
                Ok(record) => events.push(SessionEvent::AttackReceived {
                    count: record.count,
                }),
                Err(e) => warn!("session: skipping malformed attack record {}: {e}", child.key),
            }
        }

        while let Some(snap) = subs.game_status.poll()? {
            let Some(record) = snap.decode::<GameStatusRecord>()? else {
                continue;
            };
            match self.judge.judge(&record, Utc::now()) {
                RoundVerdict::Playing => self.round_over = false,
                RoundVerdict::Won => {
                    self.round_over = true;
                    if let Err(e) = self.channel.credit_win(self.role) {
                        warn!("session: crediting {} win in {} failed: {e}", self.role, self.session_id);
                    }
                    events.push(SessionEvent::RoundWon);
                }
                RoundVerdict::Lost => {
                    self.round_over = true;
                    events.push(SessionEvent::RoundLost);
                }
                RoundVerdict::Stale | RoundVerdict::Duplicate => {
                    if record.game_status == GameStatus::GameOver {
                        debug!("session: ignoring gameOver stamped {}", record.timestamp);
                    }
                }
            }
        }

        while let Some(snap) = subs.wins.poll()? {
            let tally = snap.decode::<WinTally>()?.unwrap_or_default();
            if tally != self.tally {
                self.tally = tally;
                events.push(tally.into());
            }
        }

        let now = tokio::time::Instant::now();
        while let Some(snap) = subs.reset.poll()? {
            if let Some(initiator) = self.reset.observe(&snap, now)? {
                self.restart_local()?;
                events.push(SessionEvent::Restarted { initiator });
            }
        }
        self.reset.poll_clear(now)?;

        Ok(())
    }

    fn restart_local(&mut self) -> Result<(), SessionError> {
        self.round_over = false;
        self.attacks.reset_pending()?;
        self.attacks.clear_outgoing()?;
        if let Some(engine) = self.engine.as_mut() {
            engine.restart();
        }
        Ok(())
    }

    /// Publish what the engine produced since the last flush: score and
    /// field deltas, attacks for cleared lines and game over.
    pub fn flush_engine(&mut self) -> Result<(), SessionError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let mut update = PlayerUpdate::default();
        let mut field_dirty = false;
        let mut lines_cleared = Vec::new();
        let mut game_over = false;
        for event in engine.take_events() {
            match event {
                EngineEvent::FieldUpdated => field_dirty = true,
                EngineEvent::ScoreChanged(score) => update.score = Some(score),
                EngineEvent::LinesCleared(n) => lines_cleared.push(n),
                EngineEvent::GameOver => game_over = true,
            }
        }
        if field_dirty {
            update.field = Some(engine.field());
        }

        self.channel.publish_self(&update)?;
        for lines in lines_cleared {
            self.attacks.send_attack(lines)?;
        }
        if game_over && !self.round_over {
            self.round_over = true;
            self.channel.publish_game_over()?;
        }
        Ok(())
    }

    /// Start a new round on both clients.
    pub fn request_restart(&mut self) -> Result<(), SessionError> {
        self.channel.reset_game_status()?;
        self.reset.notify_reset()?;
        Ok(())
    }

    /// Explicitly leave the room and release every subscription.
    pub fn leave(&mut self) -> Result<(), SessionError> {
        self.subs = None;
        self.lifecycle.leave()
    }

    /// Release every subscription; cancels the room implicitly if it was
    /// `Connected` and no terminal status was written.
    pub fn close(&mut self) {
        if self.subs.take().is_some() {
            debug!("session: {} closed {}", self.bus.source(), self.session_id);
        }
        self.lifecycle.close();
    }
}

impl Drop for MatchSession {
    fn drop(&mut self) {
        self.close();
    }
}
