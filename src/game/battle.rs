//! Battle Engine
//!
//! Owns both players' in-match state and runs the authoritative tick loop.
//! Each tick regenerates elixir and pushes the new state to both players.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start()──▶ Running ──stop() / forfeit() / disconnect──▶ Stopped
//! ```
//!
//! The engine never owns a connection. It only sees each player through a
//! [`StateSink`], and ends the battle when a sink reports it is gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::config::BattleConfig;
use crate::core::rng::DeterministicRng;
use crate::game::deck::PlayerBattleState;
use crate::network::protocol::{EncodeError, OpponentLeft, ServerResponse};

/// Narrow capability for delivering messages to one player.
pub trait StateSink: Send + Sync {
    /// Best-effort, non-blocking delivery.
    fn push(&self, response: &ServerResponse) -> Result<(), PushError>;

    /// Whether the player behind this sink is still reachable.
    fn is_connected(&self) -> bool;
}

/// Why a push did not go out.
#[derive(Debug, Error)]
pub enum PushError {
    /// Message could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    Backlogged,
    /// The connection is gone.
    #[error("connection closed")]
    Disconnected,
}

/// Battle errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BattleError {
    /// `start` was already called.
    #[error("battle already started")]
    AlreadyStarted,
    /// The battle has stopped and cannot be restarted.
    #[error("battle stopped")]
    Stopped,
}

/// Battle lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattlePhase {
    /// Constructed, tick loop not yet running.
    Created,
    /// Tick loop running.
    Running,
    /// Terminal.
    Stopped,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Tick ran; the battle continues.
    Continue,
    /// The battle is stopped; no tick ran.
    Stopped,
}

/// One side of a battle, as handed over by matchmaking.
#[derive(Clone)]
pub struct Participant {
    /// Player identifier.
    pub id: String,
    /// Delivery channel to the player.
    pub sink: Arc<dyn StateSink>,
}

impl Participant {
    /// Create a participant.
    pub fn new(id: impl Into<String>, sink: Arc<dyn StateSink>) -> Self {
        Self { id: id.into(), sink }
    }
}

struct BattlePlayer {
    id: String,
    state: Mutex<PlayerBattleState>,
    sink: Arc<dyn StateSink>,
}

/// A running match between two players.
pub struct Battle {
    id: Uuid,
    room_id: String,
    players: [BattlePlayer; 2],
    config: BattleConfig,
    tick: AtomicU32,
    phase: watch::Sender<BattlePhase>,
}

impl Battle {
    /// Create a battle, shuffling each player's deck from fresh entropy.
    pub fn new(
        room_id: impl Into<String>,
        a: Participant,
        b: Participant,
        config: BattleConfig,
    ) -> Self {
        let mut rng_a = DeterministicRng::for_player(&a.id);
        let mut rng_b = DeterministicRng::for_player(&b.id);
        Self::with_rngs(room_id, a, b, config, &mut rng_a, &mut rng_b)
    }

    /// Create a battle with caller-supplied shuffle RNGs.
    pub fn with_rngs(
        room_id: impl Into<String>,
        a: Participant,
        b: Participant,
        config: BattleConfig,
        rng_a: &mut DeterministicRng,
        rng_b: &mut DeterministicRng,
    ) -> Self {
        let player = |p: Participant, rng: &mut DeterministicRng| BattlePlayer {
            id: p.id,
            state: Mutex::new(PlayerBattleState::deal(rng, config.starting_elixir)),
            sink: p.sink,
        };
        let players = [player(a, rng_a), player(b, rng_b)];
        let (phase, _) = watch::channel(BattlePhase::Created);

        Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            players,
            config,
            tick: AtomicU32::new(0),
            phase,
        }
    }

    /// Unique battle identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Room identifier shared with the clients.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Player ids, in construction order.
    pub fn player_ids(&self) -> [&str; 2] {
        [&self.players[0].id, &self.players[1].id]
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> BattlePhase {
        *self.phase.borrow()
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u32 {
        self.tick.load(Ordering::Acquire)
    }

    /// Copy of one player's state (0 or 1).
    pub async fn player_state(&self, index: usize) -> Option<PlayerBattleState> {
        let player = self.players.get(index)?;
        let state = player.state.lock().await;
        Some(state.clone())
    }

    /// Spawn the tick task.
    ///
    /// The first tick fires `start_delay + tick_period` after this call.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, BattleError> {
        let mut current = BattlePhase::Created;
        let started = self.phase.send_if_modified(|phase| {
            current = *phase;
            if *phase == BattlePhase::Created {
                *phase = BattlePhase::Running;
                true
            } else {
                false
            }
        });

        if !started {
            return Err(match current {
                BattlePhase::Stopped => BattleError::Stopped,
                _ => BattleError::AlreadyStarted,
            });
        }

        info!(
            battle = %self.id,
            room = %self.room_id,
            "Battle started: {} vs {}",
            self.players[0].id,
            self.players[1].id
        );

        let battle = Arc::clone(self);
        Ok(tokio::spawn(async move { battle.run().await }))
    }

    /// Signal the tick loop to exit. Idempotent.
    ///
    /// Returns true if this call performed the transition.
    pub fn stop(&self) -> bool {
        let stopped = self.phase.send_if_modified(|phase| {
            if *phase == BattlePhase::Stopped {
                false
            } else {
                *phase = BattlePhase::Stopped;
                true
            }
        });
        if stopped {
            info!(battle = %self.id, ticks = self.tick_count(), "Battle stopped");
        }
        stopped
    }

    /// End the battle because `leaver_id` went away.
    ///
    /// The remaining player is told via `OpponentLeft`. Returns false if the
    /// battle was already stopped or the id is not a participant.
    pub fn forfeit(&self, leaver_id: &str) -> bool {
        match self.players.iter().position(|p| p.id == leaver_id) {
            Some(index) => self.end_with_leaver(index),
            None => false,
        }
    }

    /// Advance the battle by one tick.
    ///
    /// The tick task calls this on every period; tests may drive it directly.
    pub async fn step(&self) -> StepOutcome {
        if self.phase() == BattlePhase::Stopped {
            return StepOutcome::Stopped;
        }

        if let Some(index) = self.players.iter().position(|p| !p.sink.is_connected()) {
            self.end_with_leaver(index);
            return StepOutcome::Stopped;
        }

        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;

        for player in &self.players {
            let mut state = player.state.lock().await;
            state.regenerate(self.config.elixir_per_tick, self.config.max_elixir);
        }

        for player in &self.players {
            self.send_state(player, tick).await;
        }

        StepOutcome::Continue
    }

    async fn run(self: Arc<Self>) {
        let mut phase_rx = self.phase.subscribe();

        tokio::select! {
            _ = tokio::time::sleep(self.config.start_delay) => {}
            _ = stopped(&mut phase_rx) => return,
        }

        let period = self.config.tick_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.step().await == StepOutcome::Stopped {
                        break;
                    }
                }
                _ = stopped(&mut phase_rx) => break,
            }
        }

        debug!(battle = %self.id, "Tick loop exited");
    }

    async fn send_state(&self, player: &BattlePlayer, tick: u32) {
        // Copy under the lock; encoding and delivery happen after release
        let update = {
            let state = player.state.lock().await;
            state.to_update(tick)
        };

        #[cfg(feature = "debug-tracing")]
        trace!(battle = %self.id, player = %player.id, tick, elixir = update.elixir, "State broadcast");

        if let Err(e) = player.sink.push(&ServerResponse::GameState(update)) {
            trace!(battle = %self.id, player = %player.id, tick, "State push skipped: {}", e);
        }
    }

    fn end_with_leaver(&self, leaver: usize) -> bool {
        if !self.stop() {
            return false;
        }

        let left = &self.players[leaver];
        let remaining = &self.players[1 - leaver];
        info!(battle = %self.id, player = %left.id, "Player left the battle");

        if remaining.sink.is_connected() {
            let notice = ServerResponse::OpponentLeft(OpponentLeft {
                opponent_id: left.id.clone(),
                server_tick: i32::try_from(self.tick_count()).unwrap_or(i32::MAX),
            });
            if let Err(e) = remaining.sink.push(&notice) {
                debug!(battle = %self.id, player = %remaining.id, "Could not notify remaining player: {}", e);
            }
        }
        true
    }
}

async fn stopped(phase_rx: &mut watch::Receiver<BattlePhase>) {
    // The sender lives in the battle, which outlives its own tick task
    let _ = phase_rx.wait_for(|p| *p == BattlePhase::Stopped).await;
}
