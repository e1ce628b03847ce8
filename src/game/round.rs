//! Round State Machine
//!
//! Drives one round at a time through `Idle → Waiting → Running → Crashed →
//! Waiting → ...`. The engine is synchronous: callers pass the current instant
//! and receive the events to broadcast, and it arms at most one timer which
//! the owner polls via [`RoundEngine::advance`] once
//! [`RoundEngine::next_deadline`] has passed.
//!
//! The engine never decides when the first round starts; its owner calls
//! [`RoundEngine::start`].

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::core::env::{env_millis, env_parse};
use crate::core::multiplier::{multiplier_at, DEFAULT_GROWTH_RATE};
use crate::core::timer::{TimerKind, TimerSlot};
use crate::game::crash_point::{CrashPoint, CrashPointSource};
use crate::game::events::RoundEvent;
use crate::game::fairness::{RoundCommitment, RoundReveal};

/// Round timing configuration.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Seconds counted down in Waiting.
    pub countdown_secs: u32,
    /// Interval between countdown ticks.
    pub countdown_tick: Duration,
    /// Interval between multiplier ticks.
    pub progress_tick: Duration,
    /// Pause between Crashed and the next Waiting phase.
    pub cooldown: Duration,
    /// Seconds per e-fold of the multiplier curve.
    pub growth_rate: f64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 8,
            countdown_tick: Duration::from_secs(1),
            progress_tick: Duration::from_millis(100),
            cooldown: Duration::from_secs(2),
            growth_rate: DEFAULT_GROWTH_RATE,
        }
    }
}

impl RoundConfig {
    /// Create config from environment variables.
    ///
    /// Reads `ROUND_COUNTDOWN_SECS`, `ROUND_COUNTDOWN_TICK_MS`,
    /// `ROUND_PROGRESS_TICK_MS`, `ROUND_COOLDOWN_MS` and `ROUND_GROWTH_RATE`.
    /// Unset or unparsable values keep their defaults. Tick intervals are at
    /// least 1 ms and the growth rate must be finite and positive.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let min_tick = Duration::from_millis(1);

        let growth_rate = env_parse("ROUND_GROWTH_RATE", defaults.growth_rate);
        let growth_rate = if growth_rate.is_finite() && growth_rate > 0.0 {
            growth_rate
        } else {
            warn!("Ignoring ROUND_GROWTH_RATE={}: must be positive", growth_rate);
            defaults.growth_rate
        };

        Self {
            countdown_secs: env_parse("ROUND_COUNTDOWN_SECS", defaults.countdown_secs).max(1),
            countdown_tick: env_millis("ROUND_COUNTDOWN_TICK_MS", defaults.countdown_tick).max(min_tick),
            progress_tick: env_millis("ROUND_PROGRESS_TICK_MS", defaults.progress_tick).max(min_tick),
            cooldown: env_millis("ROUND_COOLDOWN_MS", defaults.cooldown),
            growth_rate,
        }
    }
}

/// Phase of the active round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No round yet (or engine shut down).
    Idle,
    /// Counting down to start.
    Waiting,
    /// Multiplier growing.
    Running,
    /// Crash point reached; cooling down.
    Crashed,
}

/// Faults inside a progress tick. Each one force-crashes the round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoundFault {
    /// Running without a committed crash point.
    #[error("round {0} is running without a crash point")]
    MissingCrashPoint(u64),

    /// Running without a start time.
    #[error("round {0} is running without a start time")]
    MissingStartTime(u64),

    /// Multiplier curve produced NaN or infinity.
    #[error("non-finite multiplier {value} in round {round_id}")]
    NonFiniteMultiplier {
        /// Faulting round.
        round_id: u64,
        /// The offending value.
        value: f64,
    },
}

/// The single active round.
#[derive(Debug, Clone)]
struct Round {
    id: u64,
    phase: RoundPhase,
    /// Hidden from observers until Crashed.
    crash_point: Option<CrashPoint>,
    commitment: Option<RoundCommitment>,
    reveal: Option<RoundReveal>,
    started_at: Option<Instant>,
    /// Valid only during Waiting.
    countdown_remaining: u32,
    /// Highest multiplier broadcast this round.
    last_multiplier: f64,
}

impl Round {
    fn idle() -> Self {
        Self::new(0, RoundPhase::Idle, 0)
    }

    fn new(id: u64, phase: RoundPhase, countdown_remaining: u32) -> Self {
        Self {
            id,
            phase,
            crash_point: None,
            commitment: None,
            reveal: None,
            started_at: None,
            countdown_remaining,
            last_multiplier: 1.0,
        }
    }
}

/// Observer-visible view of the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSnapshot {
    /// Round id (0 before the first round).
    pub round_id: u64,
    /// Current phase.
    pub phase: RoundPhase,
    /// Crash point, only once revealed.
    pub crash_point: Option<CrashPoint>,
    /// Remaining countdown, only during Waiting.
    pub countdown: Option<u32>,
    /// Seed commitment, once the round is running.
    pub commitment: Option<RoundCommitment>,
}

impl RoundSnapshot {
    /// Whether the multiplier is currently running.
    pub fn game_active(&self) -> bool {
        self.phase == RoundPhase::Running
    }
}

enum TickOutcome {
    Progress(f64),
    Crashed,
}

/// Owns the round, its timer and the crash point source.
pub struct RoundEngine {
    config: RoundConfig,
    round: Round,
    timer: TimerSlot,
    source: Box<dyn CrashPointSource>,
    last_round_id: u64,
}

impl RoundEngine {
    /// Create an idle engine.
    pub fn new(config: RoundConfig, source: Box<dyn CrashPointSource>) -> Self {
        Self {
            config,
            round: Round::idle(),
            timer: TimerSlot::new(),
            source,
            last_round_id: 0,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    /// Id of the active round.
    pub fn round_id(&self) -> u64 {
        self.round.id
    }

    /// When the owner must next call [`advance`](Self::advance).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_deadline()
    }

    /// Begin the round cycle (`Idle → Waiting`).
    ///
    /// A no-op unless the engine is idle, so repeated calls never start a
    /// second concurrent round.
    pub fn start(&mut self, now: Instant) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        if self.round.phase != RoundPhase::Idle {
            debug!("Start ignored, round {} is {:?}", self.round.id, self.round.phase);
            return events;
        }
        self.begin_waiting(now, &mut events);
        events
    }

    /// Fire every timer due at `now` and return the resulting events.
    pub fn advance(&mut self, now: Instant) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        while let Some(kind) = self.timer.poll(now) {
            self.on_timer(kind, now, &mut events);
        }
        events
    }

    /// Force-crash a running round. No-op in any other phase.
    pub fn abort_round(&mut self, now: Instant, reason: &str) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        if self.round.phase == RoundPhase::Running {
            warn!("Aborting round {}: {}", self.round.id, reason);
            self.crash(now, true, &mut events);
        }
        events
    }

    /// Cancel timers and return to Idle.
    pub fn shutdown(&mut self) {
        if let Some(kind) = self.timer.cancel() {
            debug!("Cancelled pending {:?} timer", kind);
        }
        if self.round.phase != RoundPhase::Idle {
            info!("Round engine shut down during round {} ({:?})", self.round.id, self.round.phase);
        }
        self.round = Round::idle();
    }

    /// Observer-visible state.
    pub fn snapshot(&self) -> RoundSnapshot {
        let round = &self.round;
        RoundSnapshot {
            round_id: round.id,
            phase: round.phase,
            crash_point: match round.phase {
                RoundPhase::Crashed => round.crash_point,
                _ => None,
            },
            countdown: match round.phase {
                RoundPhase::Waiting => Some(round.countdown_remaining),
                _ => None,
            },
            commitment: match round.phase {
                RoundPhase::Running | RoundPhase::Crashed => round.commitment,
                _ => None,
            },
        }
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant, events: &mut Vec<RoundEvent>) {
        match (kind, self.round.phase) {
            (TimerKind::Countdown, RoundPhase::Waiting) => {
                self.round.countdown_remaining = self.round.countdown_remaining.saturating_sub(1);
                if self.round.countdown_remaining == 0 {
                    self.begin_running(now, events);
                } else {
                    events.push(RoundEvent::Waiting {
                        round_id: self.round.id,
                        countdown: self.round.countdown_remaining,
                    });
                }
            }
            (TimerKind::Progress, RoundPhase::Running) => match self.progress_tick(now) {
                Ok(TickOutcome::Progress(multiplier)) => {
                    trace!("Round {} at {:.2}x", self.round.id, multiplier);
                    events.push(RoundEvent::Progress {
                        round_id: self.round.id,
                        multiplier,
                    });
                }
                Ok(TickOutcome::Crashed) => self.crash(now, false, events),
                Err(fault) => {
                    warn!("Tick fault: {}", fault);
                    self.crash(now, true, events);
                }
            },
            (TimerKind::Cooldown, RoundPhase::Crashed) => self.begin_waiting(now, events),
            (kind, phase) => {
                // Every transition re-arms the slot, so this means a bug.
                warn!("Dropping {:?} timer fired in phase {:?}", kind, phase);
                self.timer.cancel();
            }
        }
    }

    fn begin_waiting(&mut self, now: Instant, events: &mut Vec<RoundEvent>) {
        self.last_round_id += 1;
        self.round = Round::new(self.last_round_id, RoundPhase::Waiting, self.config.countdown_secs);
        info!("Round {} waiting ({}s countdown)", self.round.id, self.config.countdown_secs);

        if self.config.countdown_secs == 0 {
            self.begin_running(now, events);
            return;
        }

        self.timer
            .schedule_repeating(TimerKind::Countdown, now, self.config.countdown_tick);
        events.push(RoundEvent::Waiting {
            round_id: self.round.id,
            countdown: self.round.countdown_remaining,
        });
    }

    fn begin_running(&mut self, now: Instant, events: &mut Vec<RoundEvent>) {
        let committed = self.source.draw(self.round.id);
        let round = &mut self.round;
        round.phase = RoundPhase::Running;
        round.crash_point = Some(committed.crash_point);
        round.commitment = Some(committed.commitment);
        round.reveal = Some(committed.reveal);
        round.started_at = Some(now);
        round.countdown_remaining = 0;
        round.last_multiplier = 1.0;

        self.timer
            .schedule_repeating(TimerKind::Progress, now, self.config.progress_tick);
        info!("Round {} running (commitment {})", round.id, committed.commitment.to_hex());
        events.push(RoundEvent::GameStart {
            round_id: round.id,
            commitment: committed.commitment,
        });
    }

    fn progress_tick(&mut self, now: Instant) -> Result<TickOutcome, RoundFault> {
        let round = &mut self.round;
        let started_at = round.started_at.ok_or(RoundFault::MissingStartTime(round.id))?;
        let crash_point = round.crash_point.ok_or(RoundFault::MissingCrashPoint(round.id))?;

        let elapsed = now.saturating_duration_since(started_at);
        let multiplier = multiplier_at(elapsed, self.config.growth_rate);
        if !multiplier.is_finite() {
            return Err(RoundFault::NonFiniteMultiplier {
                round_id: round.id,
                value: multiplier,
            });
        }

        if multiplier >= crash_point.as_f64() {
            return Ok(TickOutcome::Crashed);
        }

        round.last_multiplier = round.last_multiplier.max(multiplier);
        Ok(TickOutcome::Progress(round.last_multiplier))
    }

    fn crash(&mut self, now: Instant, forced: bool, events: &mut Vec<RoundEvent>) {
        // Stop the progress ticker before anything else can fire.
        self.timer.cancel();

        let round = &mut self.round;
        let last_multiplier = round.last_multiplier;
        let crash_point = *round
            .crash_point
            .get_or_insert_with(|| CrashPoint::from_multiplier(last_multiplier));
        round.phase = RoundPhase::Crashed;

        self.timer.schedule_once(TimerKind::Cooldown, now + self.config.cooldown);
        info!("Round {} crashed at {}x{}", round.id, crash_point, if forced { " (forced)" } else { "" });
        events.push(RoundEvent::Crash {
            round_id: round.id,
            crash_point,
            reveal: round.reveal,
            forced,
        });
    }
}
