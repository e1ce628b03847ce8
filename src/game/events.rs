//! Round Events
//!
//! Emitted by the round engine for the broadcast hub to fan out.

use crate::game::crash_point::CrashPoint;
use crate::game::fairness::{RoundCommitment, RoundReveal};

/// State change of the active round.
#[derive(Clone, Debug, PartialEq)]
pub enum RoundEvent {
    /// Countdown tick during Waiting.
    Waiting {
        /// Round being counted down.
        round_id: u64,
        /// Seconds until the round starts.
        countdown: u32,
    },

    /// Round entered Running. The crash point is now committed.
    GameStart {
        /// Round that started.
        round_id: u64,
        /// Commitment to this round's seed.
        commitment: RoundCommitment,
    },

    /// Multiplier tick during Running.
    Progress {
        /// Running round.
        round_id: u64,
        /// Current multiplier (unrounded).
        multiplier: f64,
    },

    /// Round crashed; the crash point is revealed.
    Crash {
        /// Round that crashed.
        round_id: u64,
        /// The committed crash point.
        crash_point: CrashPoint,
        /// Seed opening the commitment. `None` if the round faulted before
        /// a crash point was committed.
        reveal: Option<RoundReveal>,
        /// True when the round was terminated by a fault or an abort.
        forced: bool,
    },
}

impl RoundEvent {
    /// Round the event belongs to.
    pub fn round_id(&self) -> u64 {
        match self {
            RoundEvent::Waiting { round_id, .. }
            | RoundEvent::GameStart { round_id, .. }
            | RoundEvent::Progress { round_id, .. }
            | RoundEvent::Crash { round_id, .. } => *round_id,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::Waiting { .. } => "waiting",
            RoundEvent::GameStart { .. } => "game_start",
            RoundEvent::Progress { .. } => "progress",
            RoundEvent::Crash { .. } => "crash",
        }
    }
}
