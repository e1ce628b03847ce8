//! Crash Point Generation
//!
//! A crash point is drawn uniformly from `[1.00, 6.00]` and rounded to two
//! decimals. It is stored as hundredths so comparisons and the wire value are
//! exact.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;
use crate::game::fairness::{RoundCommitment, RoundReveal};

/// Lowest crash point, in hundredths (1.00x).
pub const MIN_CRASH_HUNDREDTHS: u32 = 100;
/// Highest crash point, in hundredths (6.00x).
pub const MAX_CRASH_HUNDREDTHS: u32 = 600;

/// A two-decimal crash multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrashPoint(u32);

impl CrashPoint {
    /// Construct from hundredths, e.g. `250` for 2.50x.
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    /// Round an arbitrary multiplier to the nearest hundredth.
    ///
    /// Values below 1.00 (or non-finite) clamp to 1.00.
    pub fn from_multiplier(value: f64) -> Self {
        if !value.is_finite() || value < 1.0 {
            return Self(MIN_CRASH_HUNDREDTHS);
        }
        let hundredths = (value * 100.0).round();
        if hundredths >= u32::MAX as f64 {
            Self(u32::MAX)
        } else {
            Self(hundredths as u32)
        }
    }

    /// Map a uniform sample `u` in `[0, 1)` onto `[1.00, 6.00]`.
    pub fn from_unit(u: f64) -> Self {
        let span = f64::from(MAX_CRASH_HUNDREDTHS - MIN_CRASH_HUNDREDTHS);
        let hundredths = (f64::from(MIN_CRASH_HUNDREDTHS) + u.clamp(0.0, 1.0) * span).round() as u32;
        Self(hundredths.clamp(MIN_CRASH_HUNDREDTHS, MAX_CRASH_HUNDREDTHS))
    }

    /// Hundredths value.
    pub fn hundredths(self) -> u32 {
        self.0
    }

    /// Multiplier as a float (for comparison with the live curve).
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for CrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Crash point for one round plus its fairness material.
#[derive(Clone, Debug)]
pub struct CommittedCrash {
    /// The hidden crash point.
    pub crash_point: CrashPoint,
    /// Published at round start.
    pub commitment: RoundCommitment,
    /// Published at crash.
    pub reveal: RoundReveal,
}

/// Source of crash points, one per round.
///
/// Called exactly once when a round enters Running.
pub trait CrashPointSource: Send {
    /// Commit to the crash point of `round_id`.
    fn draw(&mut self, round_id: u64) -> CommittedCrash;
}

/// Where round seeds come from.
enum SeedSource {
    /// Operating system entropy (production).
    Entropy,
    /// Seeds drawn from a fixed PRNG (replays and tests).
    Seeded(DeterministicRng),
}

/// Production crash point source: fresh 32-byte seed per round, crash point
/// derived from the seed so the reveal can be checked.
pub struct FairCrashPoints {
    seeds: SeedSource,
}

impl FairCrashPoints {
    /// Seeds from OS entropy.
    pub fn from_entropy() -> Self {
        Self { seeds: SeedSource::Entropy }
    }

    /// Reproducible seeds.
    pub fn seeded(seed: u64) -> Self {
        Self { seeds: SeedSource::Seeded(DeterministicRng::new(seed)) }
    }

    fn next_seed(&mut self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        match &mut self.seeds {
            SeedSource::Entropy => rand::thread_rng().fill_bytes(&mut seed),
            SeedSource::Seeded(rng) => {
                for chunk in seed.chunks_mut(8) {
                    chunk.copy_from_slice(&rng.next_u64().to_le_bytes());
                }
            }
        }
        seed
    }
}

impl CrashPointSource for FairCrashPoints {
    fn draw(&mut self, round_id: u64) -> CommittedCrash {
        let server_seed = self.next_seed();
        let crash_point = crash_point_from_seed(&server_seed, round_id);
        CommittedCrash {
            crash_point,
            commitment: RoundCommitment::new(round_id, &server_seed),
            reveal: RoundReveal { round_id, server_seed },
        }
    }
}

/// Recompute a round's crash point from its revealed seed.
pub fn crash_point_from_seed(server_seed: &[u8; 32], round_id: u64) -> CrashPoint {
    let mut rng = DeterministicRng::for_round(server_seed, round_id);
    CrashPoint::from_unit(rng.next_unit_f64())
}

/// Hands out a scripted sequence of crash points (cycled); for tests and demos.
#[derive(Debug, Clone)]
pub struct ScriptedCrashPoints {
    points: Vec<CrashPoint>,
    cursor: usize,
}

impl ScriptedCrashPoints {
    /// Cycle through `points`. An empty script always yields 1.00x.
    pub fn new(points: Vec<CrashPoint>) -> Self {
        Self { points, cursor: 0 }
    }
}

impl CrashPointSource for ScriptedCrashPoints {
    fn draw(&mut self, round_id: u64) -> CommittedCrash {
        let crash_point = if self.points.is_empty() {
            CrashPoint::from_hundredths(MIN_CRASH_HUNDREDTHS)
        } else {
            let point = self.points[self.cursor % self.points.len()];
            self.cursor += 1;
            point
        };
        // Scripted rounds carry a placeholder seed; their commitment does not
        // bind the crash point.
        let server_seed = [0u8; 32];
        CommittedCrash {
            crash_point,
            commitment: RoundCommitment::new(round_id, &server_seed),
            reveal: RoundReveal { round_id, server_seed },
        }
    }
}
