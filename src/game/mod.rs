//! Round Logic
//!
//! Synchronous and transport-free. Time enters only as `Instant` arguments.
//!
//! ## Module Structure
//!
//! - `crash_point`: Crash point type and per-round generation
//! - `fairness`: Seed commitment and reveal verification
//! - `events`: Events emitted by the round engine
//! - `round`: The round state machine

pub mod crash_point;
pub mod events;
pub mod fairness;
pub mod round;

// Re-export key types
pub use crash_point::{CrashPoint, CrashPointSource, FairCrashPoints, ScriptedCrashPoints};
pub use events::RoundEvent;
pub use fairness::{FairnessError, RoundCommitment, RoundReveal};
pub use round::{RoundConfig, RoundEngine, RoundFault, RoundPhase, RoundSnapshot};
