//! Leaf primitives.
//!
//! Timer slots, the multiplier curve, the deterministic RNG and environment
//! lookups. Nothing here knows about rounds, sessions or the network.

pub mod env;
pub mod multiplier;
pub mod rng;
pub mod timer;

// Re-export core types
pub use env::{env_flag, env_millis, env_parse};
pub use multiplier::{format_multiplier, multiplier_at, round2, DEFAULT_GROWTH_RATE};
pub use rng::DeterministicRng;
pub use timer::{TimerKind, TimerSlot};
