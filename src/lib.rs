//! # Crash Round Server
//!
//! Server-authoritative crash game rounds broadcast to WebSocket observers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Leaf primitives                          │
//! │  ├── env.rs       - Environment lookups with fallbacks       │
//! │  ├── timer.rs     - Cancellable one-shot/repeating timer     │
//! │  ├── multiplier.rs- exp(t / 10) multiplier curve             │
//! │  └── rng.rs       - Deterministic Xorshift128+ PRNG          │
//! │                                                              │
//! │  game/            - Round logic (synchronous)                │
//! │  ├── crash_point.rs - Crash point generation                 │
//! │  ├── fairness.rs  - Seed commitment and reveal               │
//! │  ├── events.rs    - Round events                             │
//! │  └── round.rs     - Round state machine                      │
//! │                                                              │
//! │  network/         - Transport                                │
//! │  ├── protocol.rs  - JSON messages                            │
//! │  ├── hub.rs       - Observer fan-out                         │
//! │  ├── lifecycle.rs - Connect/disconnect, bootstrap            │
//! │  ├── http.rs      - Account HTTP API (axum)                  │
//! │  └── server.rs    - WebSocket server and engine task         │
//! │                                                              │
//! │  account/         - Accounts, bcrypt passwords, wallets      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Round Cycle
//!
//! `Idle → Waiting (8s) → Running (100ms ticks) → Crashed (2s) → Waiting`
//!
//! The round engine never reads the clock. Every operation takes the current
//! `Instant`, so the whole cycle can be driven from tests without sleeping.
//! In the server a single task owns the engine and the observer registry, and
//! connection tasks talk to it over a channel.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod account;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::multiplier::{format_multiplier, multiplier_at};
pub use game::crash_point::{CrashPoint, CrashPointSource, FairCrashPoints};
pub use game::round::{RoundConfig, RoundEngine, RoundPhase, RoundSnapshot};
pub use account::{AccountConfig, AccountService, Ledger};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
