//! # Park Lockstep
//!
//! Deterministic command dispatch and lockstep multiplayer sync for a
//! park-management simulation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PARK LOCKSTEP                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Two-word rotate/add PRNG                  │
//! │  ├── money.rs    - Fixed-point currency                      │
//! │  └── hash.rs     - Tick checksums                            │
//! │                                                              │
//! │  game/           - Command execution (deterministic)         │
//! │  ├── command.rs  - Kinds, flags, arguments, results          │
//! │  ├── registry.rs - Two-phase handlers, callbacks             │
//! │  ├── finance.rs  - Treasury and affordability gate           │
//! │  ├── dispatch.rs - Validate / afford / replicate / apply     │
//! │  ├── state.rs    - Simulation context, World trait           │
//! │  ├── tick.rs     - Fixed-step scheduler, autosave            │
//! │  └── events.rs   - Notifications for the host                │
//! │                                                              │
//! │  network/        - Replication (non-deterministic)           │
//! │  ├── sync.rs     - Command queue, ticks, desync checks       │
//! │  ├── transport.rs- Transport trait, channel transports       │
//! │  ├── server.rs   - WebSocket listener and connector          │
//! │  ├── protocol.rs - Wire messages                             │
//! │  ├── session.rs  - Players, groups, cooldowns                │
//! │  ├── auth.rs     - Password / JWT auth                       │
//! │  └── server_log.rs - Audit log                               │
//! │                                                              │
//! │  sandbox.rs      - Reference ruleset                         │
//! │  config.rs       - Engine configuration                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - Wall-clock time never reaches world state
//! - All randomness from the shared [`DeterministicRng`]
//!
//! Peers that load the same state and execute the same command stream at
//! the same ticks compute identical checksums.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod sandbox;

// Re-export commonly used types
pub use crate::config::EngineConfig;
pub use crate::core::money::{Money, MONEY_UNDEFINED};
pub use crate::core::rng::DeterministicRng;
pub use crate::game::command::{Command, CommandFlags, CommandKind, CommandResult};
pub use crate::game::state::{SimulationContext, World};
pub use crate::game::tick::{run_frame, tick};
pub use crate::network::sync::NetworkSync;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Duration of one simulation tick at normal speed (40 Hz)
pub const GAME_UPDATE_TIME_MS: u32 = 25;

/// Most ticks a single frame derives from elapsed wall-clock time
pub const GAME_MAX_UPDATES: u32 = 4;

/// Hard cap on ticks per frame, catch-up included
pub const MAX_UPDATES_PER_FRAME: u32 = 16;

/// Client lag in ticks that triggers catch-up
pub const CATCH_UP_THRESHOLD: u32 = 10;

/// Extra ticks per frame while catching up
pub const CATCH_UP_TICKS: u32 = 10;

/// Ticks between full-state checksums in tick broadcasts
pub const TICK_CHECKSUM_INTERVAL: u32 = 100;
