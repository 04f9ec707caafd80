//! Core deterministic primitives.
//!
//! Everything here is pure integer math shared verbatim by every peer.

pub mod hash;
pub mod money;
pub mod rng;

// Re-export core types
pub use hash::{compute_tick_checksum, Checksum, StateHasher};
pub use money::{format_money, money, Money, MONEY_UNDEFINED};
pub use rng::DeterministicRng;
