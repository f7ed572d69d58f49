//! Core primitives.
//!
//! Seedable randomness shared by the battle engine and its tests.

pub mod rng;

// Re-export core types
pub use rng::DeterministicRng;
