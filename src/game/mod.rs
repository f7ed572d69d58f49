//! Game Logic Module
//!
//! ## Module Structure
//!
//! - `deck`: Deck shuffling, hand dealing, elixir regeneration
//! - `battle`: Battle lifecycle and the authoritative tick loop

pub mod battle;
pub mod deck;

// Re-export key types
pub use battle::{Battle, BattleError, BattlePhase, Participant, PushError, StateSink, StepOutcome};
pub use deck::{PlayerBattleState, DECK_SIZE, HAND_SIZE};
