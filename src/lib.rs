//! # Clash Game Server
//!
//! Authoritative matchmaking and battle server for a two-player card game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CLASH SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config.rs        - Tunables and CLASH_* env overrides       │
//! │                                                              │
//! │  core/                                                       │
//! │  └── rng.rs       - Xorshift128+ PRNG, deck seed derivation  │
//! │                                                              │
//! │  game/                                                       │
//! │  ├── deck.rs      - Deck, hand, elixir                       │
//! │  └── battle.rs    - Battle lifecycle and tick loop           │
//! │                                                              │
//! │  network/                                                    │
//! │  ├── protocol.rs  - Binary wire codec                        │
//! │  ├── connection.rs- Shareable connection handles             │
//! │  ├── registry.rs  - One live session per player id           │
//! │  ├── matchmaking.rs - First-fit trophy queue                 │
//! │  └── server.rs    - Accept loop and connection supervisors   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow
//!
//! A client upgrades on `/ws`, sends one `JoinQueueRequest`, and either
//! waits in the queue or is paired immediately. Both players then receive
//! `MatchFound`, followed by a `GameState` frame every tick until one of
//! them leaves.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{BattleConfig, ConfigError, ServerConfig};
pub use crate::core::rng::DeterministicRng;
pub use game::battle::{Battle, StateSink};
pub use network::protocol::{JoinQueueRequest, ServerResponse};
pub use network::server::{GameServer, GameServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
