//! Network Layer
//!
//! WebSocket transport, per-player sessions and matchmaking.
//! Battles are driven from `game/`; this layer only moves frames.

pub mod connection;
pub mod matchmaking;
pub mod protocol;
pub mod registry;
pub mod server;

pub use connection::{ConnectionHandle, ConnectionId, PlayerIdentity};
pub use matchmaking::{MatchmakingQueue, QueueEntry};
pub use protocol::{
    CardId, DecodeError, EncodeError, GameStateUpdate, JoinQueueRequest, MatchFound,
    OpponentLeft, ServerResponse,
};
pub use registry::SessionRegistry;
pub use server::{DisconnectReason, GameServer, GameServerError, HandshakeError, WS_PATH};
