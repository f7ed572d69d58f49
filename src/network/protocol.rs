//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every binary WebSocket message carries exactly one bincode-encoded
//! message. Integers are fixed-width and trailing bytes are rejected.

use bincode::Options;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Card identifier.
pub type CardId = i32;

/// Default upper bound on a single inbound message, matching the default
/// inbound frame limit.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Failure to decode an inbound frame. Fatal for the connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame contained no bytes.
    #[error("empty frame")]
    Empty,
    /// Frame was truncated, malformed, oversized or had trailing bytes.
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Failure to encode an outbound message. Aborts that single send.
#[derive(Debug, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] bincode::Error);

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

// Only the inbound side is bounded; outbound size is whatever the message needs
fn decode<T: for<'de> Deserialize<'de>>(data: &[u8], limit: usize) -> Result<T, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(wire().with_limit(limit as u64).deserialize(data)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(wire().serialize(value)?)
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Handshake request; the only message a client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinQueueRequest {
    /// Player's unique identifier.
    pub player_id: String,
    /// Player's trophy count, used for matchmaking distance.
    pub trophies: i32,
}

impl JoinQueueRequest {
    /// Serialize to binary.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    /// Deserialize from binary, bounded by [`MAX_MESSAGE_BYTES`].
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_with_limit(data, MAX_MESSAGE_BYTES)
    }

    /// Deserialize from binary, reading at most `max_bytes`.
    pub fn decode_with_limit(data: &[u8], max_bytes: usize) -> Result<Self, DecodeError> {
        decode(data, max_bytes)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerResponse {
    /// An opponent was found and a battle is about to start.
    MatchFound(MatchFound),
    /// Authoritative per-tick state of the receiving player.
    GameState(GameStateUpdate),
    /// The opponent disconnected and the battle has ended.
    OpponentLeft(OpponentLeft),
}

/// Information about a found match, from the receiver's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    /// Opponent's player identifier.
    pub opponent_id: String,
    /// Opponent's trophy count.
    pub opponent_trophies: i32,
    /// Room identifier, identical for both participants.
    pub room_id: String,
}

/// Game state update (sent every tick).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateUpdate {
    /// Current elixir.
    pub elixir: f32,
    /// Cards in hand (always 4).
    pub hand: Vec<CardId>,
    /// Card that enters the hand next.
    pub next_card: CardId,
    /// Battle tick this state belongs to.
    pub server_tick: i32,
}

/// Battle ended because the opponent went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpponentLeft {
    /// Player that disconnected.
    pub opponent_id: String,
    /// Last tick the battle ran.
    pub server_tick: i32,
}

impl ServerResponse {
    /// Serialize to binary.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    /// Deserialize from binary.
    ///
    /// Server messages are not size-capped; a length prefix can still never
    /// claim more bytes than the frame holds.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        decode(data, data.len())
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MatchFound(_) => "match_found",
            Self::GameState(_) => "game_state",
            Self::OpponentLeft(_) => "opponent_left",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_request_roundtrip() {
        let request = JoinQueueRequest {
            player_id: "alice".to_string(),
            trophies: 1050,
        };

        let bytes = request.encode().unwrap();
        assert_eq!(JoinQueueRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_join_request_layout() {
        let request = JoinQueueRequest {
            player_id: "ab".to_string(),
            trophies: -1,
        };

        // u64 string length, utf-8 bytes, i32 trophies
        let bytes = request.encode().unwrap();
        assert_eq!(bytes, vec![2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b', 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_server_response_variants() {
        let responses = vec![
            ServerResponse::MatchFound(MatchFound {
                opponent_id: "bob".to_string(),
                opponent_trophies: 1000,
                room_id: "room_alice_bob".to_string(),
            }),
            ServerResponse::GameState(GameStateUpdate {
                elixir: 5.5,
                hand: vec![3, 1, 8, 5],
                next_card: 2,
                server_tick: 17,
            }),
            ServerResponse::OpponentLeft(OpponentLeft {
                opponent_id: "bob".to_string(),
                server_tick: 40,
            }),
        ];

        for response in responses {
            let bytes = response.encode().unwrap();
            assert_eq!(ServerResponse::decode(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn test_variant_tag_is_leading_u32() {
        let bytes = ServerResponse::GameState(GameStateUpdate {
            elixir: 0.0,
            hand: vec![1, 2, 3, 4],
            next_card: 5,
            server_tick: 0,
        })
        .encode()
        .unwrap();

        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(matches!(JoinQueueRequest::decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = JoinQueueRequest {
            player_id: "alice".to_string(),
            trophies: 1000,
        }
        .encode()
        .unwrap();

        let result = JoinQueueRequest::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = JoinQueueRequest {
            player_id: "alice".to_string(),
            trophies: 1000,
        }
        .encode()
        .unwrap();
        bytes.push(0);

        assert!(JoinQueueRequest::decode(&bytes).is_err());
    }

    #[test]
    fn test_absurd_length_prefix_rejected() {
        // Claims a 2^40 byte player id
        let mut bytes = (1u64 << 40).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);

        assert!(JoinQueueRequest::decode(&bytes).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut bytes = 2u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(&1000i32.to_le_bytes());

        assert!(JoinQueueRequest::decode(&bytes).is_err());
    }

    #[test]
    fn test_configured_limit_applies_to_handshake() {
        let bytes = JoinQueueRequest {
            player_id: "x".repeat(5000),
            trophies: 1000,
        }
        .encode()
        .unwrap();

        assert!(JoinQueueRequest::decode(&bytes).is_err());
        let request = JoinQueueRequest::decode_with_limit(&bytes, 8192).unwrap();
        assert_eq!(request.player_id.len(), 5000);
    }

    #[test]
    fn test_match_found_for_long_ids_encodes() {
        // Largest ids a default-sized handshake can carry
        let id_len = MAX_MESSAGE_BYTES - 12;
        let seeker = "a".repeat(id_len);
        let opponent = "b".repeat(id_len);
        let handshake = JoinQueueRequest {
            player_id: seeker.clone(),
            trophies: 1000,
        }
        .encode()
        .unwrap();
        assert_eq!(handshake.len(), MAX_MESSAGE_BYTES);
        assert!(JoinQueueRequest::decode(&handshake).is_ok());

        let response = ServerResponse::MatchFound(MatchFound {
            opponent_id: opponent.clone(),
            opponent_trophies: 1000,
            room_id: format!("room_{}_{}", seeker, opponent),
        });
        let bytes = response.encode().unwrap();
        assert!(bytes.len() > MAX_MESSAGE_BYTES);
        assert_eq!(ServerResponse::decode(&bytes).unwrap(), response);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let bytes = 9u32.to_le_bytes();
        assert!(ServerResponse::decode(&bytes).is_err());
    }
}
