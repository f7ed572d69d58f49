//! Player Battle State
//!
//! Per-player state inside a battle: the shuffled deck, the hand dealt
//! from it, and the elixir pool.

use crate::core::rng::DeterministicRng;
use crate::network::protocol::{CardId, GameStateUpdate};

/// Cards in a deck.
pub const DECK_SIZE: usize = 8;

/// Cards in a hand.
pub const HAND_SIZE: usize = 4;

/// One player's state for the lifetime of a battle.
///
/// `hand`, `next_card` and `draw_pile` partition `deck`: together they
/// hold every card exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerBattleState {
    /// Current elixir, always within `[0, max_elixir]`.
    pub elixir: f64,
    /// The full shuffled deck.
    pub deck: [CardId; DECK_SIZE],
    /// Cards currently playable.
    pub hand: [CardId; HAND_SIZE],
    /// Card that enters the hand next.
    pub next_card: CardId,
    /// Remaining cards, in draw order.
    pub draw_pile: Vec<CardId>,
}

impl PlayerBattleState {
    /// Deal a fresh state from a uniformly shuffled 1..=8 deck.
    pub fn deal(rng: &mut DeterministicRng, starting_elixir: f64) -> Self {
        let mut deck: [CardId; DECK_SIZE] = [1, 2, 3, 4, 5, 6, 7, 8];
        rng.shuffle(&mut deck);

        let mut hand = [0; HAND_SIZE];
        hand.copy_from_slice(&deck[..HAND_SIZE]);

        Self {
            elixir: starting_elixir,
            deck,
            hand,
            next_card: deck[HAND_SIZE],
            draw_pile: deck[HAND_SIZE + 1..].to_vec(),
        }
    }

    /// Add one tick of elixir, saturating at `max_elixir`.
    ///
    /// Returns the new elixir value.
    pub fn regenerate(&mut self, per_tick: f64, max_elixir: f64) -> f64 {
        if self.elixir < max_elixir {
            self.elixir += per_tick;
        }
        self.elixir = self.elixir.clamp(0.0, max_elixir);
        self.elixir
    }

    /// Every card the player holds, in hand → next → draw pile order.
    pub fn cards(&self) -> impl Iterator<Item = CardId> + '_ {
        self.hand
            .iter()
            .copied()
            .chain(std::iter::once(self.next_card))
            .chain(self.draw_pile.iter().copied())
    }

    /// Copy the fields sent to the client.
    pub fn to_update(&self, server_tick: u32) -> GameStateUpdate {
        GameStateUpdate {
            elixir: self.elixir as f32,
            hand: self.hand.to_vec(),
            next_card: self.next_card,
            server_tick: i32::try_from(server_tick).unwrap_or(i32::MAX),
        }
    }
}
