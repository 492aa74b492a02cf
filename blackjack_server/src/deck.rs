// Deck handling and hand valuation.
//
// A deck is the 52 distinct cards with a cursor to the next draw. Drawing
// with the cursor at the end reshuffles and resets it, so a draw never
// fails — even in the rare match long enough to exhaust the deck, at the
// cost of repeated card values from that point on.

use rand::seq::SliceRandom;
use rand::Rng;

use blackjack_protocol::{Card, Suit};

pub const DECK_SIZE: usize = 52;

/// Blackjack target; hands above it are busted.
pub const BUST_LIMIT: u32 = 21;

pub struct Deck {
    cards: Vec<Card>,
    cursor: usize,
}

impl Deck {
    /// A deck in suit-then-rank order. Shuffle before play.
    pub fn new() -> Deck {
        let mut cards = Vec::with_capacity(DECK_SIZE);
        for suit in Suit::ALL {
            for rank in 1..=13 {
                cards.push(Card { rank, suit });
            }
        }
        Deck { cards, cursor: 0 }
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.cards.shuffle(rng);
        self.cursor = 0;
    }

    /// Draw the next card, reshuffling when the deck is spent.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Card {
        if self.cursor >= self.cards.len() {
            self.shuffle(rng);
        }
        let card = self.cards[self.cursor];
        self.cursor += 1;
        card
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Default for Deck {
    fn default() -> Self {
        Deck::new()
    }
}

/// Hand value: faces count 10, aces start at 11 and demote to 1 one at a
/// time while the total is over the limit.
pub fn hand_value(hand: &[Card]) -> u32 {
    let mut sum = 0;
    let mut aces = 0;
    for card in hand {
        match card.rank {
            1 => {
                aces += 1;
                sum += 11;
            }
            rank if rank >= 10 => sum += 10,
            rank => sum += u32::from(rank),
        }
    }
    while sum > BUST_LIMIT && aces > 0 {
        sum -= 10;
        aces -= 1;
    }
    sum
}
