//! Deck Generation
//!
//! Builds a shuffled deck of paired symbols. Every symbol appears exactly
//! twice and each card's id is its position in the deck.

use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;

/// Glyphs available for card faces.
pub const SYMBOL_CATALOG: [&str; 18] = [
    "🍎", "🍌", "🍇", "🍒", "🍍", "🍉", "🥝", "🍑", "🥥",
    "🍓", "🍋", "🍐", "🫐", "🍈", "🥭", "🍊", "🥕", "🍆",
];

/// Smallest playable deck.
pub const MIN_CARD_COUNT: usize = 4;

/// Largest deck the catalog can fill.
pub const MAX_CARD_COUNT: usize = SYMBOL_CATALOG.len() * 2;

/// Deck size used when a room does not ask for one (8 pairs).
pub const DEFAULT_CARD_COUNT: usize = 16;

/// Card face, as an index into [`SYMBOL_CATALOG`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub u8);

impl Symbol {
    /// Glyph shown to clients.
    pub fn glyph(self) -> &'static str {
        SYMBOL_CATALOG[self.0 as usize % SYMBOL_CATALOG.len()]
    }
}

/// A single card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Position in the deck.
    pub id: u32,
    /// Face symbol.
    pub symbol: Symbol,
}

/// Clamp a requested card count into the playable range, rounded down to even.
pub fn normalize_card_count(requested: usize) -> usize {
    requested.clamp(MIN_CARD_COUNT, MAX_CARD_COUNT) & !1
}

/// Generate a shuffled deck.
///
/// `card_count` is normalized first, so any request yields a valid deck.
pub fn generate(card_count: usize, rng: &mut DeterministicRng) -> Vec<Card> {
    let card_count = normalize_card_count(card_count);
    let pairs = card_count / 2;

    let mut symbols: Vec<Symbol> = (0..pairs as u8)
        .flat_map(|s| [Symbol(s), Symbol(s)])
        .collect();
    rng.shuffle(&mut symbols);

    symbols
        .into_iter()
        .enumerate()
        .map(|(position, symbol)| Card { id: position as u32, symbol })
        .collect()
}

/// Build a deck from symbols in the given order, without shuffling.
///
/// Returns `None` unless every symbol appears exactly twice and the length
/// is within the playable range.
pub fn from_symbols(symbols: &[Symbol]) -> Option<Vec<Card>> {
    if symbols.len() < MIN_CARD_COUNT || symbols.len() > MAX_CARD_COUNT || symbols.len() % 2 != 0 {
        return None;
    }

    let mut counts = [0u8; SYMBOL_CATALOG.len()];
    for symbol in symbols {
        let slot = counts.get_mut(symbol.0 as usize)?;
        *slot += 1;
    }
    if counts.iter().any(|&c| c != 0 && c != 2) {
        return None;
    }

    Some(
        symbols
            .iter()
            .enumerate()
            .map(|(position, &symbol)| Card { id: position as u32, symbol })
            .collect(),
    )
}
