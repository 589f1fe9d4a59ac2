//! Card and deck types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of cards in a deck.
pub const DECK_SIZE: usize = 8;

/// Tactical role a card plays in a deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardRole {
    WinCondition,
    Building,
    BigSpell,
    SmallSpell,
    Support,
    Cycle,
}

impl CardRole {
    /// All roles in canonical order.
    pub const ALL: [CardRole; 6] = [
        CardRole::WinCondition,
        CardRole::Building,
        CardRole::BigSpell,
        CardRole::SmallSpell,
        CardRole::Support,
        CardRole::Cycle,
    ];

    /// Stable string form, matching the serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CardRole::WinCondition => "win_condition",
            CardRole::Building => "building",
            CardRole::BigSpell => "big_spell",
            CardRole::SmallSpell => "small_spell",
            CardRole::Support => "support",
            CardRole::Cycle => "cycle",
        }
    }
}

impl fmt::Display for CardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A card available to the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardCandidate {
    /// Card name, unique within a pool.
    pub name: String,
    /// Elixir cost (0-10).
    pub elixir: u8,
    /// Tactical role.
    pub role: CardRole,
    /// Rarity label.
    #[serde(default)]
    pub rarity: String,
    /// Owned level.
    #[serde(default = "default_level")]
    pub level: u32,
    /// Maximum level for this card.
    #[serde(default = "default_level")]
    pub max_level: u32,
    /// External sampling bias for the smart strategy.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_level() -> u32 {
    1
}
fn default_weight() -> f64 {
    1.0
}

impl CardCandidate {
    /// Create a candidate at max level with neutral weight.
    pub fn new(name: impl Into<String>, elixir: u8, role: CardRole) -> Self {
        Self {
            name: name.into(),
            elixir,
            role,
            rarity: String::new(),
            level: 1,
            max_level: 1,
            weight: 1.0,
        }
    }

    /// Owned level as a fraction of the max level, in [0, 1].
    pub fn level_ratio(&self) -> f64 {
        if self.max_level == 0 {
            return 0.0;
        }
        (self.level as f64 / self.max_level as f64).clamp(0.0, 1.0)
    }
}

/// Errors building a deck.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeckError {
    #[error("A deck needs exactly {DECK_SIZE} cards, got {0}")]
    WrongSize(usize),
    #[error("Duplicate card in deck: {0}")]
    DuplicateCard(String),
}

/// Exactly eight distinct cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    cards: Vec<CardCandidate>,
}

impl Deck {
    /// Build a deck, rejecting wrong sizes and duplicate names.
    pub fn new(cards: Vec<CardCandidate>) -> Result<Self, DeckError> {
        if cards.len() != DECK_SIZE {
            return Err(DeckError::WrongSize(cards.len()));
        }
        let mut seen = HashSet::with_capacity(DECK_SIZE);
        for card in &cards {
            if !seen.insert(card.name.as_str()) {
                return Err(DeckError::DuplicateCard(card.name.clone()));
            }
        }
        Ok(Self { cards })
    }

    pub fn cards(&self) -> &[CardCandidate] {
        &self.cards
    }

    /// Card names in deck order.
    pub fn names(&self) -> Vec<String> {
        self.cards.iter().map(|c| c.name.clone()).collect()
    }

    /// Mean elixir cost.
    pub fn avg_elixir(&self) -> f64 {
        let total: u32 = self.cards.iter().map(|c| c.elixir as u32).sum();
        total as f64 / DECK_SIZE as f64
    }

    /// Number of cards with the given role.
    pub fn count_role(&self, role: CardRole) -> usize {
        self.cards.iter().filter(|c| c.role == role).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cards.iter().any(|c| c.name == name)
    }

    /// Order-independent card-set identity.
    pub fn key(&self) -> String {
        deck_key(self.cards.iter().map(|c| c.name.as_str()))
    }

    /// SHA-256 hex digest of [`Deck::key`].
    pub fn hash(&self) -> String {
        deck_hash(&self.key())
    }
}

impl fmt::Display for Deck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.cards.iter().map(|c| c.name.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Sorted names joined with `|`.
pub fn deck_key<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    names.join("|")
}

/// Hex SHA-256 of a deck key.
pub fn deck_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards(n: usize) -> Vec<CardCandidate> {
        (0..n)
            .map(|i| CardCandidate::new(format!("card-{i}"), (i % 5) as u8 + 1, CardRole::Support))
            .collect()
    }

    #[test]
    fn test_deck_requires_eight_cards() {
        assert_eq!(Deck::new(cards(7)), Err(DeckError::WrongSize(7)));
        assert!(Deck::new(cards(8)).is_ok());
    }

    #[test]
    fn test_deck_rejects_duplicates() {
        let mut c = cards(8);
        c[7].name = "card-0".to_string();
        assert_eq!(
            Deck::new(c),
            Err(DeckError::DuplicateCard("card-0".to_string()))
        );
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = Deck::new(cards(8)).unwrap();
        let mut reversed = cards(8);
        reversed.reverse();
        let b = Deck::new(reversed).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_avg_elixir() {
        let deck = Deck::new(cards(8)).unwrap();
        // costs 1,2,3,4,5,1,2,3
        assert!((deck.avg_elixir() - 21.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_level_ratio_clamped() {
        let mut card = CardCandidate::new("x", 3, CardRole::Cycle);
        card.level = 14;
        card.max_level = 11;
        assert_eq!(card.level_ratio(), 1.0);
        card.max_level = 0;
        assert_eq!(card.level_ratio(), 0.0);
    }
}
