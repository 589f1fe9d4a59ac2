//! Generation constraints and the normalized candidate pool.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::card::{CardCandidate, CardRole, DECK_SIZE, Deck, DeckError};

/// Constraints every generated deck must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConstraints {
    /// Lowest allowed average elixir.
    #[serde(default = "default_min_elixir")]
    pub min_avg_elixir: f64,
    /// Highest allowed average elixir.
    #[serde(default = "default_max_elixir")]
    pub max_avg_elixir: f64,
    /// Roles that must appear at least once.
    #[serde(default = "default_required_roles")]
    pub required_roles: Vec<CardRole>,
    /// Cards forced into every deck.
    #[serde(default)]
    pub include_cards: Vec<String>,
    /// Cards never used.
    #[serde(default)]
    pub exclude_cards: Vec<String>,
}

impl Default for GeneratorConstraints {
    fn default() -> Self {
        Self {
            min_avg_elixir: default_min_elixir(),
            max_avg_elixir: default_max_elixir(),
            required_roles: default_required_roles(),
            include_cards: Vec::new(),
            exclude_cards: Vec::new(),
        }
    }
}

fn default_min_elixir() -> f64 {
    2.0
}
fn default_max_elixir() -> f64 {
    5.0
}
fn default_required_roles() -> Vec<CardRole> {
    vec![CardRole::WinCondition]
}

impl GeneratorConstraints {
    /// Whether an average elixir value lies inside the configured band.
    pub fn elixir_in_range(&self, avg: f64) -> bool {
        avg >= self.min_avg_elixir - 1e-9 && avg <= self.max_avg_elixir + 1e-9
    }
}

/// Role-slot quotas the samplers fill before topping up randomly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleComposition {
    #[serde(default = "one")]
    pub win_conditions: usize,
    #[serde(default = "one")]
    pub buildings: usize,
    #[serde(default = "one")]
    pub big_spells: usize,
    #[serde(default = "one")]
    pub small_spells: usize,
    #[serde(default = "two")]
    pub support: usize,
    #[serde(default = "two")]
    pub cycle: usize,
}

fn one() -> usize {
    1
}
fn two() -> usize {
    2
}

impl Default for RoleComposition {
    fn default() -> Self {
        Self {
            win_conditions: 1,
            buildings: 1,
            big_spells: 1,
            small_spells: 1,
            support: 2,
            cycle: 2,
        }
    }
}

impl RoleComposition {
    pub fn count(&self, role: CardRole) -> usize {
        match role {
            CardRole::WinCondition => self.win_conditions,
            CardRole::Building => self.buildings,
            CardRole::BigSpell => self.big_spells,
            CardRole::SmallSpell => self.small_spells,
            CardRole::Support => self.support,
            CardRole::Cycle => self.cycle,
        }
    }

    /// One entry per slot, in canonical role order.
    pub fn slots(&self) -> Vec<CardRole> {
        CardRole::ALL
            .iter()
            .flat_map(|&role| std::iter::repeat_n(role, self.count(role)))
            .collect()
    }
}

/// Why a card selection fails the constraints.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstraintViolation {
    #[error("Deck has {0} cards")]
    WrongSize(usize),
    #[error("Card index {0} is outside the pool")]
    UnknownCard(usize),
    #[error("Duplicate card: {0}")]
    DuplicateCard(String),
    #[error("Average elixir {avg:.3} outside [{min}, {max}]")]
    ElixirOutOfRange { avg: f64, min: f64, max: f64 },
    #[error("Missing required role: {0}")]
    MissingRole(CardRole),
    #[error("Missing forced include: {0}")]
    MissingInclude(String),
}

/// Errors normalizing a candidate pool.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("Pool has {available} usable cards, need at least {DECK_SIZE}")]
    InsufficientCards { available: usize },
    #[error("Duplicate card name in pool: {0}")]
    DuplicateCard(String),
    #[error("Forced include not in pool: {0}")]
    UnknownInclude(String),
    #[error("Card is both included and excluded: {0}")]
    ConflictingCard(String),
    #[error("Too many forced includes: {0}")]
    TooManyIncludes(usize),
    #[error("Elixir bounds invalid: min {min} > max {max}")]
    InvalidElixirBounds { min: f64, max: f64 },
    #[error("Card {name} has elixir cost {elixir}, expected 0-10")]
    InvalidElixir { name: String, elixir: u8 },
}

/// Immutable, normalized view of the cards a session may use.
///
/// Candidates are sorted by name so that index order is lexicographic; the
/// exhaustive enumerator and checkpoint cursors depend on it.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    cards: Vec<CardCandidate>,
    by_role: BTreeMap<CardRole, Vec<usize>>,
    by_name: HashMap<String, usize>,
    includes: Vec<usize>,
    constraints: GeneratorConstraints,
    fingerprint: String,
}

impl CandidatePool {
    /// Normalize `cards` under `constraints`.
    pub fn new(
        cards: Vec<CardCandidate>,
        constraints: GeneratorConstraints,
    ) -> Result<Self, PoolError> {
        if constraints.min_avg_elixir > constraints.max_avg_elixir {
            return Err(PoolError::InvalidElixirBounds {
                min: constraints.min_avg_elixir,
                max: constraints.max_avg_elixir,
            });
        }
        if constraints.include_cards.len() > DECK_SIZE {
            return Err(PoolError::TooManyIncludes(constraints.include_cards.len()));
        }

        let excluded: HashSet<&str> = constraints
            .exclude_cards
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(name) = constraints
            .include_cards
            .iter()
            .find(|n| excluded.contains(n.as_str()))
        {
            return Err(PoolError::ConflictingCard(name.clone()));
        }

        let mut cards: Vec<CardCandidate> = cards
            .into_iter()
            .filter(|c| !excluded.contains(c.name.as_str()))
            .collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));

        let mut by_name = HashMap::with_capacity(cards.len());
        let mut by_role: BTreeMap<CardRole, Vec<usize>> = BTreeMap::new();
        for (i, card) in cards.iter().enumerate() {
            if card.elixir > 10 {
                return Err(PoolError::InvalidElixir {
                    name: card.name.clone(),
                    elixir: card.elixir,
                });
            }
            if by_name.insert(card.name.clone(), i).is_some() {
                return Err(PoolError::DuplicateCard(card.name.clone()));
            }
            by_role.entry(card.role).or_default().push(i);
        }

        if cards.len() < DECK_SIZE {
            return Err(PoolError::InsufficientCards {
                available: cards.len(),
            });
        }

        let mut includes = Vec::with_capacity(constraints.include_cards.len());
        for name in &constraints.include_cards {
            let idx = by_name
                .get(name)
                .copied()
                .ok_or_else(|| PoolError::UnknownInclude(name.clone()))?;
            if !includes.contains(&idx) {
                includes.push(idx);
            }
        }
        includes.sort_unstable();

        let fingerprint = fingerprint(&cards, &constraints);

        Ok(Self {
            cards,
            by_role,
            by_name,
            includes,
            constraints,
            fingerprint,
        })
    }

    pub fn cards(&self) -> &[CardCandidate] {
        &self.cards
    }

    pub fn card(&self, idx: usize) -> &CardCandidate {
        &self.cards[idx]
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Indices of cards with `role`, ascending.
    pub fn with_role(&self, role: CardRole) -> &[usize] {
        self.by_role.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Resolve names to indices; `None` if any name is unknown.
    pub fn indices_of<S: AsRef<str>>(&self, names: &[S]) -> Option<Vec<usize>> {
        names.iter().map(|n| self.index_of(n.as_ref())).collect()
    }

    /// Forced-include indices, ascending.
    pub fn includes(&self) -> &[usize] {
        &self.includes
    }

    pub fn constraints(&self) -> &GeneratorConstraints {
        &self.constraints
    }

    /// Content hash of the cards and constraints.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Mean cost of a selection.
    pub fn avg_elixir(&self, indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        let total: u32 = indices.iter().map(|&i| self.cards[i].elixir as u32).sum();
        total as f64 / indices.len() as f64
    }

    /// Materialize a selection as a deck.
    pub fn deck(&self, indices: &[usize]) -> Result<Deck, DeckError> {
        Deck::new(indices.iter().map(|&i| self.cards[i].clone()).collect())
    }

    /// Names of a selection, in selection order.
    pub fn names(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.cards[i].name.clone()).collect()
    }

    /// Check a selection against every constraint.
    pub fn validate(&self, indices: &[usize]) -> Result<(), ConstraintViolation> {
        if indices.len() != DECK_SIZE {
            return Err(ConstraintViolation::WrongSize(indices.len()));
        }
        let mut seen = HashSet::with_capacity(DECK_SIZE);
        for &i in indices {
            if i >= self.cards.len() {
                return Err(ConstraintViolation::UnknownCard(i));
            }
            if !seen.insert(i) {
                return Err(ConstraintViolation::DuplicateCard(self.cards[i].name.clone()));
            }
        }

        let avg = self.avg_elixir(indices);
        if !self.constraints.elixir_in_range(avg) {
            return Err(ConstraintViolation::ElixirOutOfRange {
                avg,
                min: self.constraints.min_avg_elixir,
                max: self.constraints.max_avg_elixir,
            });
        }

        for role in &self.constraints.required_roles {
            if !indices.iter().any(|&i| self.cards[i].role == *role) {
                return Err(ConstraintViolation::MissingRole(*role));
            }
        }

        for &inc in &self.includes {
            if !seen.contains(&inc) {
                return Err(ConstraintViolation::MissingInclude(
                    self.cards[inc].name.clone(),
                ));
            }
        }

        Ok(())
    }

    pub fn is_valid(&self, indices: &[usize]) -> bool {
        self.validate(indices).is_ok()
    }
}

fn fingerprint(cards: &[CardCandidate], constraints: &GeneratorConstraints) -> String {
    let mut hasher = Sha256::new();
    for card in cards {
        hasher.update(card.name.as_bytes());
        hasher.update([0, card.elixir]);
        hasher.update(card.role.as_str().as_bytes());
        hasher.update(card.level.to_le_bytes());
        hasher.update(card.max_level.to_le_bytes());
        hasher.update(card.weight.to_le_bytes());
    }
    hasher.update(constraints.min_avg_elixir.to_le_bytes());
    hasher.update(constraints.max_avg_elixir.to_le_bytes());
    for role in &constraints.required_roles {
        hasher.update(role.as_str().as_bytes());
    }
    for name in &constraints.include_cards {
        hasher.update(b"+");
        hasher.update(name.as_bytes());
    }
    for name in &constraints.exclude_cards {
        hasher.update(b"-");
        hasher.update(name.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_cards;

    #[test]
    fn test_pool_sorted_and_indexed() {
        let pool = CandidatePool::new(sample_cards(), GeneratorConstraints::default()).unwrap();
        assert_eq!(pool.len(), 20);
        let names: Vec<_> = pool.cards().iter().map(|c| c.name.clone()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(pool.with_role(CardRole::WinCondition).len(), 4);
    }

    #[test]
    fn test_pool_excludes_and_includes() {
        let constraints = GeneratorConstraints {
            include_cards: vec!["Hog Rider".to_string()],
            exclude_cards: vec!["Golem".to_string()],
            ..Default::default()
        };
        let pool = CandidatePool::new(sample_cards(), constraints).unwrap();
        assert_eq!(pool.len(), 19);
        assert!(pool.index_of("Golem").is_none());
        assert_eq!(pool.includes(), &[pool.index_of("Hog Rider").unwrap()]);
    }

    #[test]
    fn test_pool_errors() {
        let unknown = GeneratorConstraints {
            include_cards: vec!["Nope".to_string()],
            ..Default::default()
        };
        assert_eq!(
            CandidatePool::new(sample_cards(), unknown).unwrap_err(),
            PoolError::UnknownInclude("Nope".to_string())
        );

        let small: Vec<_> = sample_cards().into_iter().take(5).collect();
        assert!(matches!(
            CandidatePool::new(small, GeneratorConstraints::default()),
            Err(PoolError::InsufficientCards { available: 5 })
        ));

        let mut dup = sample_cards();
        dup.push(dup[0].clone());
        assert!(matches!(
            CandidatePool::new(dup, GeneratorConstraints::default()),
            Err(PoolError::DuplicateCard(_))
        ));
    }

    #[test]
    fn test_validate_detects_violations() {
        let pool = CandidatePool::new(sample_cards(), GeneratorConstraints::default()).unwrap();
        let spells: Vec<usize> = pool
            .cards()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.role != CardRole::WinCondition)
            .map(|(i, _)| i)
            .take(8)
            .collect();
        assert_eq!(
            pool.validate(&spells),
            Err(ConstraintViolation::MissingRole(CardRole::WinCondition))
        );
        assert!(matches!(
            pool.validate(&spells[..7]),
            Err(ConstraintViolation::WrongSize(7))
        ));
        let mut dup = spells.clone();
        dup[1] = dup[0];
        assert!(matches!(
            pool.validate(&dup),
            Err(ConstraintViolation::DuplicateCard(_))
        ));
    }

    #[test]
    fn test_fingerprint_changes_with_constraints() {
        let a = CandidatePool::new(sample_cards(), GeneratorConstraints::default()).unwrap();
        let b = CandidatePool::new(
            sample_cards(),
            GeneratorConstraints {
                max_avg_elixir: 4.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        let c = CandidatePool::new(sample_cards(), GeneratorConstraints::default()).unwrap();
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_composition_slots() {
        let slots = RoleComposition::default().slots();
        assert_eq!(slots.len(), 8);
        assert_eq!(slots[0], CardRole::WinCondition);
        assert_eq!(slots.iter().filter(|r| **r == CardRole::Cycle).count(), 2);
    }
}
