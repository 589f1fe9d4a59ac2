//! Deck evaluation.
//!
//! The engine only needs an [`Evaluator`]: something that turns a deck into a
//! [`ScoreResult`] and is safe to call from several workers at once. Any
//! `Fn(&Deck) -> Result<ScoreResult, EvaluationError>` closure qualifies.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::schema::{CardRole, Deck, ScoreResult, SubScores, best_archetype};

/// Errors from a single evaluation. They skip that deck only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Missing card data for {0}")]
    MissingCardData(String),
    #[error("Card not owned: {0}")]
    NotOwned(String),
    #[error("Evaluation failed: {0}")]
    Failed(String),
}

/// Scores one deck.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, deck: &Deck) -> Result<ScoreResult, EvaluationError>;
}

impl<F> Evaluator for F
where
    F: Fn(&Deck) -> Result<ScoreResult, EvaluationError> + Send + Sync,
{
    fn evaluate(&self, deck: &Deck) -> Result<ScoreResult, EvaluationError> {
        self(deck)
    }
}

/// Memoizes another evaluator by deck key.
///
/// Failures are not cached.
pub struct CachedEvaluator<E> {
    inner: E,
    cache: Mutex<HashMap<String, ScoreResult>>,
}

impl<E: Evaluator> CachedEvaluator<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached results.
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Evaluator> Evaluator for CachedEvaluator<E> {
    fn evaluate(&self, deck: &Deck) -> Result<ScoreResult, EvaluationError> {
        let key = deck.key();
        if let Ok(cache) = self.cache.lock()
            && let Some(hit) = cache.get(&key)
        {
            return Ok(hit.clone());
        }

        // Evaluate outside the lock; a racing duplicate just scores twice.
        let result = self.inner.evaluate(deck)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }
}

/// Relative weights of the sub-scores in the overall score.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicWeights {
    pub attack: f64,
    pub defense: f64,
    pub synergy: f64,
    pub versatility: f64,
    pub economy: f64,
    pub playability: f64,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            attack: 0.2,
            defense: 0.2,
            synergy: 0.15,
            versatility: 0.15,
            economy: 0.15,
            playability: 0.15,
        }
    }
}

/// Reference scorer built from role coverage, elixir curve and card levels.
///
/// Good enough to drive a search end to end; not a model of real matchups.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicEvaluator {
    pub weights: HeuristicWeights,
    /// Average elixir the economy score centres on.
    pub ideal_elixir: f64,
    /// Reject decks containing cards at level 0.
    pub require_owned: bool,
}

impl Default for HeuristicEvaluator {
    fn default() -> Self {
        Self {
            weights: HeuristicWeights::default(),
            ideal_elixir: 3.5,
            require_owned: true,
        }
    }
}

impl HeuristicEvaluator {
    fn sub_scores(&self, deck: &Deck, synergy: f64) -> SubScores {
        let count = |role| deck.count_role(role) as f64;
        let avg = deck.avg_elixir();

        let attack = 4.0 * count(CardRole::WinCondition).min(2.0)
            + 1.0 * count(CardRole::BigSpell).min(1.0)
            + 0.5 * count(CardRole::Support).min(2.0)
            + 0.5 * count(CardRole::SmallSpell).min(1.0)
            + 0.5 * count(CardRole::Cycle).min(1.0);

        let defense = 3.0 * count(CardRole::Building).min(1.0)
            + 1.5 * count(CardRole::Support).min(3.0)
            + 1.0 * count(CardRole::SmallSpell).min(1.0)
            + 0.5 * count(CardRole::Cycle).min(2.0);

        let roles_present = CardRole::ALL
            .iter()
            .filter(|&&role| deck.count_role(role) > 0)
            .count() as f64;
        let versatility = 10.0 * roles_present / CardRole::ALL.len() as f64;

        let economy = (10.0 - 4.0 * (avg - self.ideal_elixir).abs()).max(0.0);

        let playability = 10.0
            * deck.cards().iter().map(|c| c.level_ratio()).sum::<f64>()
            / deck.cards().len() as f64;

        SubScores {
            attack: attack.min(10.0),
            defense: defense.min(10.0),
            synergy,
            versatility,
            economy,
            playability,
        }
    }
}

impl Evaluator for HeuristicEvaluator {
    fn evaluate(&self, deck: &Deck) -> Result<ScoreResult, EvaluationError> {
        for card in deck.cards() {
            if card.max_level == 0 {
                return Err(EvaluationError::MissingCardData(card.name.clone()));
            }
            if self.require_owned && card.level == 0 {
                return Err(EvaluationError::NotOwned(card.name.clone()));
            }
        }

        let (template, confidence) = best_archetype(deck);
        let s = self.sub_scores(deck, 10.0 * confidence);
        let w = &self.weights;
        let total = w.attack + w.defense + w.synergy + w.versatility + w.economy + w.playability;
        if total <= 0.0 {
            return Err(EvaluationError::Failed("sub-score weights sum to zero".into()));
        }
        let overall = (s.attack * w.attack
            + s.defense * w.defense
            + s.synergy * w.synergy
            + s.versatility * w.versatility
            + s.economy * w.economy
            + s.playability * w.playability)
            / total;

        Ok(ScoreResult {
            overall: overall.clamp(0.0, 10.0),
            sub_scores: s,
            archetype: template.name.to_string(),
            archetype_confidence: confidence,
            avg_elixir: deck.avg_elixir(),
        })
    }
}
