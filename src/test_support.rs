//! Fixtures shared by unit tests.

use std::sync::Arc;

use crate::evaluate::EvaluationError;
use crate::schema::{CandidatePool, CardCandidate, CardRole, Deck, GeneratorConstraints, ScoreResult};

/// Twenty cards, four win conditions, every role covered.
pub fn sample_cards() -> Vec<CardCandidate> {
    use CardRole::*;
    [
        ("Hog Rider", 4, WinCondition),
        ("Golem", 8, WinCondition),
        ("Royal Giant", 6, WinCondition),
        ("Miner", 3, WinCondition),
        ("Cannon", 3, Building),
        ("Tesla", 4, Building),
        ("Inferno Tower", 5, Building),
        ("Fireball", 4, BigSpell),
        ("Poison", 4, BigSpell),
        ("Rocket", 6, BigSpell),
        ("Zap", 2, SmallSpell),
        ("The Log", 2, SmallSpell),
        ("Arrows", 3, SmallSpell),
        ("Musketeer", 4, Support),
        ("Valkyrie", 4, Support),
        ("Baby Dragon", 4, Support),
        ("Wizard", 5, Support),
        ("Skeletons", 1, Cycle),
        ("Ice Spirit", 1, Cycle),
        ("Bats", 2, Cycle),
    ]
    .into_iter()
    .map(|(name, elixir, role)| CardCandidate::new(name, elixir, role))
    .collect()
}

pub fn sample_pool(constraints: GeneratorConstraints) -> Arc<CandidatePool> {
    Arc::new(CandidatePool::new(sample_cards(), constraints).unwrap())
}

/// Deterministic, order-independent score in [1, 10).
pub fn score_by_cost(deck: &Deck) -> Result<ScoreResult, EvaluationError> {
    let spread: f64 = deck
        .cards()
        .iter()
        .map(|c| c.elixir as f64 * (c.name.len() % 5 + 1) as f64)
        .sum();
    Ok(ScoreResult {
        overall: 1.0 + (spread % 90.0) / 10.0,
        archetype: "test".to_string(),
        avg_elixir: deck.avg_elixir(),
        ..Default::default()
    })
}

/// Every deck scores the same.
pub fn flat_score(_deck: &Deck) -> Result<ScoreResult, EvaluationError> {
    Ok(ScoreResult::with_overall(1.0))
}
