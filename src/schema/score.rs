//! Evaluator output.

use serde::{Deserialize, Serialize};

/// Named sub-scores on the 0-10 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub attack: f64,
    pub defense: f64,
    pub synergy: f64,
    pub versatility: f64,
    pub economy: f64,
    pub playability: f64,
}

/// Result of scoring one deck.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Overall score (0-10); used as fitness.
    pub overall: f64,
    pub sub_scores: SubScores,
    /// Detected archetype label.
    pub archetype: String,
    /// Confidence in the archetype label (0-1).
    pub archetype_confidence: f64,
    pub avg_elixir: f64,
}

impl ScoreResult {
    /// Score with only the overall value set.
    pub fn with_overall(overall: f64) -> Self {
        Self {
            overall,
            ..Default::default()
        }
    }
}
