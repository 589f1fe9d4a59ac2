//! Discovery session configuration and running statistics.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::archetype::find_archetype;
use super::card::deck_key;
use super::constraints::{GeneratorConstraints, RoleComposition};
use super::genetic::{GeneticConfig, GeneticConfigError};

/// Deck generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every valid combination, in lexicographic order.
    Exhaustive,
    /// Uniform role-slot sampling.
    Random,
    /// Sampling biased by per-card weights and levels.
    #[default]
    Smart,
    /// Sampling restricted to archetype templates.
    Archetype,
    /// Population-based evolution.
    Genetic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Exhaustive => "exhaustive",
            Strategy::Random => "random",
            Strategy::Smart => "smart",
            Strategy::Archetype => "archetype",
            Strategy::Genetic => "genetic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exhaustive" => Ok(Strategy::Exhaustive),
            "random" | "random-sample" => Ok(Strategy::Random),
            "smart" | "smart-sample" | "weighted" => Ok(Strategy::Smart),
            "archetype" | "archetype-focused" => Ok(Strategy::Archetype),
            "genetic" => Ok(Strategy::Genetic),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub constraints: GeneratorConstraints,
    #[serde(default)]
    pub composition: RoleComposition,
    /// Samples drawn by non-exhaustive, non-genetic strategies.
    #[serde(default = "default_sample_size")]
    pub sample_size: u64,
    /// Random seed for sampling strategies; `None` or `Some(0)` picks a fresh one.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Pin the archetype strategy to one template.
    #[serde(default)]
    pub archetype: Option<String>,
    #[serde(default)]
    pub genetic: GeneticConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            constraints: GeneratorConstraints::default(),
            composition: RoleComposition::default(),
            sample_size: default_sample_size(),
            seed: None,
            archetype: None,
            genetic: GeneticConfig::default(),
        }
    }
}

fn default_sample_size() -> u64 {
    1000
}

/// Generator configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorConfigError {
    #[error("Sample size must be positive")]
    EmptySample,
    #[error("Unknown archetype: {0}")]
    UnknownArchetype(String),
    #[error("Role composition fills {0} slots, more than a deck holds")]
    OversizedComposition(usize),
    #[error("Genetic config invalid: {0}")]
    Genetic(#[from] GeneticConfigError),
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), GeneratorConfigError> {
        let slots = self.composition.slots().len();
        if slots > super::DECK_SIZE {
            return Err(GeneratorConfigError::OversizedComposition(slots));
        }
        match self.strategy {
            Strategy::Genetic => self.genetic.validate()?,
            Strategy::Exhaustive => {}
            _ if self.sample_size == 0 => return Err(GeneratorConfigError::EmptySample),
            _ => {}
        }
        if let Some(name) = &self.archetype
            && find_archetype(name).is_none()
        {
            return Err(GeneratorConfigError::UnknownArchetype(name.clone()));
        }
        Ok(())
    }
}

/// When the runner persists checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// Evaluations between checkpoints; 0 disables the count trigger.
    #[serde(default = "default_every_evaluations")]
    pub every_evaluations: u64,
    /// Seconds between checkpoints; 0 disables the time trigger.
    #[serde(default = "default_every_seconds")]
    pub every_seconds: u64,
    /// Extra attempts for the final write on cancellation.
    #[serde(default = "default_cancel_retries")]
    pub cancel_write_retries: u32,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            every_evaluations: default_every_evaluations(),
            every_seconds: default_every_seconds(),
            cancel_write_retries: default_cancel_retries(),
        }
    }
}

fn default_every_evaluations() -> u64 {
    100
}
fn default_every_seconds() -> u64 {
    30
}
fn default_cancel_retries() -> u32 {
    1
}

/// Runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Session tag; names the checkpoint and store files.
    pub tag: String,
    /// Evaluation worker threads; 1 evaluates on the control thread.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Decks pulled from the generator per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub checkpoint: CheckpointPolicy,
    /// Stop after this many evaluations.
    #[serde(default)]
    pub max_evaluations: Option<u64>,
    /// Stop once the best score reaches this value.
    #[serde(default)]
    pub target_score: Option<f64>,
    /// Size of the rolling top-score list.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Recorded on every stored entry.
    #[serde(default = "default_evaluation_version")]
    pub evaluation_version: String,
}

impl RunnerConfig {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            checkpoint: CheckpointPolicy::default(),
            max_evaluations: None,
            target_score: None,
            top_n: default_top_n(),
            evaluation_version: default_evaluation_version(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_batch_size() -> usize {
    64
}
fn default_top_n() -> usize {
    5
}
fn default_evaluation_version() -> String {
    "v1".to_string()
}

/// Everything the binary needs to start a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub runner: RunnerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// JSON array of card candidates.
    pub cards_file: PathBuf,
    /// Root for checkpoint, PID and store files; defaults to `~/.deck-discovery`.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

/// One entry in the rolling top-score list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEntry {
    pub score: f64,
    pub cards: Vec<String>,
    pub key: String,
}

/// Running statistics for a discovery session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub strategy: Strategy,
    pub tag: String,
    /// Decks scored successfully.
    pub evaluated: u64,
    /// Decks that created a new store entry.
    pub stored: u64,
    /// Evaluations that returned an error.
    pub failed: u64,
    /// Total decks the generator will produce, if known.
    pub total: Option<u64>,
    pub best_score: f64,
    pub best_deck: Option<Vec<String>>,
    pub avg_score: f64,
    /// Decks per second over the current session.
    pub rate: f64,
    /// Wall time across all sessions.
    pub elapsed: Duration,
    pub eta: Option<Duration>,
    pub top_scores: Vec<TopEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscoveryStats {
    pub fn new(strategy: Strategy, tag: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            strategy,
            tag: tag.into(),
            evaluated: 0,
            stored: 0,
            failed: 0,
            total: None,
            best_score: 0.0,
            best_deck: None,
            avg_score: 0.0,
            rate: 0.0,
            elapsed: Duration::ZERO,
            eta: None,
            top_scores: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Fold one successful evaluation in. Returns true on a new best.
    pub fn record(&mut self, score: f64, cards: &[String], top_n: usize) -> bool {
        self.evaluated += 1;
        self.avg_score += (score - self.avg_score) / self.evaluated as f64;

        let improved = self.best_deck.is_none() || score > self.best_score;
        if improved {
            self.best_score = score;
            self.best_deck = Some(cards.to_vec());
        }

        self.push_top(score, cards, top_n);
        improved
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    fn push_top(&mut self, score: f64, cards: &[String], top_n: usize) {
        if top_n == 0 {
            return;
        }
        let key = deck_key(cards.iter().map(String::as_str));
        if let Some(existing) = self.top_scores.iter_mut().find(|e| e.key == key) {
            if score > existing.score {
                existing.score = score;
            }
        } else {
            self.top_scores.push(TopEntry {
                score,
                cards: cards.to_vec(),
                key,
            });
        }
        self.top_scores.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.key.cmp(&b.key))
        });
        self.top_scores.truncate(top_n);
    }

    /// Refresh timing fields.
    ///
    /// `elapsed` is the total across sessions; the rate only counts work done
    /// since this session started so a resume does not inflate it.
    pub fn update_timing(&mut self, elapsed: Duration, session_evaluated: u64, session: Duration) {
        self.elapsed = elapsed;
        self.updated_at = Utc::now();
        let secs = session.as_secs_f64();
        self.rate = if secs > 0.0 {
            session_evaluated as f64 / secs
        } else {
            0.0
        };
        self.eta = match self.total {
            Some(total) if self.rate > 0.0 => {
                let remaining = total.saturating_sub(self.evaluated + self.failed);
                Some(Duration::from_secs_f64(remaining as f64 / self.rate))
            }
            _ => None,
        };
    }

    /// Fraction complete, when the total is known.
    pub fn progress(&self) -> Option<f64> {
        self.total
            .filter(|&t| t > 0)
            .map(|t| ((self.evaluated + self.failed) as f64 / t as f64).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(prefix: &str) -> Vec<String> {
        (0..8).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_record_tracks_mean_and_best() {
        let mut stats = DiscoveryStats::new(Strategy::Random, "T");
        assert!(stats.record(4.0, &names("a"), 3));
        assert!(stats.record(6.0, &names("b"), 3));
        assert!(!stats.record(6.0, &names("c"), 3));
        assert!(!stats.record(2.0, &names("d"), 3));
        assert_eq!(stats.evaluated, 4);
        assert!((stats.avg_score - 4.5).abs() < 1e-12);
        assert_eq!(stats.best_score, 6.0);
        assert_eq!(stats.best_deck, Some(names("b")));
    }

    #[test]
    fn test_top_scores_bounded_and_sorted() {
        let mut stats = DiscoveryStats::new(Strategy::Random, "T");
        for (i, score) in [3.0, 9.0, 1.0, 7.0, 9.0].iter().enumerate() {
            stats.record(*score, &names(&format!("d{i}-")), 3);
        }
        let scores: Vec<f64> = stats.top_scores.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![9.0, 9.0, 7.0]);
        assert!(stats.top_scores[0].key < stats.top_scores[1].key);
    }

    #[test]
    fn test_top_scores_dedupe_by_card_set() {
        let mut stats = DiscoveryStats::new(Strategy::Genetic, "T");
        let mut reversed = names("x");
        stats.record(5.0, &reversed, 5);
        reversed.reverse();
        stats.record(6.0, &reversed, 5);
        assert_eq!(stats.top_scores.len(), 1);
        assert_eq!(stats.top_scores[0].score, 6.0);
    }

    #[test]
    fn test_timing_uses_session_rate() {
        let mut stats = DiscoveryStats::new(Strategy::Exhaustive, "T");
        stats.total = Some(1000);
        for _ in 0..500 {
            stats.record(1.0, &names("a"), 0);
        }
        stats.update_timing(Duration::from_secs(100), 100, Duration::from_secs(10));
        assert_eq!(stats.rate, 10.0);
        assert_eq!(stats.eta, Some(Duration::from_secs(50)));
        assert_eq!(stats.progress(), Some(0.5));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("smart-sample".parse::<Strategy>(), Ok(Strategy::Smart));
        assert_eq!("Genetic".parse::<Strategy>(), Ok(Strategy::Genetic));
        assert!("bogus".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_generator_config_validation() {
        let config = GeneratorConfig {
            archetype: Some("zoo".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(GeneratorConfigError::UnknownArchetype("zoo".to_string()))
        );
        let config = GeneratorConfig {
            strategy: Strategy::Random,
            sample_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(GeneratorConfigError::EmptySample));
    }
}
