//! Deck Discovery - Resumable search for strong eight-card decks.
//!
//! Given a pool of candidate cards, a discovery session generates decks that
//! satisfy elixir and role constraints, scores them with an [`Evaluator`],
//! records every result in a per-tag SQLite store and checkpoints its progress
//! so it can be stopped and resumed.
//!
//! # Architecture
//!
//! - `schema`: Cards, decks, constraints, configuration and statistics
//! - `generator`: Exhaustive enumeration and sampling strategies
//! - `genetic`: Population-based search, usable standalone or as a generator
//! - `evaluate`: The evaluator seam and a heuristic reference scorer
//! - `store`: Deduplicated result store with queries, cleanup and export
//! - `discovery`: The run loop, checkpoints, session files and cancellation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use deck_discovery::{
//!     discovery::{DiscoveryRunner, SessionPaths, status_summary},
//!     evaluate::HeuristicEvaluator,
//!     schema::{CandidatePool, CardCandidate, GeneratorConfig, RunnerConfig},
//! };
//!
//! let cards: Vec<CardCandidate> =
//!     serde_json::from_str(&std::fs::read_to_string("cards.json").unwrap()).unwrap();
//! let generator = GeneratorConfig::default();
//! let pool = Arc::new(CandidatePool::new(cards, generator.constraints.clone()).unwrap());
//!
//! let paths = SessionPaths::from_config(None);
//! let mut runner = DiscoveryRunner::open(
//!     RunnerConfig::new("ABC123"),
//!     &generator,
//!     pool,
//!     HeuristicEvaluator::default(),
//!     &paths,
//! )
//! .unwrap();
//!
//! let outcome = runner.run().unwrap();
//! println!("{}", status_summary(outcome.stats()));
//! ```

pub mod discovery;
pub mod evaluate;
pub mod generator;
pub mod genetic;
pub mod schema;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use discovery::{DiscoveryRunner, SessionOutcome};
pub use evaluate::{EvaluationError, Evaluator, HeuristicEvaluator};
pub use genetic::GeneticEngine;
pub use schema::{CandidatePool, CardCandidate, Deck, GeneratorConfig, RunnerConfig, Strategy};
pub use store::ResultStore;
