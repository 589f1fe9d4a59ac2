//! Genetic deck search.
//!
//! A population of decks evolves under tournament selection, crossover,
//! mutation and elitism, optionally split into islands with ring migration.
//! Every offspring is repaired to a legal deck and checked against the pool
//! constraints before it enters the population.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = GeneticEngine::new(GeneticConfig::default(), pool);
//! let result = engine.run(&HeuristicEvaluator::default())?;
//! println!("best {:.3} after {} generations", result.best_fitness, result.generations);
//! ```

mod engine;
mod operators;

pub use engine::{
    GeneticEngine, GeneticHistory, GeneticProgress, GeneticResult, GeneticState, HallOfFameEntry,
    Individual, IndividualState, StopReason,
};
pub use operators::{DeckRng, deck_distance};
