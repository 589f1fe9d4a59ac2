//! Deck generation strategies.
//!
//! Every strategy implements [`DeckGenerator`]. Generators hand out decks in
//! batches tagged with a slot id and are told when each slot has been scored,
//! which lets a checkpoint capture decks that were issued but not yet
//! evaluated. Those decks are issued again, first, after a restore.
//!
//! - `exhaustive`: lexicographic enumeration with a resumable cursor
//! - `sampling`: random, weighted and archetype-constrained samplers
//! - [`crate::genetic`]: population-based evolution

mod exhaustive;
mod sampling;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::genetic::{GeneticEngine, GeneticState};
use crate::schema::{
    CandidatePool, Deck, DeckError, GeneratorConfig, GeneratorConfigError, Strategy,
};

pub use exhaustive::{ExhaustiveGenerator, SCAN_LIMIT, binomial};
pub use sampling::{MAX_ATTEMPTS_PER_SAMPLE, MAX_CONSECUTIVE_DISCARDS, SampleMode, Sampler};

/// A deck handed out by a generator.
#[derive(Debug, Clone)]
pub struct Issued {
    /// Identifies the deck when reporting it back via [`DeckGenerator::complete`].
    pub slot: u64,
    pub deck: Deck,
}

/// Errors raised by generators.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("No viable deck after {attempts} attempts: {reason}")]
    NoViableDeck { attempts: u64, reason: String },
    #[error("Checkpoint holds {found} generator state, expected {expected}")]
    StateMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Invalid generator state: {0}")]
    InvalidState(String),
    #[error("Invalid generator config: {0}")]
    Config(#[from] GeneratorConfigError),
    #[error("Invalid card weights: {0}")]
    Weights(String),
    #[error("Deck construction failed: {0}")]
    Deck(#[from] DeckError),
}

/// A source of candidate decks.
pub trait DeckGenerator: Send {
    fn strategy(&self) -> Strategy;

    /// Up to `max` decks. An empty batch means the generator is exhausted,
    /// unless [`DeckGenerator::is_exhausted`] says otherwise.
    fn next_batch(&mut self, max: usize) -> Result<Vec<Issued>, GeneratorError>;

    /// Consulted after an empty batch. Generators that bound the work done per
    /// call return `false` while ground remains to cover.
    fn is_exhausted(&self) -> bool {
        true
    }

    /// Report a slot as done; `fitness` is `None` when evaluation failed or
    /// the caller does not score.
    fn complete(&mut self, slot: u64, fitness: Option<f64>);

    /// Decks this generator will produce, when known up front.
    fn total(&self) -> Option<u64>;

    /// Snapshot enough state to resume.
    fn checkpoint(&self) -> GeneratorState;

    /// Resume from a snapshot taken by the same strategy over the same pool.
    fn restore(&mut self, state: GeneratorState) -> Result<(), GeneratorError>;
}

/// An issued deck that had not been reported back when a checkpoint was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outstanding {
    pub slot: u64,
    pub cards: Vec<String>,
}

/// Serialized generator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorState {
    Exhaustive {
        /// Next combination to examine, as positions into the free cards.
        cursor: Option<Vec<usize>>,
        examined: u64,
        yielded: u64,
        outstanding: Vec<Outstanding>,
    },
    Sampling {
        seed: u64,
        drawn: u64,
        emitted: u64,
        discarded: u64,
        consecutive_discards: u32,
        outstanding: Vec<Outstanding>,
    },
    Genetic(GeneticState),
}

impl GeneratorState {
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorState::Exhaustive { .. } => "exhaustive",
            GeneratorState::Sampling { .. } => "sampling",
            GeneratorState::Genetic(_) => "genetic",
        }
    }
}

/// Tracks issued-but-unreported selections for samplers and the enumerator.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    outstanding: BTreeMap<u64, Vec<usize>>,
    pending: VecDeque<(u64, Vec<usize>)>,
}

impl Ledger {
    pub(crate) fn issue(&mut self, slot: u64, indices: Vec<usize>) {
        self.outstanding.insert(slot, indices);
    }

    pub(crate) fn complete(&mut self, slot: u64) {
        self.outstanding.remove(&slot);
    }

    /// Re-issue restored selections, at most `max`.
    pub(crate) fn reissue(
        &mut self,
        pool: &CandidatePool,
        max: usize,
    ) -> Result<Vec<Issued>, GeneratorError> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some((slot, indices)) = self.pending.pop_front() else {
                break;
            };
            let deck = pool.deck(&indices)?;
            self.outstanding.insert(slot, indices);
            batch.push(Issued { slot, deck });
        }
        Ok(batch)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn snapshot(&self, pool: &CandidatePool) -> Vec<Outstanding> {
        self.outstanding
            .iter()
            .map(|(&slot, indices)| (slot, indices))
            .chain(self.pending.iter().map(|(slot, indices)| (*slot, indices)))
            .map(|(slot, indices)| Outstanding {
                slot,
                cards: pool.names(indices),
            })
            .collect()
    }

    pub(crate) fn restore(
        &mut self,
        pool: &CandidatePool,
        outstanding: Vec<Outstanding>,
    ) -> Result<(), GeneratorError> {
        self.outstanding.clear();
        self.pending.clear();
        for entry in outstanding {
            let indices = pool.indices_of(&entry.cards).ok_or_else(|| {
                GeneratorError::InvalidState(format!(
                    "outstanding deck references unknown cards: {:?}",
                    entry.cards
                ))
            })?;
            self.pending.push_back((entry.slot, indices));
        }
        Ok(())
    }
}

/// Resolve a configured seed; `None` and `0` pick a fresh one.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    match seed {
        Some(s) if s != 0 => s,
        _ => loop {
            let s: u64 = rand::random();
            if s != 0 {
                break s;
            }
        },
    }
}

/// Independent seed for stream `index` of a run seeded with `seed`.
pub fn derive_seed(seed: u64, index: u64) -> u64 {
    splitmix64(seed ^ splitmix64(index.wrapping_add(0x9E37_79B9_7F4A_7C15)))
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Build the generator a configuration asks for.
pub fn build_generator(
    config: &GeneratorConfig,
    pool: Arc<CandidatePool>,
) -> Result<Box<dyn DeckGenerator>, GeneratorError> {
    config.validate()?;
    let generator: Box<dyn DeckGenerator> = match config.strategy {
        Strategy::Exhaustive => Box::new(ExhaustiveGenerator::new(pool)),
        Strategy::Random => Box::new(Sampler::new(pool, SampleMode::Uniform, config)?),
        Strategy::Smart => Box::new(Sampler::new(pool, SampleMode::Weighted, config)?),
        Strategy::Archetype => Box::new(Sampler::new(pool, SampleMode::Archetype, config)?),
        Strategy::Genetic => Box::new(
            GeneticEngine::new(config.genetic.clone(), pool)
                .with_composition(config.composition.clone()),
        ),
    };
    Ok(generator)
}

/// Iterator over every deck a finite generator produces.
///
/// Each deck is reported back as unscored as soon as it is yielded.
pub struct Decks<'a, G: ?Sized> {
    generator: &'a mut G,
    buffer: VecDeque<Issued>,
    done: bool,
}

/// Drain a generator as a lazy sequence of decks.
pub fn decks<G: DeckGenerator + ?Sized>(generator: &mut G) -> Decks<'_, G> {
    Decks {
        generator,
        buffer: VecDeque::new(),
        done: false,
    }
}

impl<G: DeckGenerator + ?Sized> Iterator for Decks<'_, G> {
    type Item = Deck;

    fn next(&mut self) -> Option<Deck> {
        while self.buffer.is_empty() && !self.done {
            match self.generator.next_batch(32) {
                Ok(batch) if !batch.is_empty() => self.buffer.extend(batch),
                Ok(_) if !self.generator.is_exhausted() => {}
                Ok(_) => self.done = true,
                Err(e) => {
                    log::debug!("Generator stopped: {}", e);
                    self.done = true;
                }
            }
        }
        let issued = self.buffer.pop_front()?;
        self.generator.complete(issued.slot, None);
        Some(issued.deck)
    }
}
