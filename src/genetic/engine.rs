//! Genetic search over decks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::evaluate::Evaluator;
use crate::generator::{DeckGenerator, GeneratorError, GeneratorState, Issued, derive_seed, resolve_seed};
use crate::schema::{CandidatePool, GeneticConfig, RoleComposition, Strategy, deck_key, matches_any};

use super::operators::{DeckRng, deck_distance};

/// Attempts at a viable offspring before falling back to the fitter parent.
const OFFSPRING_ATTEMPTS: usize = 10;

/// Attempts at a viable random individual.
const INIT_ATTEMPTS: u64 = 100;

/// A deck in the population.
#[derive(Debug, Clone)]
pub struct Individual {
    /// Unique identifier; doubles as the generator slot.
    pub id: u64,
    /// Pool indices.
    pub cards: Vec<usize>,
    /// `None` until evaluated.
    pub fitness: Option<f64>,
    /// Generation created.
    pub generation: usize,
    /// Parent IDs.
    pub parents: Vec<u64>,
}

impl Individual {
    fn score(&self) -> f64 {
        self.fitness.unwrap_or(0.0)
    }
}

/// Serialized individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualState {
    pub id: u64,
    pub cards: Vec<String>,
    pub fitness: Option<f64>,
    pub generation: usize,
    #[serde(default)]
    pub parents: Vec<u64>,
}

/// Per-generation fitness trajectory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneticHistory {
    /// Best fitness per generation.
    pub best_fitness: Vec<f64>,
    /// Average fitness per generation.
    pub avg_fitness: Vec<f64>,
    /// Mean pairwise card distance per generation.
    pub diversity: Vec<f64>,
}

/// Best decks seen across the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallOfFameEntry {
    pub cards: Vec<String>,
    pub fitness: f64,
    pub generation: usize,
}

/// Reason evolution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Reached target fitness.
    TargetReached,
    /// No improvement for the configured number of generations.
    Converged,
    /// User cancelled.
    Cancelled,
}

/// Everything needed to resume a genetic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticState {
    pub seed: u64,
    pub generation: usize,
    pub stagnation: usize,
    pub best_fitness: Option<f64>,
    pub next_id: u64,
    pub islands: Vec<Vec<IndividualState>>,
    pub history: GeneticHistory,
    pub hall_of_fame: Vec<HallOfFameEntry>,
    pub stop: Option<StopReason>,
    /// Fitness of every deck scored so far, by deck key.
    #[serde(default)]
    pub cache: BTreeMap<String, f64>,
    #[serde(default)]
    pub evaluations: u64,
}

/// Progress snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneticProgress {
    pub generation: usize,
    pub total_generations: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub generation_best: f64,
    pub stagnation: usize,
    pub evaluations: u64,
    pub islands: usize,
}

/// Final result of a standalone run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneticResult {
    pub hall_of_fame: Vec<HallOfFameEntry>,
    pub history: GeneticHistory,
    pub generations: usize,
    pub total_evaluations: u64,
    pub best_fitness: f64,
    pub elapsed_seconds: f64,
    pub evaluations_per_second: f64,
    pub stop_reason: StopReason,
    pub seed: u64,
}

/// Evolution engine that runs the search.
///
/// Driven either standalone through [`GeneticEngine::run_with_callback`] or
/// by the discovery runner through [`DeckGenerator`], where each batch is the
/// unevaluated part of the current generation.
pub struct GeneticEngine {
    config: GeneticConfig,
    pool: Arc<CandidatePool>,
    composition: RoleComposition,
    seed: u64,
    islands: Vec<Vec<Individual>>,
    generation: usize,
    best_fitness: Option<f64>,
    stagnation: usize,
    history: GeneticHistory,
    hall_of_fame: Vec<HallOfFameEntry>,
    cache: HashMap<String, f64>,
    issued: HashSet<u64>,
    next_id: u64,
    evaluations: u64,
    stop: Option<StopReason>,
    cancelled: Arc<AtomicBool>,
}

impl GeneticEngine {
    /// Create a new engine. The seed is resolved immediately so it can be
    /// reported and checkpointed.
    pub fn new(config: GeneticConfig, pool: Arc<CandidatePool>) -> Self {
        let seed = resolve_seed(config.seed);
        Self {
            config,
            pool,
            composition: RoleComposition::default(),
            seed,
            islands: Vec::new(),
            generation: 0,
            best_fitness: None,
            stagnation: 0,
            history: GeneticHistory::default(),
            hall_of_fame: Vec::new(),
            cache: HashMap::new(),
            issued: HashSet::new(),
            next_id: 0,
            evaluations: 0,
            stop: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Role quotas used for random individuals.
    pub fn with_composition(mut self, composition: RoleComposition) -> Self {
        self.composition = composition;
        self
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn history(&self) -> &GeneticHistory {
        &self.history
    }

    pub fn hall_of_fame(&self) -> &[HallOfFameEntry] {
        &self.hall_of_fame
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// All individuals, island by island.
    pub fn population(&self) -> impl Iterator<Item = &Individual> {
        self.islands.iter().flatten()
    }

    fn island_size(&self) -> usize {
        (self.config.population_size / self.config.islands()).max(1)
    }

    fn hall_size(&self) -> usize {
        self.config.elite_count.max(1)
    }

    fn is_viable(&self, cards: &[usize]) -> bool {
        if !self.pool.is_valid(cards) {
            return false;
        }
        !self.config.use_archetypes
            || matches_any(self.pool.avg_elixir(cards), |role| {
                cards
                    .iter()
                    .filter(|&&i| self.pool.card(i).role == role)
                    .count()
            })
    }

    fn new_individual(&mut self, cards: Vec<usize>, parents: Vec<u64>) -> Individual {
        let id = self.next_id;
        self.next_id += 1;
        let fitness = self.cache.get(&self.key(&cards)).copied();
        Individual {
            id,
            cards,
            fitness,
            generation: self.generation,
            parents,
        }
    }

    fn key(&self, cards: &[usize]) -> String {
        deck_key(cards.iter().map(|&i| self.pool.card(i).name.as_str()))
    }

    /// Initialize the population: seeds first, then random viable decks.
    pub fn initialize(&mut self) -> Result<(), GeneratorError> {
        self.islands.clear();
        self.generation = 0;

        let total = self.island_size() * self.config.islands();
        let mut rng = DeckRng::new(derive_seed(self.seed, 0));
        let mut members: Vec<Vec<usize>> = Vec::with_capacity(total);

        for names in &self.config.seed_population {
            if members.len() >= total {
                break;
            }
            match self.pool.indices_of(names) {
                Some(cards) if self.is_viable(&cards) => members.push(cards),
                _ => log::warn!("Skipping invalid seed deck: {:?}", names),
            }
        }

        while members.len() < total {
            let mut found = None;
            for _ in 0..INIT_ATTEMPTS {
                let cards = rng.random_deck(&self.pool, &self.composition, None);
                if self.is_viable(&cards) {
                    found = Some(cards);
                    break;
                }
            }
            match found {
                Some(cards) => members.push(cards),
                None => {
                    return Err(GeneratorError::NoViableDeck {
                        attempts: INIT_ATTEMPTS,
                        reason: "no random individual satisfies the constraints".into(),
                    });
                }
            }
        }

        let size = self.island_size();
        let mut islands = Vec::with_capacity(self.config.islands());
        let mut members = members.into_iter();
        for _ in 0..self.config.islands() {
            let island: Vec<Individual> = members
                .by_ref()
                .take(size)
                .collect::<Vec<_>>()
                .into_iter()
                .map(|cards| self.new_individual(cards, Vec::new()))
                .collect();
            islands.push(island);
        }
        self.islands = islands;

        log::debug!(
            "Initialized {} islands of {} (seed {})",
            self.islands.len(),
            size,
            self.seed
        );
        Ok(())
    }

    /// Record the finished generation and decide whether to continue.
    fn end_generation(&mut self) {
        let (gen_best, avg) = {
            let scores: Vec<f64> = self.population().map(Individual::score).collect();
            let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
            (best, avg)
        };

        match self.best_fitness {
            Some(best) if gen_best <= best => self.stagnation += 1,
            _ => {
                self.best_fitness = Some(gen_best);
                self.stagnation = 0;
            }
        }

        self.history.best_fitness.push(gen_best);
        self.history.avg_fitness.push(avg);
        self.history.diversity.push(self.compute_diversity());
        self.update_hall_of_fame();

        log::debug!(
            "Generation {}: best {:.3}, avg {:.3}, stagnation {}",
            self.generation,
            gen_best,
            avg,
            self.stagnation
        );

        self.stop = self.should_stop();
    }

    fn compute_diversity(&self) -> f64 {
        let all: Vec<&Individual> = self.population().collect();
        if all.len() < 2 {
            return 0.0;
        }
        let mut total = 0usize;
        let mut count = 0usize;
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                total += deck_distance(&all[i].cards, &all[j].cards);
                count += 1;
            }
        }
        total as f64 / count as f64
    }

    fn update_hall_of_fame(&mut self) {
        let mut entries: Vec<(f64, String, Vec<usize>, usize)> = self
            .population()
            .map(|ind| (ind.score(), self.key(&ind.cards), ind.cards.clone(), ind.generation))
            .collect();
        entries.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (fitness, key, cards, generation) in entries.into_iter().take(self.hall_size()) {
            let exists = self
                .hall_of_fame
                .iter()
                .any(|e| deck_key(e.cards.iter().map(String::as_str)) == key);
            if !exists {
                self.hall_of_fame.push(HallOfFameEntry {
                    cards: self.pool.names(&cards),
                    fitness,
                    generation,
                });
            }
        }
        self.hall_of_fame
            .sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        self.hall_of_fame.truncate(self.hall_size());
    }

    /// Check if evolution should stop.
    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if self.generation >= self.config.generations {
            return Some(StopReason::MaxGenerations);
        }

        if self.config.target_fitness > 0.0
            && self
                .best_fitness
                .is_some_and(|b| b >= self.config.target_fitness)
        {
            return Some(StopReason::TargetReached);
        }

        if self.config.convergence_generations > 0
            && self.stagnation >= self.config.convergence_generations
        {
            return Some(StopReason::Converged);
        }

        None
    }

    /// Ring migration: the best of each island replace the worst of the next.
    fn migrate(&mut self) {
        let n = self.islands.len();
        let m = self.config.migration_size;
        let emigrants: Vec<Vec<Individual>> = self
            .islands
            .iter()
            .map(|island| {
                let mut sorted = island.clone();
                sort_by_fitness(&mut sorted);
                sorted.truncate(m);
                sorted
            })
            .collect();

        for (i, migrants) in emigrants.into_iter().enumerate() {
            let target = &mut self.islands[(i + 1) % n];
            sort_by_fitness(target);
            let keep = target.len().saturating_sub(migrants.len());
            target.truncate(keep);
            target.extend(migrants);
        }
        log::debug!("Generation {}: migrated {} per island", self.generation, m);
    }

    /// Produce the next generation from a fully evaluated one.
    fn step(&mut self) {
        if self.config.island_model
            && self.generation > 0
            && self.generation % self.config.migration_interval == 0
        {
            self.migrate();
        }

        self.generation += 1;
        let mut rng = DeckRng::new(derive_seed(self.seed, self.generation as u64));
        let islands = std::mem::take(&mut self.islands);
        let mut next_islands = Vec::with_capacity(islands.len());

        for mut island in islands {
            sort_by_fitness(&mut island);
            let size = island.len();
            let mut next_gen: Vec<Individual> = Vec::with_capacity(size);

            // Elitism: keep best individuals
            for elite in island.iter().take(self.config.elite_count.min(size)) {
                next_gen.push(elite.clone());
            }

            while next_gen.len() < size {
                let idx1 = self.select_index(&mut rng, &island);
                let idx2 = self.select_index(&mut rng, &island);
                let (p1, p2) = (&island[idx1], &island[idx2]);
                let cards = self.offspring(&mut rng, p1, p2);
                let child = self.new_individual(cards, vec![p1.id, p2.id]);
                next_gen.push(child);
            }

            next_islands.push(next_gen);
        }

        self.islands = next_islands;
    }

    fn offspring(&self, rng: &mut DeckRng, p1: &Individual, p2: &Individual) -> Vec<usize> {
        for _ in 0..OFFSPRING_ATTEMPTS {
            let mut child = if rng.chance(self.config.crossover_rate) {
                rng.crossover(&self.pool, &p1.cards, &p2.cards)
            } else {
                p1.cards.clone()
            };
            if rng.chance(self.config.mutation_rate) {
                rng.mutate(&self.pool, &mut child, self.config.mutation_slots());
            }
            if self.is_viable(&child) {
                return child;
            }
        }
        if p2.score() > p1.score() {
            p2.cards.clone()
        } else {
            p1.cards.clone()
        }
    }

    /// Tournament selection.
    fn select_index(&self, rng: &mut DeckRng, island: &[Individual]) -> usize {
        let mut best_idx = rng.index(island.len());
        for _ in 1..self.config.tournament_size {
            let idx = rng.index(island.len());
            if island[idx].score() > island[best_idx].score() {
                best_idx = idx;
            }
        }
        best_idx
    }

    /// Get current progress.
    pub fn progress(&self) -> GeneticProgress {
        let scores: Vec<f64> = self.population().map(Individual::score).collect();
        let avg_fitness = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        GeneticProgress {
            generation: self.generation,
            total_generations: self.config.generations,
            best_fitness: self.best_fitness.unwrap_or(0.0),
            avg_fitness,
            generation_best: scores.iter().copied().fold(0.0, f64::max),
            stagnation: self.stagnation,
            evaluations: self.evaluations,
            islands: self.islands.len(),
        }
    }

    /// Run evolution with progress callback, evaluating internally.
    pub fn run_with_callback<E, F>(
        &mut self,
        evaluator: &E,
        callback: F,
    ) -> Result<GeneticResult, GeneratorError>
    where
        E: Evaluator + ?Sized,
        F: Fn(&GeneticProgress),
    {
        let start_time = Instant::now();

        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                self.stop = Some(StopReason::Cancelled);
                break;
            }

            let batch = self.next_batch(usize::MAX)?;
            if batch.is_empty() {
                break;
            }

            let fitness: Vec<Option<f64>> = if self.config.parallel_evaluations {
                batch
                    .par_iter()
                    .map(|issued| evaluate_one(evaluator, issued))
                    .collect()
            } else {
                batch.iter().map(|issued| evaluate_one(evaluator, issued)).collect()
            };

            for (issued, f) in batch.iter().zip(fitness) {
                self.complete(issued.slot, f);
            }

            callback(&self.progress());
        }

        let elapsed = start_time.elapsed().as_secs_f64();
        Ok(GeneticResult {
            hall_of_fame: self.hall_of_fame.clone(),
            history: self.history.clone(),
            generations: self.generation,
            total_evaluations: self.evaluations,
            best_fitness: self.best_fitness.unwrap_or(0.0),
            elapsed_seconds: elapsed,
            evaluations_per_second: if elapsed > 0.0 {
                self.evaluations as f64 / elapsed
            } else {
                0.0
            },
            stop_reason: self.stop.unwrap_or(StopReason::MaxGenerations),
            seed: self.seed,
        })
    }

    /// Run evolution (blocking).
    pub fn run<E: Evaluator + ?Sized>(&mut self, evaluator: &E) -> Result<GeneticResult, GeneratorError> {
        self.run_with_callback(evaluator, |_| {})
    }
}

fn evaluate_one<E: Evaluator + ?Sized>(evaluator: &E, issued: &Issued) -> Option<f64> {
    match evaluator.evaluate(&issued.deck) {
        Ok(score) => Some(score.overall),
        Err(e) => {
            log::debug!("Evaluation failed for {}: {}", issued.deck, e);
            None
        }
    }
}

/// Sort by fitness (descending), ties by id.
fn sort_by_fitness(island: &mut [Individual]) {
    island.sort_by(|a, b| b.score().total_cmp(&a.score()).then_with(|| a.id.cmp(&b.id)));
}

impl DeckGenerator for GeneticEngine {
    fn strategy(&self) -> Strategy {
        Strategy::Genetic
    }

    fn next_batch(&mut self, max: usize) -> Result<Vec<Issued>, GeneratorError> {
        if self.islands.is_empty() && self.stop.is_none() {
            self.initialize()?;
        }

        loop {
            if self.stop.is_some() {
                return Ok(Vec::new());
            }

            let pending: Vec<(u64, Vec<usize>)> = self
                .population()
                .filter(|ind| ind.fitness.is_none() && !self.issued.contains(&ind.id))
                .take(max)
                .map(|ind| (ind.id, ind.cards.clone()))
                .collect();

            if !pending.is_empty() {
                let mut batch = Vec::with_capacity(pending.len());
                for (id, cards) in pending {
                    let deck = self.pool.deck(&cards)?;
                    self.issued.insert(id);
                    batch.push(Issued { slot: id, deck });
                }
                return Ok(batch);
            }

            if self.population().any(|ind| ind.fitness.is_none()) {
                // issued but never reported; hand them out again
                self.issued.clear();
                continue;
            }

            self.end_generation();
            if self.stop.is_none() {
                self.step();
            }
        }
    }

    fn complete(&mut self, slot: u64, fitness: Option<f64>) {
        self.issued.remove(&slot);
        let Some(ind) = self
            .islands
            .iter_mut()
            .flatten()
            .find(|ind| ind.id == slot && ind.fitness.is_none())
        else {
            return;
        };
        ind.fitness = Some(fitness.unwrap_or(0.0));
        let cards = ind.cards.clone();
        self.evaluations += 1;
        if let Some(f) = fitness {
            let key = self.key(&cards);
            self.cache.insert(key, f);
        }
    }

    fn total(&self) -> Option<u64> {
        None
    }

    fn checkpoint(&self) -> GeneratorState {
        let islands = self
            .islands
            .iter()
            .map(|island| {
                island
                    .iter()
                    .map(|ind| IndividualState {
                        id: ind.id,
                        cards: self.pool.names(&ind.cards),
                        fitness: ind.fitness,
                        generation: ind.generation,
                        parents: ind.parents.clone(),
                    })
                    .collect()
            })
            .collect();

        GeneratorState::Genetic(GeneticState {
            seed: self.seed,
            generation: self.generation,
            stagnation: self.stagnation,
            best_fitness: self.best_fitness,
            next_id: self.next_id,
            islands,
            history: self.history.clone(),
            hall_of_fame: self.hall_of_fame.clone(),
            stop: self.stop,
            cache: self
                .cache
                .iter()
                .map(|(key, &f)| (key.clone(), f))
                .collect(),
            evaluations: self.evaluations,
        })
    }

    fn restore(&mut self, state: GeneratorState) -> Result<(), GeneratorError> {
        let GeneratorState::Genetic(state) = state else {
            return Err(GeneratorError::StateMismatch {
                expected: "genetic",
                found: state.kind(),
            });
        };
        if state.seed == 0 {
            return Err(GeneratorError::InvalidState("genetic seed is zero".into()));
        }

        let mut islands = Vec::with_capacity(state.islands.len());
        for island in state.islands {
            let mut members = Vec::with_capacity(island.len());
            for ind in island {
                let cards = self.pool.indices_of(&ind.cards).ok_or_else(|| {
                    GeneratorError::InvalidState(format!(
                        "individual {} references unknown cards",
                        ind.id
                    ))
                })?;
                members.push(Individual {
                    id: ind.id,
                    cards,
                    fitness: ind.fitness,
                    generation: ind.generation,
                    parents: ind.parents,
                });
            }
            islands.push(members);
        }

        self.seed = state.seed;
        self.generation = state.generation;
        self.stagnation = state.stagnation;
        self.best_fitness = state.best_fitness;
        self.next_id = state.next_id;
        self.islands = islands;
        self.history = state.history;
        self.hall_of_fame = state.hall_of_fame;
        self.stop = state.stop;
        self.evaluations = state.evaluations;
        self.issued.clear();
        self.cache = state.cache.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::GeneratorConstraints;
    use crate::test_support::{flat_score, sample_pool, score_by_cost};

    fn config(size: usize, generations: usize, seed: u64) -> GeneticConfig {
        GeneticConfig {
            population_size: size,
            generations,
            seed: Some(seed),
            convergence_generations: 0,
            ..Default::default()
        }
    }

    fn engine(config: GeneticConfig) -> GeneticEngine {
        GeneticEngine::new(config, sample_pool(GeneratorConstraints::default()))
    }

    #[test]
    fn test_engine_initialization() {
        let mut engine = engine(config(10, 5, 1));
        engine.initialize().unwrap();
        assert_eq!(engine.population().count(), 10);
        assert!(engine.population().all(|ind| engine.is_viable(&ind.cards)));
    }

    #[test]
    fn test_engine_run() {
        let mut engine = engine(config(12, 3, 2));
        let result = engine.run(&score_by_cost).unwrap();
        assert_eq!(result.generations, 3);
        assert_eq!(result.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.history.best_fitness.len(), 4);
        assert!(result.best_fitness > 0.0);
        assert!(!result.hall_of_fame.is_empty());
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let run = || {
            let mut engine = engine(config(30, 10, 4242));
            engine.run(&score_by_cost).unwrap().history.best_fitness
        };
        let a = run();
        let b = run();
        assert_eq!(a.len(), 11);
        assert_eq!(a, b);
    }

    #[test]
    fn test_elitism_keeps_best_monotonic() {
        let cfg = GeneticConfig {
            elite_count: 2,
            ..config(50, 20, 777)
        };
        let mut engine = engine(cfg);
        let result = engine.run(&score_by_cost).unwrap();
        let best = &result.history.best_fitness;
        assert_eq!(best.len(), 21);
        assert!(best.windows(2).all(|w| w[1] >= w[0]), "{best:?}");
    }

    #[test]
    fn test_island_model_runs() {
        let cfg = GeneticConfig {
            island_model: true,
            island_count: 3,
            migration_interval: 2,
            migration_size: 2,
            ..config(30, 6, 5)
        };
        let mut engine = engine(cfg);
        let result = engine.run(&score_by_cost).unwrap();
        assert_eq!(engine.islands.len(), 3);
        assert!(engine.islands.iter().all(|i| i.len() == 10));
        assert!(result.history.best_fitness.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_target_and_convergence_stop() {
        let cfg = GeneticConfig {
            target_fitness: 0.01,
            ..config(10, 50, 8)
        };
        let result = engine(cfg).run(&score_by_cost).unwrap();
        assert_eq!(result.stop_reason, StopReason::TargetReached);
        assert_eq!(result.generations, 0);

        let cfg = GeneticConfig {
            convergence_generations: 3,
            ..config(10, 500, 8)
        };
        let result = engine(cfg).run(&flat_score).unwrap();
        assert_eq!(result.stop_reason, StopReason::Converged);
        assert_eq!(result.generations, 3);
    }

    #[test]
    fn test_cancellation() {
        let mut engine = engine(config(5, 100, 9));
        engine.cancel_handle().store(true, Ordering::Relaxed);
        let result = engine.run(&score_by_cost).unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn test_seed_population_used() {
        let pool = sample_pool(GeneratorConstraints::default());
        let seed_deck: Vec<String> = [
            "Hog Rider", "Cannon", "Fireball", "The Log", "Musketeer", "Valkyrie", "Skeletons",
            "Ice Spirit",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let cfg = GeneticConfig {
            seed_population: vec![seed_deck.clone(), vec!["Nope".into(); 8]],
            use_archetypes: false,
            ..config(6, 1, 10)
        };
        let mut engine = GeneticEngine::new(cfg, pool.clone());
        engine.initialize().unwrap();
        let first = engine.population().next().unwrap();
        assert_eq!(pool.names(&first.cards), seed_deck);
        assert_eq!(engine.population().count(), 6);
    }

    #[test]
    fn test_generator_mode_matches_standalone() {
        let mut standalone = engine(config(16, 5, 31));
        let expected = standalone.run(&score_by_cost).unwrap();

        let mut driven = engine(config(16, 5, 31));
        let mut evaluations = 0;
        loop {
            let batch = driven.next_batch(7).unwrap();
            if batch.is_empty() {
                break;
            }
            for issued in batch {
                let score = score_by_cost(&issued.deck).unwrap().overall;
                driven.complete(issued.slot, Some(score));
                evaluations += 1;
            }
        }
        assert_eq!(driven.history().best_fitness, expected.history.best_fitness);
        assert_eq!(evaluations, expected.total_evaluations);
    }

    #[test]
    fn test_checkpoint_restore_mid_generation() {
        let mut reference = engine(config(16, 6, 55));
        let expected = reference.run(&score_by_cost).unwrap();

        let mut first = engine(config(16, 6, 55));
        let score = |issued: &Issued| score_by_cost(&issued.deck).unwrap().overall;
        for _ in 0..4 {
            for issued in first.next_batch(5).unwrap() {
                first.complete(issued.slot, Some(score(&issued)));
            }
        }
        // part of the next generation stays outstanding
        let batch = first.next_batch(5).unwrap();
        assert!(!batch.is_empty());
        for issued in batch.iter().skip(2) {
            first.complete(issued.slot, Some(score(issued)));
        }
        let json = serde_json::to_string(&first.checkpoint()).unwrap();

        let mut resumed = engine(GeneticConfig {
            seed: None,
            ..config(16, 6, 55)
        });
        resumed.restore(serde_json::from_str(&json).unwrap()).unwrap();
        let result = resumed.run(&score_by_cost).unwrap();
        assert_eq!(result.history.best_fitness, expected.history.best_fitness);
        assert_eq!(result.total_evaluations, expected.total_evaluations);
        assert_eq!(result.seed, 55);
    }

    #[test]
    fn test_restore_keeps_fitness_cache() {
        let cfg = GeneticConfig {
            use_archetypes: false,
            ..config(12, 8, 91)
        };
        let mut reference = engine(cfg.clone());
        let expected = reference.run(&score_by_cost).unwrap();

        let mut first = engine(cfg.clone());
        let score = |issued: &Issued| score_by_cost(&issued.deck).unwrap().overall;
        let mut evaluated = 0u64;
        for _ in 0..5 {
            for issued in first.next_batch(12).unwrap() {
                first.complete(issued.slot, Some(score(&issued)));
                evaluated += 1;
            }
        }
        let GeneratorState::Genetic(state) = first.checkpoint() else {
            panic!("expected genetic state");
        };
        assert_eq!(state.cache.len(), first.cache.len());
        assert_eq!(state.evaluations, evaluated);

        let mut resumed = engine(cfg);
        resumed.restore(GeneratorState::Genetic(state)).unwrap();
        assert_eq!(resumed.cache, first.cache);
        loop {
            let batch = resumed.next_batch(12).unwrap();
            if batch.is_empty() {
                break;
            }
            for issued in batch {
                resumed.complete(issued.slot, Some(score(&issued)));
                evaluated += 1;
            }
        }
        // decks scored before the checkpoint are not scored again
        assert_eq!(evaluated, expected.total_evaluations);
        assert_eq!(resumed.evaluations, expected.total_evaluations);
        assert_eq!(resumed.history().best_fitness, expected.history.best_fitness);
    }
}
