//! Random, weighted and archetype-constrained samplers.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::prelude::*;
use rand_distr::WeightedAliasIndex;

use crate::schema::{
    ARCHETYPES, ArchetypeTemplate, CandidatePool, CardRole, DECK_SIZE, GeneratorConfig,
    GeneratorConfigError, RoleComposition, Strategy, find_archetype,
};

use super::{DeckGenerator, GeneratorError, GeneratorState, Issued, Ledger, derive_seed, resolve_seed};

/// Attempts to build one constraint-satisfying deck before the sample is discarded.
pub const MAX_ATTEMPTS_PER_SAMPLE: u32 = 100;

/// Consecutive discarded samples after which the constraints are deemed unsatisfiable.
pub const MAX_CONSECUTIVE_DISCARDS: u32 = 10;

/// Floor keeping zero-weight or unleveled cards reachable.
const MIN_WEIGHT: f64 = 1e-6;

/// How cards are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Every eligible card equally likely.
    Uniform,
    /// Biased by `(weight * level_ratio)^2`.
    Weighted,
    /// Weighted, and the deck must match an archetype template.
    Archetype,
}

/// Per-role alias tables for weighted draws.
struct WeightTables {
    by_role: BTreeMap<CardRole, (Vec<usize>, WeightedAliasIndex<f64>)>,
    all: (Vec<usize>, WeightedAliasIndex<f64>),
}

impl WeightTables {
    fn new(pool: &CandidatePool) -> Result<Self, GeneratorError> {
        let table = |indices: Vec<usize>| -> Result<(Vec<usize>, WeightedAliasIndex<f64>), GeneratorError> {
            let weights = indices
                .iter()
                .map(|&i| effective_weight(pool, i))
                .collect();
            let dist = WeightedAliasIndex::new(weights)
                .map_err(|e| GeneratorError::Weights(e.to_string()))?;
            Ok((indices, dist))
        };

        let mut by_role = BTreeMap::new();
        for role in CardRole::ALL {
            let indices = pool.with_role(role).to_vec();
            if !indices.is_empty() {
                by_role.insert(role, table(indices)?);
            }
        }
        let all = table((0..pool.len()).collect())?;
        Ok(Self { by_role, all })
    }
}

fn effective_weight(pool: &CandidatePool, idx: usize) -> f64 {
    let card = pool.card(idx);
    let w = card.weight.max(0.0) * card.level_ratio();
    (w * w).max(MIN_WEIGHT)
}

/// Bounded sampler shared by the random, smart and archetype strategies.
///
/// Sample `i` draws from its own RNG seeded by `(seed, i)`, so a restored
/// sampler reproduces exactly what an uninterrupted one would have drawn.
pub struct Sampler {
    pool: Arc<CandidatePool>,
    mode: SampleMode,
    composition: RoleComposition,
    archetype: Option<&'static ArchetypeTemplate>,
    weights: Option<WeightTables>,
    sample_size: u64,
    seed: u64,
    drawn: u64,
    emitted: u64,
    discarded: u64,
    consecutive_discards: u32,
    ledger: Ledger,
}

impl Sampler {
    pub fn new(
        pool: Arc<CandidatePool>,
        mode: SampleMode,
        config: &GeneratorConfig,
    ) -> Result<Self, GeneratorError> {
        let weights = match mode {
            SampleMode::Uniform => None,
            SampleMode::Weighted | SampleMode::Archetype => Some(WeightTables::new(&pool)?),
        };
        let archetype = match (&config.archetype, mode) {
            (Some(name), SampleMode::Archetype) => Some(
                find_archetype(name)
                    .ok_or_else(|| GeneratorConfigError::UnknownArchetype(name.clone()))?,
            ),
            _ => None,
        };
        Ok(Self {
            pool,
            mode,
            composition: config.composition.clone(),
            archetype,
            weights,
            sample_size: config.sample_size,
            seed: resolve_seed(config.seed),
            drawn: 0,
            emitted: 0,
            discarded: 0,
            consecutive_discards: 0,
            ledger: Ledger::default(),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Samples that produced no valid deck.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Try to build one deck for sample `index`.
    fn sample(&self, index: u64) -> Option<Vec<usize>> {
        let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, index));
        for _ in 0..MAX_ATTEMPTS_PER_SAMPLE {
            let template = match self.mode {
                SampleMode::Archetype => Some(
                    self.archetype
                        .unwrap_or_else(|| &ARCHETYPES[rng.gen_range(0..ARCHETYPES.len())]),
                ),
                _ => None,
            };
            let sel = self.build(&mut rng, template);
            if !self.pool.is_valid(&sel) {
                continue;
            }
            if let Some(t) = template {
                let avg = self.pool.avg_elixir(&sel);
                if !t.matches_profile(avg, |role| self.count_role(&sel, role)) {
                    continue;
                }
            }
            return Some(sel);
        }
        None
    }

    fn build(&self, rng: &mut StdRng, template: Option<&ArchetypeTemplate>) -> Vec<usize> {
        let mut sel: Vec<usize> = self.pool.includes().to_vec();

        let mut wants: Vec<(CardRole, usize)> = template
            .map(|t| t.required_roles.to_vec())
            .unwrap_or_default();
        wants.extend(
            CardRole::ALL
                .iter()
                .map(|&role| (role, self.composition.count(role))),
        );

        for (role, n) in wants {
            while sel.len() < DECK_SIZE && self.count_role(&sel, role) < n {
                match self.pick(rng, Some(role), &sel) {
                    Some(idx) => sel.push(idx),
                    None => break,
                }
            }
        }

        while sel.len() < DECK_SIZE {
            match self.pick(rng, None, &sel) {
                Some(idx) => sel.push(idx),
                None => break,
            }
        }

        sel
    }

    fn count_role(&self, sel: &[usize], role: CardRole) -> usize {
        sel.iter().filter(|&&i| self.pool.card(i).role == role).count()
    }

    /// Draw one unselected card, optionally restricted to a role.
    fn pick(&self, rng: &mut StdRng, role: Option<CardRole>, taken: &[usize]) -> Option<usize> {
        if let Some(tables) = &self.weights {
            let table = match role {
                Some(r) => tables.by_role.get(&r)?,
                None => &tables.all,
            };
            // Rejection keeps the weighting; fall through to a uniform pick
            // when the heavy cards are already taken.
            for _ in 0..16 {
                let idx = table.0[table.1.sample(rng)];
                if !taken.contains(&idx) {
                    return Some(idx);
                }
            }
        }

        let candidates: Vec<usize> = match role {
            Some(r) => self.pool.with_role(r).to_vec(),
            None => (0..self.pool.len()).collect(),
        };
        candidates
            .into_iter()
            .filter(|i| !taken.contains(i))
            .collect::<Vec<_>>()
            .choose(rng)
            .copied()
    }
}

impl DeckGenerator for Sampler {
    fn strategy(&self) -> Strategy {
        match self.mode {
            SampleMode::Uniform => Strategy::Random,
            SampleMode::Weighted => Strategy::Smart,
            SampleMode::Archetype => Strategy::Archetype,
        }
    }

    fn next_batch(&mut self, max: usize) -> Result<Vec<Issued>, GeneratorError> {
        let mut batch = self.ledger.reissue(&self.pool, max)?;

        while batch.len() < max && self.drawn < self.sample_size {
            let index = self.drawn;
            self.drawn += 1;

            match self.sample(index) {
                Some(sel) => {
                    self.consecutive_discards = 0;
                    self.emitted += 1;
                    let deck = self.pool.deck(&sel)?;
                    self.ledger.issue(index, sel);
                    batch.push(Issued { slot: index, deck });
                }
                None => {
                    self.discarded += 1;
                    self.consecutive_discards += 1;
                    log::debug!(
                        "Sample {} discarded after {} attempts",
                        index,
                        MAX_ATTEMPTS_PER_SAMPLE
                    );
                    if self.consecutive_discards >= MAX_CONSECUTIVE_DISCARDS {
                        if !batch.is_empty() {
                            // hand out what we have; the next call reports it
                            break;
                        }
                        return Err(GeneratorError::NoViableDeck {
                            attempts: self.consecutive_discards as u64
                                * MAX_ATTEMPTS_PER_SAMPLE as u64,
                            reason: format!(
                                "{} consecutive samples failed the constraints",
                                self.consecutive_discards
                            ),
                        });
                    }
                }
            }
        }

        Ok(batch)
    }

    fn complete(&mut self, slot: u64, _fitness: Option<f64>) {
        self.ledger.complete(slot);
    }

    fn total(&self) -> Option<u64> {
        Some(self.sample_size)
    }

    fn checkpoint(&self) -> GeneratorState {
        GeneratorState::Sampling {
            seed: self.seed,
            drawn: self.drawn,
            emitted: self.emitted,
            discarded: self.discarded,
            consecutive_discards: self.consecutive_discards,
            outstanding: self.ledger.snapshot(&self.pool),
        }
    }

    fn restore(&mut self, state: GeneratorState) -> Result<(), GeneratorError> {
        let GeneratorState::Sampling {
            seed,
            drawn,
            emitted,
            discarded,
            consecutive_discards,
            outstanding,
        } = state
        else {
            return Err(GeneratorError::StateMismatch {
                expected: "sampling",
                found: state.kind(),
            });
        };
        if seed == 0 {
            return Err(GeneratorError::InvalidState("sampler seed is zero".into()));
        }
        self.ledger.restore(&self.pool, outstanding)?;
        self.seed = seed;
        self.drawn = drawn;
        self.emitted = emitted;
        self.discarded = discarded;
        self.consecutive_discards = consecutive_discards;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::decks;
    use crate::schema::{GeneratorConstraints, Strategy};
    use crate::test_support::{sample_cards, sample_pool};
    use proptest::prelude::*;

    fn config(strategy: Strategy, sample_size: u64, seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            strategy,
            sample_size,
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_random_decks_satisfy_constraints() {
        let constraints = GeneratorConstraints {
            min_avg_elixir: 2.5,
            max_avg_elixir: 4.5,
            ..Default::default()
        };
        let pool = sample_pool(constraints);
        let mut sampler =
            Sampler::new(pool.clone(), SampleMode::Uniform, &config(Strategy::Random, 500, 9))
                .unwrap();
        let all: Vec<_> = decks(&mut sampler).collect();
        assert!(!all.is_empty());
        assert!(all.len() <= 500);
        assert_eq!(all.len() as u64 + sampler.discarded(), 500);
        for deck in &all {
            let avg = deck.avg_elixir();
            assert!((2.5..=4.5).contains(&avg));
            assert!(deck.count_role(CardRole::WinCondition) >= 1);
        }
    }

    #[test]
    fn test_same_seed_same_decks() {
        let pool = sample_pool(GeneratorConstraints::default());
        let cfg = config(Strategy::Smart, 50, 1234);
        let a: Vec<_> = decks(&mut Sampler::new(pool.clone(), SampleMode::Weighted, &cfg).unwrap())
            .map(|d| d.key())
            .collect();
        let b: Vec<_> = decks(&mut Sampler::new(pool, SampleMode::Weighted, &cfg).unwrap())
            .map(|d| d.key())
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weighted_prefers_heavy_cards() {
        let mut cards = sample_cards();
        for card in &mut cards {
            if card.role == CardRole::WinCondition {
                card.weight = if card.name == "Miner" { 10.0 } else { 0.1 };
            }
        }
        let constraints = GeneratorConstraints::default();
        let pool = Arc::new(CandidatePool::new(cards, constraints).unwrap());
        let mut sampler =
            Sampler::new(pool, SampleMode::Weighted, &config(Strategy::Smart, 200, 5)).unwrap();
        let all: Vec<_> = decks(&mut sampler).collect();
        let with_miner = all.iter().filter(|d| d.contains("Miner")).count();
        assert!(with_miner * 10 > all.len() * 9, "{with_miner}/{}", all.len());
    }

    #[test]
    fn test_archetype_pinned() {
        let pool = sample_pool(GeneratorConstraints::default());
        let cfg = GeneratorConfig {
            archetype: Some("siege".into()),
            ..config(Strategy::Archetype, 100, 77)
        };
        let siege = find_archetype("siege").unwrap();
        let mut sampler = Sampler::new(pool, SampleMode::Archetype, &cfg).unwrap();
        let all: Vec<_> = decks(&mut sampler).collect();
        assert!(!all.is_empty());
        assert!(all.iter().all(|d| siege.matches(d)));
    }

    #[test]
    fn test_unsatisfiable_reports_no_viable_deck() {
        let pool = sample_pool(GeneratorConstraints {
            min_avg_elixir: 9.0,
            max_avg_elixir: 10.0,
            ..Default::default()
        });
        let mut sampler =
            Sampler::new(pool, SampleMode::Uniform, &config(Strategy::Random, 100, 3)).unwrap();
        match sampler.next_batch(8) {
            Err(GeneratorError::NoViableDeck { attempts, .. }) => {
                assert_eq!(attempts, 1000)
            }
            other => panic!("expected NoViableDeck, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_resume_matches_uninterrupted_run() {
        let pool = sample_pool(GeneratorConstraints::default());
        let cfg = config(Strategy::Random, 60, 42);

        let mut reference = Sampler::new(pool.clone(), SampleMode::Uniform, &cfg).unwrap();
        let expected: Vec<_> = decks(&mut reference).map(|d| d.key()).collect();

        let mut first = Sampler::new(pool.clone(), SampleMode::Uniform, &cfg).unwrap();
        let batch = first.next_batch(25).unwrap();
        for issued in &batch[..20] {
            first.complete(issued.slot, Some(5.0));
        }
        let state = first.checkpoint();
        let json = serde_json::to_string(&state).unwrap();

        let mut resumed = Sampler::new(
            pool,
            SampleMode::Uniform,
            &GeneratorConfig {
                seed: None,
                ..cfg
            },
        )
        .unwrap();
        resumed.restore(serde_json::from_str(&json).unwrap()).unwrap();
        let mut seen: Vec<_> = batch[..20].iter().map(|i| i.deck.key()).collect();
        seen.extend(decks(&mut resumed).map(|d| d.key()));
        assert_eq!(seen, expected);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sampled_decks_are_valid(
            seed in 1u64..u64::MAX,
            min in 2.0f64..3.5,
            span in 0.5f64..2.0,
            weighted in any::<bool>(),
        ) {
            let pool = sample_pool(GeneratorConstraints {
                min_avg_elixir: min,
                max_avg_elixir: min + span,
                ..Default::default()
            });
            let mode = if weighted { SampleMode::Weighted } else { SampleMode::Uniform };
            let mut sampler = Sampler::new(pool.clone(), mode, &config(Strategy::Random, 20, seed)).unwrap();
            for deck in decks(&mut sampler) {
                let names = deck.names();
                let indices = pool.indices_of(&names).unwrap();
                prop_assert!(pool.validate(&indices).is_ok());
            }
        }
    }
}
