//! Genetic search configuration.

use serde::{Deserialize, Serialize};

/// Parameters for the genetic deck search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticConfig {
    /// Individuals per generation (across all islands).
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Maximum number of generations to evolve.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Probability that an offspring is mutated.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Probability that two parents are recombined instead of cloned.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Fraction of the eight slots replaced by one mutation (0.0-1.0).
    #[serde(default = "default_mutation_intensity")]
    pub mutation_intensity: f64,
    /// Best individuals copied unchanged into the next generation.
    #[serde(default = "default_elite_count")]
    pub elite_count: usize,
    /// Contestants per tournament.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Evaluate individuals in parallel (standalone mode).
    #[serde(default = "default_true")]
    pub parallel_evaluations: bool,
    /// Stop after this many generations without improvement; 0 disables.
    #[serde(default = "default_convergence_generations")]
    pub convergence_generations: usize,
    /// Stop once best fitness reaches this value; 0 disables.
    #[serde(default)]
    pub target_fitness: f64,
    /// Split the population into islands with periodic migration.
    #[serde(default)]
    pub island_model: bool,
    #[serde(default = "default_island_count")]
    pub island_count: usize,
    #[serde(default = "default_migration_interval")]
    pub migration_interval: usize,
    #[serde(default = "default_migration_size")]
    pub migration_size: usize,
    /// Regenerate individuals that match no archetype template.
    #[serde(default = "default_true")]
    pub use_archetypes: bool,
    /// Decks (by card names) used to warm-start the first generation.
    #[serde(default)]
    pub seed_population: Vec<Vec<String>>,
    /// Random seed; `None` or `Some(0)` picks a fresh one.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            generations: default_generations(),
            mutation_rate: default_mutation_rate(),
            crossover_rate: default_crossover_rate(),
            mutation_intensity: default_mutation_intensity(),
            elite_count: default_elite_count(),
            tournament_size: default_tournament_size(),
            parallel_evaluations: true,
            convergence_generations: default_convergence_generations(),
            target_fitness: 0.0,
            island_model: false,
            island_count: default_island_count(),
            migration_interval: default_migration_interval(),
            migration_size: default_migration_size(),
            use_archetypes: true,
            seed_population: Vec::new(),
            seed: None,
        }
    }
}

fn default_population_size() -> usize {
    100
}
fn default_generations() -> usize {
    200
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_crossover_rate() -> f64 {
    0.8
}
fn default_mutation_intensity() -> f64 {
    0.3
}
fn default_elite_count() -> usize {
    2
}
fn default_tournament_size() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_convergence_generations() -> usize {
    30
}
fn default_island_count() -> usize {
    4
}
fn default_migration_interval() -> usize {
    15
}
fn default_migration_size() -> usize {
    2
}

/// Genetic configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneticConfigError {
    #[error("Population size must be positive")]
    EmptyPopulation,
    #[error("Generation count must be positive")]
    NoGenerations,
    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[error("Elite count ({elite}) must be less than population size ({population})")]
    TooManyElites { elite: usize, population: usize },
    #[error("Tournament size must be between 1 and population size ({population}), got {size}")]
    InvalidTournament { size: usize, population: usize },
    #[error("Island model needs at least 2 islands, got {0}")]
    TooFewIslands(usize),
    #[error("Migration interval must be positive")]
    InvalidMigrationInterval,
    #[error("Migration size must be positive and below the island population ({per_island}), got {size}")]
    InvalidMigrationSize { size: usize, per_island: usize },
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

impl GeneticConfig {
    /// Validate parameter ranges and cross-field rules.
    pub fn validate(&self) -> Result<(), GeneticConfigError> {
        if self.population_size == 0 {
            return Err(GeneticConfigError::EmptyPopulation);
        }
        if self.generations == 0 {
            return Err(GeneticConfigError::NoGenerations);
        }

        for (name, value) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
            ("mutation_intensity", self.mutation_intensity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GeneticConfigError::RateOutOfRange { name, value });
            }
        }

        if self.elite_count >= self.population_size {
            return Err(GeneticConfigError::TooManyElites {
                elite: self.elite_count,
                population: self.population_size,
            });
        }
        if self.tournament_size == 0 || self.tournament_size > self.population_size {
            return Err(GeneticConfigError::InvalidTournament {
                size: self.tournament_size,
                population: self.population_size,
            });
        }

        if self.island_model {
            if self.island_count < 2 {
                return Err(GeneticConfigError::TooFewIslands(self.island_count));
            }
            if self.migration_interval == 0 {
                return Err(GeneticConfigError::InvalidMigrationInterval);
            }
            let per_island = self.population_size / self.island_count;
            if self.migration_size == 0 || self.migration_size >= per_island {
                return Err(GeneticConfigError::InvalidMigrationSize {
                    size: self.migration_size,
                    per_island,
                });
            }
        }

        Ok(())
    }

    /// Number of islands the population is split into.
    pub fn islands(&self) -> usize {
        if self.island_model {
            self.island_count.max(1)
        } else {
            1
        }
    }

    /// Slots replaced by one mutation.
    pub fn mutation_slots(&self) -> usize {
        ((8.0 * self.mutation_intensity).round() as usize).clamp(1, 8)
    }

    /// Defaults overridden by `GA_*` environment variables.
    pub fn from_env() -> Result<Self, GeneticConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `GA_*` environment variables that are set.
    pub fn apply_env(&mut self) -> Result<(), GeneticConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<(), GeneticConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(
            var: &'static str,
            raw: Option<String>,
        ) -> Result<Option<T>, GeneticConfigError> {
            match raw {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| GeneticConfigError::InvalidEnv { var, value }),
            }
        }

        macro_rules! env_field {
            ($var:literal, $field:ident) => {
                if let Some(v) = parse($var, lookup($var))? {
                    self.$field = v;
                }
            };
        }

        env_field!("GA_POPULATION_SIZE", population_size);
        env_field!("GA_GENERATIONS", generations);
        env_field!("GA_MUTATION_RATE", mutation_rate);
        env_field!("GA_CROSSOVER_RATE", crossover_rate);
        env_field!("GA_MUTATION_INTENSITY", mutation_intensity);
        env_field!("GA_ELITE_COUNT", elite_count);
        env_field!("GA_TOURNAMENT_SIZE", tournament_size);
        env_field!("GA_PARALLEL_EVALUATIONS", parallel_evaluations);
        env_field!("GA_CONVERGENCE_GENERATIONS", convergence_generations);
        env_field!("GA_TARGET_FITNESS", target_fitness);
        env_field!("GA_ISLAND_MODEL", island_model);
        env_field!("GA_ISLAND_COUNT", island_count);
        env_field!("GA_MIGRATION_INTERVAL", migration_interval);
        env_field!("GA_MIGRATION_SIZE", migration_size);
        env_field!("GA_USE_ARCHETYPES", use_archetypes);

        if let Some(seed) = parse::<u64>("GA_SEED", lookup("GA_SEED"))? {
            self.seed = Some(seed);
        }

        Ok(())
    }
}
