//! The discovery run loop.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::prelude::*;

use crate::evaluate::{EvaluationError, Evaluator};
use crate::generator::{DeckGenerator, GeneratorError, Issued, build_generator};
use crate::schema::{CandidatePool, DiscoveryStats, GeneratorConfig, RunnerConfig, ScoreResult};
use crate::store::{NewEntry, ResultStore, StoreError};

use super::checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointError, CheckpointStore};
use super::session::{SessionError, SessionPaths, sanitize_tag};
use super::signal::CancelToken;

/// Lifecycle of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Why a session completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The generator has nothing left.
    Exhausted,
    /// The constraints admit no further decks.
    NoViableDeck,
    MaxEvaluations,
    TargetScore,
}

/// How a session ended. Cancellation is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed {
        reason: CompletionReason,
        stats: DiscoveryStats,
    },
    Cancelled(DiscoveryStats),
}

impl SessionOutcome {
    pub fn stats(&self) -> &DiscoveryStats {
        match self {
            SessionOutcome::Completed { stats, .. } => stats,
            SessionOutcome::Cancelled(stats) => stats,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionOutcome::Cancelled(_))
    }
}

/// Session-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("No checkpoint to resume for {0}; start fresh")]
    NoCheckpoint(String),
    #[error("No valid checkpoint for {tag} ({reason}); start fresh")]
    InvalidCheckpoint { tag: String, reason: String },
    #[error("Final checkpoint write failed after {attempts} attempts: {source}")]
    CheckpointWrite {
        attempts: u32,
        #[source]
        source: CheckpointError,
    },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

type ProgressFn = Box<dyn Fn(&DiscoveryStats) + Send>;

/// Per-session timing and checkpoint bookkeeping.
struct SessionClock {
    started: Instant,
    prior_elapsed: Duration,
    evaluated: u64,
    since_checkpoint: u64,
    last_checkpoint: Instant,
}

impl SessionClock {
    fn new(prior_elapsed: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            prior_elapsed,
            evaluated: 0,
            since_checkpoint: 0,
            last_checkpoint: now,
        }
    }
}

/// Drives generator, evaluator and store for one tagged session.
pub struct DiscoveryRunner {
    config: RunnerConfig,
    tag: String,
    pool: Arc<CandidatePool>,
    generator: Box<dyn DeckGenerator>,
    evaluator: Arc<dyn Evaluator>,
    store: ResultStore,
    checkpoints: CheckpointStore,
    stats: DiscoveryStats,
    cancel: CancelToken,
    workers: Option<rayon::ThreadPool>,
    progress: Option<ProgressFn>,
    state: SessionState,
}

impl DiscoveryRunner {
    /// Create a runner over an already opened store and checkpoint file.
    pub fn new<E: Evaluator + 'static>(
        config: RunnerConfig,
        generator_config: &GeneratorConfig,
        pool: Arc<CandidatePool>,
        evaluator: E,
        store: ResultStore,
        checkpoints: CheckpointStore,
    ) -> Result<Self, DiscoveryError> {
        let tag = sanitize_tag(&config.tag)?;
        let generator = build_generator(generator_config, Arc::clone(&pool))?;

        let workers = if config.workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.workers)
                    .thread_name(|i| format!("deck-eval-{i}"))
                    .build()?,
            )
        } else {
            None
        };

        let mut stats = DiscoveryStats::new(generator.strategy(), tag.clone());
        stats.total = generator.total();

        Ok(Self {
            config,
            tag,
            pool,
            generator,
            evaluator: Arc::new(evaluator),
            store,
            checkpoints,
            stats,
            cancel: CancelToken::new(),
            workers,
            progress: None,
            state: SessionState::Idle,
        })
    }

    /// Create a runner with the store and checkpoint at their standard paths.
    pub fn open<E: Evaluator + 'static>(
        config: RunnerConfig,
        generator_config: &GeneratorConfig,
        pool: Arc<CandidatePool>,
        evaluator: E,
        paths: &SessionPaths,
    ) -> Result<Self, DiscoveryError> {
        let tag = sanitize_tag(&config.tag)?;
        let store = ResultStore::open(paths.store_file(&tag), tag.clone())?;
        let checkpoints = CheckpointStore::new(paths.checkpoint_file(&tag));
        Self::new(config, generator_config, pool, evaluator, store, checkpoints)
    }

    /// Observe progress after every evaluation.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DiscoveryStats) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Use an externally owned token, e.g. one wired to process signals.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn stats(&self) -> &DiscoveryStats {
        &self.stats
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoints.exists()
    }

    pub fn clear_checkpoint(&self) -> Result<(), DiscoveryError> {
        Ok(self.checkpoints.clear()?)
    }

    /// Restore statistics and generator state from the session checkpoint.
    pub fn resume(&mut self) -> Result<(), DiscoveryError> {
        let invalid = |reason: String| DiscoveryError::InvalidCheckpoint {
            tag: self.tag.clone(),
            reason,
        };

        let checkpoint = match self.checkpoints.load() {
            Ok(c) => c,
            Err(CheckpointError::Missing(_)) => {
                return Err(DiscoveryError::NoCheckpoint(self.tag.clone()));
            }
            Err(e @ (CheckpointError::Corrupt { .. } | CheckpointError::UnsupportedVersion(_))) => {
                return Err(invalid(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if checkpoint.tag != self.tag {
            return Err(invalid(format!("checkpoint belongs to {}", checkpoint.tag)));
        }
        let strategy = self.generator.strategy();
        if checkpoint.strategy != strategy {
            return Err(invalid(format!(
                "checkpoint strategy {} does not match {}",
                checkpoint.strategy, strategy
            )));
        }
        if checkpoint.pool_fingerprint != self.pool.fingerprint() {
            return Err(invalid("candidate pool has changed".to_string()));
        }

        self.generator
            .restore(checkpoint.generator)
            .map_err(|e| invalid(e.to_string()))?;
        self.stats = checkpoint.stats;

        log::info!(
            "Resumed {} from checkpoint: {} evaluated, {} stored, best {:.2}",
            self.tag,
            self.stats.evaluated,
            self.stats.stored,
            self.stats.best_score
        );
        Ok(())
    }

    /// Snapshot the session.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            tag: self.tag.clone(),
            strategy: self.generator.strategy(),
            stats: self.stats.clone(),
            generator: self.generator.checkpoint(),
            pool_fingerprint: self.pool.fingerprint().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn save_checkpoint(&self) -> Result<(), CheckpointError> {
        self.checkpoints.save(&self.checkpoint())
    }

    /// Run until the generator is exhausted, a stop condition is met, or the
    /// session is cancelled.
    pub fn run(&mut self) -> Result<SessionOutcome, DiscoveryError> {
        self.state = SessionState::Running;
        let mut clock = SessionClock::new(self.stats.elapsed);
        log::info!(
            "Starting {} discovery for {} ({} evaluated so far)",
            self.generator.strategy(),
            self.tag,
            self.stats.evaluated
        );

        let reason = loop {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(&mut clock);
            }
            if let Some(reason) = self.stop_condition() {
                break reason;
            }

            let want = match self.config.max_evaluations {
                Some(max) => (max.saturating_sub(self.stats.evaluated) as usize)
                    .min(self.config.batch_size),
                None => self.config.batch_size,
            }
            .max(1);

            let batch = match self.generator.next_batch(want) {
                Ok(batch) if batch.is_empty() => {
                    if self.generator.is_exhausted() {
                        break CompletionReason::Exhausted;
                    }
                    continue;
                }
                Ok(batch) => batch,
                Err(GeneratorError::NoViableDeck { attempts, reason }) => {
                    log::warn!("No viable deck after {} attempts: {}", attempts, reason);
                    break CompletionReason::NoViableDeck;
                }
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e.into());
                }
            };

            let evaluator = &self.evaluator;
            let results: Option<Vec<_>> = self.workers.as_ref().map(|workers| {
                workers.install(|| {
                    batch
                        .par_iter()
                        .map(|issued| evaluator.evaluate(&issued.deck))
                        .collect()
                })
            });

            if let Some(results) = results {
                for (issued, result) in batch.iter().zip(results) {
                    self.record(issued, result, &mut clock);
                }
            } else {
                for issued in &batch {
                    if self.cancel.is_cancelled() || self.stop_condition().is_some() {
                        break;
                    }
                    let result = self.evaluator.evaluate(&issued.deck);
                    self.record(issued, result, &mut clock);
                }
            }

            if self.checkpoint_due(&clock) {
                if let Err(e) = self.save_checkpoint() {
                    log::warn!("Periodic checkpoint failed: {}", e);
                }
                clock.since_checkpoint = 0;
                clock.last_checkpoint = Instant::now();
            }
        };

        self.finish_completed(reason, &mut clock)
    }

    /// Fold one evaluation into statistics and the store.
    fn record(
        &mut self,
        issued: &Issued,
        result: Result<ScoreResult, EvaluationError>,
        clock: &mut SessionClock,
    ) {
        match result {
            Ok(score) => {
                self.generator.complete(issued.slot, Some(score.overall));
                let cards = issued.deck.names();
                if self.stats.record(score.overall, &cards, self.config.top_n) {
                    log::debug!("New best {:.3}: {}", score.overall, issued.deck);
                }
                clock.evaluated += 1;
                clock.since_checkpoint += 1;

                let entry = NewEntry {
                    cards,
                    score,
                    strategy: Some(self.generator.strategy()),
                    evaluated_at: Utc::now(),
                    evaluation_version: self.config.evaluation_version.clone(),
                };
                match self.store.insert(&entry) {
                    Ok((_, true)) => self.stats.stored += 1,
                    Ok((_, false)) => {}
                    Err(e) => log::warn!("Failed to store {}: {}", issued.deck, e),
                }
            }
            Err(e) => {
                log::debug!("Evaluation failed for {}: {}", issued.deck, e);
                self.generator.complete(issued.slot, None);
                self.stats.record_failure();
            }
        }

        self.update_timing(clock);
        if let Some(progress) = &self.progress {
            progress(&self.stats);
        }
    }

    fn update_timing(&mut self, clock: &SessionClock) {
        let session = clock.started.elapsed();
        self.stats
            .update_timing(clock.prior_elapsed + session, clock.evaluated, session);
    }

    fn stop_condition(&self) -> Option<CompletionReason> {
        if let Some(max) = self.config.max_evaluations
            && self.stats.evaluated >= max
        {
            return Some(CompletionReason::MaxEvaluations);
        }
        if let Some(target) = self.config.target_score
            && self.stats.best_deck.is_some()
            && self.stats.best_score >= target
        {
            return Some(CompletionReason::TargetScore);
        }
        None
    }

    fn checkpoint_due(&self, clock: &SessionClock) -> bool {
        let policy = &self.config.checkpoint;
        (policy.every_evaluations > 0 && clock.since_checkpoint >= policy.every_evaluations)
            || (policy.every_seconds > 0
                && clock.last_checkpoint.elapsed() >= Duration::from_secs(policy.every_seconds))
    }

    fn finish_completed(
        &mut self,
        reason: CompletionReason,
        clock: &mut SessionClock,
    ) -> Result<SessionOutcome, DiscoveryError> {
        self.update_timing(clock);
        if let Err(e) = self.store.recalculate_stats() {
            log::warn!("Failed to refresh store stats: {}", e);
        }
        if let Err(e) = self.checkpoints.clear() {
            self.state = SessionState::Failed;
            return Err(e.into());
        }
        self.state = SessionState::Completed;

        log::info!(
            "Discovery for {} complete ({:?}): {} evaluated, {} stored, best {:.2}",
            self.tag,
            reason,
            self.stats.evaluated,
            self.stats.stored,
            self.stats.best_score
        );
        Ok(SessionOutcome::Completed {
            reason,
            stats: self.stats.clone(),
        })
    }

    fn finish_cancelled(
        &mut self,
        clock: &mut SessionClock,
    ) -> Result<SessionOutcome, DiscoveryError> {
        self.update_timing(clock);
        if let Err(e) = self.store.recalculate_stats() {
            log::warn!("Failed to refresh store stats: {}", e);
        }

        let attempts = self.config.checkpoint.cancel_write_retries + 1;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.save_checkpoint() {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    log::warn!("Final checkpoint attempt {}/{} failed: {}", attempt, attempts, e);
                    last_err = Some(e);
                }
            }
        }
        if let Some(source) = last_err {
            self.state = SessionState::Failed;
            return Err(DiscoveryError::CheckpointWrite { attempts, source });
        }

        self.state = SessionState::Cancelled;
        log::info!(
            "Discovery for {} cancelled after {} evaluated; checkpoint at {}",
            self.tag,
            self.stats.evaluated,
            self.checkpoints.path().display()
        );
        Ok(SessionOutcome::Cancelled(self.stats.clone()))
    }

    pub fn status_summary(&self) -> String {
        status_summary(&self.stats)
    }
}

/// Human-readable status block.
pub fn status_summary(stats: &DiscoveryStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Discovery Status for {}", stats.tag);
    let _ = writeln!(out, "Strategy: {}", stats.strategy);
    let _ = write!(out, "Progress: {} decks evaluated", stats.evaluated);
    if let (Some(total), Some(fraction)) = (stats.total, stats.progress()) {
        let _ = write!(out, " / {} total ({:.1}%)", total, fraction * 100.0);
    }
    let _ = writeln!(out);
    if stats.failed > 0 {
        let _ = writeln!(out, "Failed: {} evaluations", stats.failed);
    }
    let _ = writeln!(out, "Stored: {} decks in store", stats.stored);
    let _ = writeln!(out, "Rate: {:.2} decks/sec", stats.rate);
    let _ = writeln!(out, "Elapsed: {}s", stats.elapsed.as_secs());
    if let Some(eta) = stats.eta {
        let _ = writeln!(out, "ETA: {}s", eta.as_secs());
    }
    let _ = writeln!(out, "Average Score: {:.2}", stats.avg_score);
    if let Some(best) = &stats.best_deck {
        let _ = writeln!(out, "Best Deck: {:.2} - {}", stats.best_score, best.join(", "));
    }
    if !stats.top_scores.is_empty() {
        let scores: Vec<String> = stats
            .top_scores
            .iter()
            .map(|e| format!("{:.2}", e.score))
            .collect();
        let _ = writeln!(out, "Top {} Scores: {}", scores.len(), scores.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::HeuristicEvaluator;
    use crate::schema::{GeneratorConstraints, Strategy};
    use crate::store::QueryFilter;
    use crate::test_support::{sample_pool, score_by_cost};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn random_config(sample_size: u64, min: f64, max: f64) -> GeneratorConfig {
        GeneratorConfig {
            strategy: Strategy::Random,
            constraints: GeneratorConstraints {
                min_avg_elixir: min,
                max_avg_elixir: max,
                ..Default::default()
            },
            sample_size,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn runner_config(workers: usize) -> RunnerConfig {
        RunnerConfig {
            workers,
            batch_size: 64,
            ..RunnerConfig::new("#test1")
        }
    }

    fn runner(
        paths: &SessionPaths,
        generator: &GeneratorConfig,
        workers: usize,
    ) -> DiscoveryRunner {
        let pool = sample_pool(generator.constraints.clone());
        DiscoveryRunner::open(runner_config(workers), generator, pool, score_by_cost, paths)
            .unwrap()
    }

    #[test]
    fn test_random_run_respects_constraints() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let generator = random_config(500, 2.5, 4.5);
        let pool = sample_pool(generator.constraints.clone());
        let mut runner = DiscoveryRunner::open(
            runner_config(4),
            &generator,
            pool,
            HeuristicEvaluator::default(),
            &paths,
        )
        .unwrap();
        assert_eq!(runner.tag(), "TEST1");

        let outcome = runner.run().unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Completed {
                reason: CompletionReason::Exhausted,
                ..
            }
        ));
        let stats = outcome.stats();
        assert!(stats.evaluated > 0 && stats.evaluated <= 500);
        assert_eq!(stats.stored, runner.store().count().unwrap());
        assert_eq!(runner.state(), SessionState::Completed);
        assert!(!runner.has_checkpoint());

        let entries = runner.store().query(&QueryFilter::default()).unwrap();
        assert_eq!(entries.len() as u64, stats.stored);
        for entry in entries {
            let avg = entry.score.avg_elixir;
            assert!((2.5 - 1e-9..=4.5 + 1e-9).contains(&avg), "avg {avg}");
            assert_eq!(entry.strategy, Some(Strategy::Random));
        }
        assert_eq!(runner.store().summary().unwrap().total_entries, stats.stored);
    }

    #[test]
    fn test_cancel_then_resume_continues_counters() {
        let generator = random_config(300, 2.0, 5.0);

        let reference_dir = tempdir().unwrap();
        let mut reference = runner(&SessionPaths::new(reference_dir.path()), &generator, 1);
        let expected = reference.run().unwrap();

        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let first = runner(&paths, &generator, 1);
        let token = first.cancel_token();
        let mut first = first.with_progress(move |stats| {
            if stats.evaluated == 137 {
                token.cancel();
            }
        });
        let outcome = first.run().unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.stats().evaluated, 137);
        assert_eq!(first.state(), SessionState::Cancelled);
        assert!(first.has_checkpoint());
        drop(first);

        let store = CheckpointStore::new(paths.checkpoint_file("TEST1"));
        assert_eq!(store.load().unwrap().stats.evaluated, 137);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut resumed = runner(&paths, &generator, 1).with_progress(move |stats| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(stats.evaluated);
            }
        });
        resumed.resume().unwrap();
        assert_eq!(resumed.stats().evaluated, 137);
        let outcome = resumed.run().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&138));
        assert!(seen.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(outcome.stats().evaluated, expected.stats().evaluated);
        assert_eq!(outcome.stats().stored, expected.stats().stored);
        assert_eq!(outcome.stats().best_score, expected.stats().best_score);
        assert_eq!(top(outcome.stats()), top(expected.stats()));
        assert!(!resumed.has_checkpoint());
    }

    fn top(stats: &DiscoveryStats) -> Vec<(f64, String)> {
        stats
            .top_scores
            .iter()
            .map(|e| (e.score, e.key.clone()))
            .collect()
    }

    /// Run once uninterrupted, then again cancelled at `cancel_at` and resumed.
    fn interrupted_and_reference(
        generator: &GeneratorConfig,
        cancel_at: u64,
    ) -> (DiscoveryStats, DiscoveryStats) {
        let reference_dir = tempdir().unwrap();
        let expected = runner(&SessionPaths::new(reference_dir.path()), generator, 1)
            .run()
            .unwrap();
        assert!(expected.stats().evaluated > cancel_at);

        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let first = runner(&paths, generator, 1);
        let token = first.cancel_token();
        let mut first = first.with_progress(move |stats| {
            if stats.evaluated == cancel_at {
                token.cancel();
            }
        });
        let outcome = first.run().unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.stats().evaluated, cancel_at);
        drop(first);

        let mut resumed = runner(&paths, generator, 1);
        resumed.resume().unwrap();
        let outcome = resumed.run().unwrap();
        assert!(!outcome.is_cancelled());
        (outcome.stats().clone(), expected.stats().clone())
    }

    #[test]
    fn test_exhaustive_cancel_resume_matches_uninterrupted() {
        let mut generator = random_config(0, 3.0, 3.5);
        generator.strategy = Strategy::Exhaustive;
        generator.constraints.include_cards = vec![
            "Hog Rider".into(),
            "Zap".into(),
            "Fireball".into(),
            "Cannon".into(),
        ];

        let (resumed, expected) = interrupted_and_reference(&generator, 50);
        assert_eq!(resumed.total, expected.total);
        assert_eq!(resumed.evaluated, expected.evaluated);
        assert_eq!(resumed.stored, expected.stored);
        assert_eq!(resumed.best_score, expected.best_score);
        assert_eq!(top(&resumed), top(&expected));
    }

    #[test]
    fn test_genetic_cancel_resume_matches_uninterrupted() {
        let mut generator = random_config(0, 2.0, 5.0);
        generator.strategy = Strategy::Genetic;
        generator.genetic.population_size = 20;
        generator.genetic.generations = 15;
        generator.genetic.use_archetypes = false;
        generator.genetic.seed = Some(5);

        let (resumed, expected) = interrupted_and_reference(&generator, 60);
        // decks already scored before the cancel are not evaluated again
        assert_eq!(resumed.evaluated, expected.evaluated);
        assert_eq!(resumed.stored, expected.stored);
        assert!((resumed.avg_score - expected.avg_score).abs() < 1e-9);
        assert_eq!(resumed.best_score, expected.best_score);
        assert_eq!(top(&resumed), top(&expected));
    }

    #[test]
    fn test_final_checkpoint_failure_marks_session_failed() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        // a directory where the checkpoint file belongs makes every write fail
        std::fs::create_dir_all(paths.checkpoint_file("TEST1")).unwrap();

        let mut runner = runner(&paths, &random_config(50, 2.0, 5.0), 1);
        runner.cancel_token().cancel();
        let result = runner.run();
        assert!(matches!(
            result,
            Err(DiscoveryError::CheckpointWrite { attempts: 2, .. })
        ));
        assert_eq!(runner.state(), SessionState::Failed);
    }

    #[test]
    fn test_parallel_workers_match_sequential_stats() {
        let generator = random_config(400, 2.5, 4.5);

        let sequential_dir = tempdir().unwrap();
        let sequential = runner(&SessionPaths::new(sequential_dir.path()), &generator, 1)
            .run()
            .unwrap();
        let parallel_dir = tempdir().unwrap();
        let parallel = runner(&SessionPaths::new(parallel_dir.path()), &generator, 4)
            .run()
            .unwrap();

        let (a, b) = (sequential.stats(), parallel.stats());
        assert_eq!(a.evaluated, b.evaluated);
        assert_eq!(a.stored, b.stored);
        assert_eq!(a.best_score, b.best_score);
        assert_eq!(a.best_deck, b.best_deck);
        assert!((a.avg_score - b.avg_score).abs() < 1e-9);
        assert_eq!(top(a), top(b));
    }

    #[test]
    fn test_resume_without_checkpoint() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let mut runner = runner(&paths, &random_config(10, 2.0, 5.0), 1);
        assert!(matches!(runner.resume(), Err(DiscoveryError::NoCheckpoint(_))));
    }

    #[test]
    fn test_resume_rejects_changed_pool() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let generator = random_config(50, 2.0, 5.0);
        let first = runner(&paths, &generator, 1);
        first.save_checkpoint().unwrap();

        let narrower = random_config(50, 2.5, 4.0);
        let mut second = runner(&paths, &narrower, 1);
        assert!(matches!(
            second.resume(),
            Err(DiscoveryError::InvalidCheckpoint { .. })
        ));

        std::fs::write(paths.checkpoint_file("TEST1"), "garbage").unwrap();
        let mut third = runner(&paths, &generator, 1);
        assert!(matches!(
            third.resume(),
            Err(DiscoveryError::InvalidCheckpoint { .. })
        ));
    }

    #[test]
    fn test_store_deduplicates_across_sessions() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let generator = random_config(40, 2.0, 5.0);

        let first = runner(&paths, &generator, 1).run().unwrap();
        let second = runner(&paths, &generator, 1).run().unwrap();
        assert_eq!(second.stats().evaluated, first.stats().evaluated);
        // same seed, same decks: everything already stored
        assert_eq!(second.stats().stored, 0);
    }

    #[test]
    fn test_max_evaluations_and_target_score() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let generator = random_config(1000, 2.0, 5.0);
        let pool = sample_pool(generator.constraints.clone());

        let config = RunnerConfig {
            max_evaluations: Some(25),
            ..runner_config(1)
        };
        let mut limited =
            DiscoveryRunner::open(config, &generator, pool.clone(), score_by_cost, &paths).unwrap();
        let outcome = limited.run().unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Completed {
                reason: CompletionReason::MaxEvaluations,
                ..
            }
        ));
        assert_eq!(outcome.stats().evaluated, 25);

        let config = RunnerConfig {
            target_score: Some(0.0),
            ..runner_config(1)
        };
        let mut targeted =
            DiscoveryRunner::open(config, &generator, pool, score_by_cost, &paths).unwrap();
        let outcome = targeted.run().unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Completed {
                reason: CompletionReason::TargetScore,
                ..
            }
        ));
        assert_eq!(outcome.stats().evaluated, 1);
    }

    #[test]
    fn test_failed_evaluations_are_counted_not_stored() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let generator = random_config(60, 2.0, 5.0);
        let pool = sample_pool(generator.constraints.clone());
        let picky = |deck: &crate::schema::Deck| -> Result<ScoreResult, EvaluationError> {
            if deck.contains("Golem") {
                Err(EvaluationError::NotOwned("Golem".into()))
            } else {
                score_by_cost(deck)
            }
        };
        let mut runner =
            DiscoveryRunner::open(runner_config(2), &generator, pool, picky, &paths).unwrap();
        let stats = runner.run().unwrap().stats().clone();
        assert!(stats.failed > 0);
        assert_eq!(stats.stored, runner.store().count().unwrap());
        assert!(runner.store().query(&QueryFilter {
            require_all: vec!["Golem".into()],
            ..Default::default()
        })
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_genetic_strategy_through_runner() {
        let dir = tempdir().unwrap();
        let paths = SessionPaths::new(dir.path());
        let mut generator = random_config(0, 2.0, 5.0);
        generator.strategy = Strategy::Genetic;
        generator.genetic.population_size = 12;
        generator.genetic.generations = 3;
        generator.genetic.seed = Some(5);

        let mut runner = runner(&paths, &generator, 1);
        let outcome = runner.run().unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Completed {
                reason: CompletionReason::Exhausted,
                ..
            }
        ));
        assert!(outcome.stats().evaluated >= 12);
        assert_eq!(outcome.stats().total, None);
    }

    #[test]
    fn test_status_summary() {
        let mut stats = DiscoveryStats::new(Strategy::Smart, "ABC");
        stats.total = Some(200);
        stats.record(7.5, &["a".to_string()], 5);
        let text = status_summary(&stats);
        assert!(text.starts_with("Discovery Status for ABC\n"));
        assert!(text.contains("Strategy: smart"));
        assert!(text.contains("Progress: 1 decks evaluated / 200 total (0.5%)"));
        assert!(text.contains("Best Deck: 7.50 - a"));
    }
}
