//! Benchmarks for deck generation and genetic search.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use deck_discovery::{
    evaluate::{Evaluator, HeuristicEvaluator},
    generator::{build_generator, decks},
    genetic::GeneticEngine,
    schema::{
        CandidatePool, CardCandidate, CardRole, GeneratorConfig, GeneratorConstraints,
        GeneticConfig, Strategy,
    },
};

fn pool() -> Arc<CandidatePool> {
    use CardRole::*;
    let cards: Vec<CardCandidate> = [
        ("Hog Rider", 4, WinCondition),
        ("Golem", 8, WinCondition),
        ("Royal Giant", 6, WinCondition),
        ("Miner", 3, WinCondition),
        ("Balloon", 5, WinCondition),
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
        ("Electro Wizard", 4, Support),
        ("Skeletons", 1, Cycle),
        ("Ice Spirit", 1, Cycle),
        ("Bats", 2, Cycle),
        ("Ice Golem", 2, Cycle),
    ]
    .into_iter()
    .map(|(name, elixir, role)| CardCandidate::new(name, elixir, role))
    .collect();

    Arc::new(CandidatePool::new(cards, GeneratorConstraints::default()).unwrap())
}

fn bench_genetic_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("genetic_run");
    group.sample_size(10);

    let pool = pool();
    let evaluator = HeuristicEvaluator::default();

    for population in [50, 100, 200] {
        let config = GeneticConfig {
            population_size: population,
            generations: 5,
            convergence_generations: 0,
            parallel_evaluations: false,
            seed: Some(42),
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("pop_{}", population)),
            &population,
            |b, _| {
                b.iter(|| {
                    let mut engine = GeneticEngine::new(config.clone(), pool.clone());
                    black_box(engine.run(&evaluator).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampling");

    let pool = pool();
    let evaluator = HeuristicEvaluator::default();

    for strategy in [Strategy::Random, Strategy::Smart, Strategy::Archetype] {
        let config = GeneratorConfig {
            strategy,
            sample_size: 1000,
            seed: Some(7),
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(strategy.as_str()),
            &strategy,
            |b, _| {
                b.iter(|| {
                    let mut generator = build_generator(&config, pool.clone()).unwrap();
                    let total: f64 = decks(generator.as_mut())
                        .filter_map(|deck| evaluator.evaluate(&deck).ok())
                        .map(|score| score.overall)
                        .sum();
                    black_box(total);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_genetic_run, bench_sampling);
criterion_main!(benches);
