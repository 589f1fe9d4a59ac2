//! Deck Discovery CLI - Run, resume and inspect discovery sessions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use deck_discovery::{
    discovery::{
        CheckpointStore, DiscoveryRunner, SessionLock, SessionOutcome, SessionPaths,
        active_session, install_signal_handlers, sanitize_tag, status_summary, stop_session,
    },
    evaluate::HeuristicEvaluator,
    schema::{
        CandidatePool, CardCandidate, CardRole, GeneratorConfig, RunnerConfig, SessionConfig,
        Strategy,
    },
    store::ResultStore,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 3 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let command = args[1].as_str();
    let config_path = PathBuf::from(&args[2]);
    let session = load_session(&config_path);
    let tag = sanitize_tag(&session.runner.tag).unwrap_or_else(|e| fail(e));
    let paths = SessionPaths::from_config(session.base_dir.as_deref());

    match command {
        "run" => run_session(session, &config_path, &paths, &tag, false),
        "resume" => run_session(session, &config_path, &paths, &tag, true),
        "status" => print_status(&paths, &tag),
        "stop" => match stop_session(&paths, &tag) {
            Ok(pid) => println!("Stop requested for {} (pid {})", tag, pid),
            Err(e) => fail(e),
        },
        "top" => {
            let n: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10);
            print_top(&paths, &tag, n);
        }
        "export" => {
            let Some(out) = args.get(3) else {
                print_usage(&args[0]);
                std::process::exit(1);
            };
            let store = open_store(&paths, &tag);
            match store.export_to(out) {
                Ok(n) => println!("Exported {} decks to {}", n, out),
                Err(e) => fail(e),
            }
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <command> <session.json> [args]", program);
    eprintln!();
    eprintln!("Search for strong decks and keep every result in a per-tag store.");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run <session.json>           Start a fresh session");
    eprintln!("  resume <session.json>        Continue from the last checkpoint");
    eprintln!("  status <session.json>        Show checkpoint and store status");
    eprintln!("  stop <session.json>          Ask a running session to stop");
    eprintln!("  top <session.json> [n]       Print the n best stored decks (default: 10)");
    eprintln!("  export <session.json> <out>  Export the store to JSON");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", e);
    std::process::exit(1);
}

fn load_session(path: &Path) -> SessionConfig {
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading session config: {}", e);
        std::process::exit(1);
    });
    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing session config: {}", e);
        std::process::exit(1);
    })
}

/// Cards are resolved relative to the session config.
fn load_cards(config_path: &Path, cards_file: &Path) -> Vec<CardCandidate> {
    let path = match config_path.parent() {
        Some(dir) if cards_file.is_relative() => dir.join(cards_file),
        _ => cards_file.to_path_buf(),
    };
    let content = fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("Error reading cards file {}: {}", path.display(), e);
        std::process::exit(1);
    });
    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing cards: {}", e);
        std::process::exit(1);
    })
}

fn open_store(paths: &SessionPaths, tag: &str) -> ResultStore {
    ResultStore::open(paths.store_file(tag), tag).unwrap_or_else(|e| fail(e))
}

fn run_session(
    session: SessionConfig,
    config_path: &Path,
    paths: &SessionPaths,
    tag: &str,
    resume: bool,
) {
    let cards = load_cards(config_path, &session.cards_file);
    let pool = CandidatePool::new(cards, session.generator.constraints.clone())
        .map(Arc::new)
        .unwrap_or_else(|e| fail(e));

    let _lock = SessionLock::acquire(paths, tag).unwrap_or_else(|e| fail(e));

    let mut runner = DiscoveryRunner::open(
        session.runner.clone(),
        &session.generator,
        pool,
        HeuristicEvaluator::default(),
        paths,
    )
    .unwrap_or_else(|e| fail(e))
    .with_cancel_token(install_signal_handlers());

    if resume {
        runner.resume().unwrap_or_else(|e| fail(e));
    } else if runner.has_checkpoint() {
        log::warn!("Discarding existing checkpoint for {}", tag);
        runner.clear_checkpoint().unwrap_or_else(|e| fail(e));
    }

    println!("Deck Discovery");
    println!("==============");
    println!("Tag: {}", tag);
    println!("Strategy: {}", session.generator.strategy);
    println!("Workers: {}", session.runner.workers);
    println!("Store: {}", paths.store_file(tag).display());
    println!();

    let outcome = runner.run().unwrap_or_else(|e| fail(e));
    match &outcome {
        SessionOutcome::Completed { reason, .. } => println!("Session complete: {:?}", reason),
        SessionOutcome::Cancelled(_) => {
            println!("Session cancelled; continue with: resume {}", config_path.display())
        }
    }
    println!();
    print!("{}", status_summary(outcome.stats()));
}

fn print_status(paths: &SessionPaths, tag: &str) {
    match active_session(paths, tag) {
        Some(pid) => println!("Session {} is running (pid {})", tag, pid),
        None => println!("Session {} is not running", tag),
    }

    let checkpoints = CheckpointStore::new(paths.checkpoint_file(tag));
    if checkpoints.exists() {
        match checkpoints.load() {
            Ok(checkpoint) => {
                println!("Checkpoint from {}", checkpoint.timestamp.to_rfc3339());
                print!("{}", status_summary(&checkpoint.stats));
            }
            Err(e) => println!("Checkpoint unreadable: {}", e),
        }
    } else {
        println!("No checkpoint");
    }

    if paths.store_file(tag).exists() {
        let store = open_store(paths, tag);
        match store.summary() {
            Ok(summary) => {
                println!();
                println!("Store: {} decks", summary.total_entries);
                println!("  Top score: {:.2}", summary.top_score);
                println!("  Average score: {:.2}", summary.avg_score);
            }
            Err(e) => fail(e),
        }
    }
}

fn print_top(paths: &SessionPaths, tag: &str, n: usize) {
    let store = open_store(paths, tag);
    let entries = store.top_n(n).unwrap_or_else(|e| fail(e));
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. {:.2} [{}] {}",
            i + 1,
            entry.score.overall,
            entry.score.archetype,
            entry.cards.join(", ")
        );
    }
}

fn print_example_config() {
    let session = SessionConfig {
        runner: RunnerConfig::new("ABC123"),
        generator: GeneratorConfig {
            strategy: Strategy::Smart,
            sample_size: 10_000,
            ..Default::default()
        },
        cards_file: PathBuf::from("cards.json"),
        base_dir: None,
    };
    let cards = vec![
        CardCandidate::new("Hog Rider", 4, CardRole::WinCondition),
        CardCandidate::new("Cannon", 3, CardRole::Building),
        CardCandidate::new("Fireball", 4, CardRole::BigSpell),
        CardCandidate::new("The Log", 2, CardRole::SmallSpell),
        CardCandidate::new("Musketeer", 4, CardRole::Support),
        CardCandidate::new("Ice Spirit", 1, CardRole::Cycle),
    ];

    match (
        serde_json::to_string_pretty(&session),
        serde_json::to_string_pretty(&cards),
    ) {
        (Ok(session), Ok(cards)) => {
            println!("Example configuration (session.json):");
            println!("{}", session);
            println!();
            println!("Example cards (cards.json):");
            println!("{}", cards);
        }
        (Err(e), _) | (_, Err(e)) => fail(e),
    }
}
