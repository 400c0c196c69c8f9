//! plugin-sim
//!
//! Drives the orchestrator with synthetic plugins and manages stored
//! learning snapshots.
//!
//! Run with: cargo run -- --simulate 500 --seed=7 --save=baseline

use adaptive_orchestrator::{
    config::EngineConfig,
    learning::{LearningEngine, LearningSnapshot},
    simulation::{Simulation, SimulationConfig, SimulationResults},
    store::SnapshotStore,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: plugin-sim <command> [options]

Commands:
  --simulate [rounds] [--seed=N] [--config=PATH] [--scenario=PATH] [--save=NAME] [--json]
  --snapshots                         List stored learning snapshots
  --show <name> [--domain=D] [--bucket=N] [--limit=N]
  --export <name> <path>              Write a stored snapshot to a JSON file
  --import <path> <name>              Validate a JSON snapshot and store it
  --delete <name>
  --print-config                      Print the default engine configuration
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print!("{}", USAGE);
        return Ok(());
    };

    match command.as_str() {
        "--simulate" => run_simulate(&args[2..]).await,
        "--snapshots" => run_list(),
        "--show" => {
            let name = positional(&args, 2, "--show <name>")?;
            run_show(name, &args[3..])
        }
        "--export" => {
            let name = positional(&args, 2, "--export <name> <path>")?;
            let path = positional(&args, 3, "--export <name> <path>")?;
            run_export(name, Path::new(path))
        }
        "--import" => {
            let path = positional(&args, 2, "--import <path> <name>")?;
            let name = positional(&args, 3, "--import <path> <name>")?;
            run_import(Path::new(path), name)
        }
        "--delete" => {
            let name = positional(&args, 2, "--delete <name>")?;
            let mut store = open_store()?;
            if store.delete(name)? {
                println!("Deleted snapshot '{}'", name);
            } else {
                println!("No snapshot named '{}'", name);
            }
            Ok(())
        }
        "--print-config" => {
            println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
            Ok(())
        }
        _ => {
            print!("{}", USAGE);
            Ok(())
        }
    }
}

async fn run_simulate(args: &[String]) -> Result<()> {
    let engine = match flag(args, "--config=") {
        Some(path) => EngineConfig::from_file(Path::new(path))?,
        None => EngineConfig::default(),
    };
    let mut scenario = match flag(args, "--scenario=") {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read scenario {}", path))?;
            serde_json::from_str::<SimulationConfig>(&raw)
                .with_context(|| format!("Failed to parse scenario {}", path))?
        }
        None => SimulationConfig::default(),
    };
    if let Some(rounds) = args.first().filter(|a| !a.starts_with("--")) {
        scenario.rounds = rounds
            .parse()
            .with_context(|| format!("Invalid round count '{}'", rounds))?;
    }
    if let Some(seed) = flag(args, "--seed=") {
        scenario.seed = Some(seed.parse().with_context(|| format!("Invalid seed '{}'", seed))?);
    }

    let simulation = Simulation::new(&engine, scenario)?;
    let results = simulation.run().await?;

    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results);
    }

    if let Some(name) = flag(args, "--save=") {
        let snapshot = simulation.orchestrator().learning().export();
        open_store()?.save(name, &snapshot)?;
        println!("\nSaved learning snapshot '{}'", name);
    }
    Ok(())
}

fn print_results(results: &SimulationResults) {
    println!("\nSIMULATION RESULTS ({} rounds)\n", results.rounds);
    println!(
        "Mean impact: {:.3}  (95% CI {:.3} - {:.3})",
        results.mean_impact, results.confidence_interval_95.0, results.confidence_interval_95.1
    );
    println!(
        "Outcomes: {:.1}% success, {:.1}% partial, {:.1}% failure",
        results.outcomes.success_rate * 100.0,
        results.outcomes.partial_rate * 100.0,
        results.outcomes.failure_rate * 100.0
    );
    println!("Plugin failures: {}", results.plugin_failures);
    println!();

    println!("Admission rates:");
    for (plugin_id, rate) in &results.admission_rates {
        let bar = "#".repeat((rate * 20.0).round() as usize);
        println!("  {:<20} {:>5.1}% {}", plugin_id, rate * 100.0, bar);
    }
    println!("  variance: {:.4}", results.admission_variance);
    println!();

    println!("Top learned scores:");
    for score in &results.top_scores {
        println!(
            "  {:<20} {:<14} bucket {:>2}  {:.3} ({} obs)",
            score.key.plugin_id, score.key.domain, score.key.bucket, score.score, score.observations
        );
    }
}

fn run_list() -> Result<()> {
    let snapshots = open_store()?.list()?;
    if snapshots.is_empty() {
        println!("No stored snapshots");
        return Ok(());
    }
    for info in snapshots {
        println!(
            "{:<20} v{}  {} scores  {} outcomes  saved {}",
            info.name,
            info.version,
            info.scores_tracked,
            info.outcomes_recorded,
            info.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn run_show(name: &str, args: &[String]) -> Result<()> {
    let store = open_store()?;
    let domain = flag(args, "--domain=").unwrap_or(adaptive_orchestrator::types::GENERAL_DOMAIN);
    let bucket: i64 = flag(args, "--bucket=")
        .map(|b| b.parse().with_context(|| format!("Invalid bucket '{}'", b)))
        .transpose()?
        .unwrap_or(5);
    let limit: usize = flag(args, "--limit=")
        .map(|l| l.parse().with_context(|| format!("Invalid limit '{}'", l)))
        .transpose()?
        .unwrap_or(10);

    let scores = store.top_scores(name, domain, bucket, limit)?;
    if scores.is_empty() {
        println!("No scores for {} / bucket {} in '{}'", domain, bucket, name);
    }
    for score in scores {
        println!("  {:<20} {:.3} ({} obs)", score.plugin_id, score.score, score.observations);
    }
    Ok(())
}

fn run_export(name: &str, path: &Path) -> Result<()> {
    let snapshot = open_store()?
        .load(name)?
        .with_context(|| format!("No snapshot named '{}'", name))?;
    std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)
        .with_context(|| format!("Failed to write {:?}", path))?;
    println!("Exported '{}' to {:?}", name, path);
    Ok(())
}

fn run_import(path: &Path, name: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let snapshot: LearningSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))?;

    // Round-trip through an engine so invalid snapshots never reach the store
    let config = EngineConfig::default();
    let engine = LearningEngine::new(config.learning, config.caps)?;
    engine.import(snapshot.clone())?;

    open_store()?.save(name, &snapshot)?;
    println!("Imported {:?} as '{}'", path, name);
    Ok(())
}

fn positional<'a>(args: &'a [String], index: usize, usage: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("Usage: {}", usage))
}

fn flag<'a>(args: &'a [String], prefix: &str) -> Option<&'a str> {
    args.iter().find_map(|a| a.strip_prefix(prefix))
}

fn open_store() -> Result<SnapshotStore> {
    let data_dir = get_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", data_dir))?;
    SnapshotStore::open(&data_dir.join("learning.db"))
}

fn get_data_dir() -> PathBuf {
    // XDG data dir on Linux, ~/Library/Application Support on macOS
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adaptive-orchestrator")
}
