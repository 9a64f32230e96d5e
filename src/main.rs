use anyhow::{bail, Context, Result};
use std::env;

use card_reconciliation::config::resolve_config_path;
use card_reconciliation::logging::configure_logging;
use card_reconciliation::pipeline;
use card_reconciliation::{dedupe_repository, RunConfig, SqliteRepository};

const USAGE: &str = "usage: card-recon [run|dedupe] [config.toml]";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let (command, config_arg) = match args.get(1).map(String::as_str) {
        None => ("run", None),
        Some("run") | Some("dedupe") => (args[1].as_str(), args.get(2).map(String::as_str)),
        Some("-h") | Some("--help") => {
            println!("{}", USAGE);
            return Ok(());
        }
        // A bare path means `run <path>`
        Some(path) if path.ends_with(".toml") => ("run", Some(path)),
        Some(other) => bail!("unknown command '{}'\n{}", other, USAGE),
    };

    let config_path = resolve_config_path(config_arg);
    let config = RunConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    configure_logging(&config.log_filter);

    match command {
        "dedupe" => run_dedupe(&config),
        _ => run_pipeline(&config).await,
    }
}

async fn run_pipeline(config: &RunConfig) -> Result<()> {
    eprintln!("💳 Card Reconciliation - {} sources", config.sources.len());
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = pipeline::run(config).await?;

    for source in &report.sources {
        match &source.error {
            None => eprintln!("✓ {}: {} candidates", source.source_id, source.candidates),
            Some(e) => eprintln!("⚠️  {}: {}", source.source_id, e),
        }
    }
    eprintln!("\n🔀 {}", report.merge.summary());
    eprintln!(
        "🔍 {} aggregates → {} survivors ({} removals)",
        report.aggregates,
        report.survivors.len(),
        report.directives.len()
    );
    eprintln!("✅ {}", report.verification.summary());
    eprintln!(
        "💾 {} persisted, {} below confidence floor, {} superseded rows removed",
        report.persisted,
        report.skipped_low_confidence.len(),
        report.removals_applied
    );

    // stdout carries only the machine-readable report
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_dedupe(config: &RunConfig) -> Result<()> {
    eprintln!("🔍 Deduplicating {}", config.database_path.display());

    let mut repo = SqliteRepository::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let report = dedupe_repository(&mut repo)?;

    for directive in &report.directives {
        eprintln!("  🗑️  {}", directive.reason());
    }
    eprintln!("✓ {}", report.summary());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
