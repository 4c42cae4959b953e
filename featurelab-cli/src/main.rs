//! FeatureLab CLI — incremental feature ETL commands.
//!
//! Commands:
//! - `run` — register the symbols in a list file, then one incremental ETL pass
//! - `add` — register symbols without processing them
//! - `status` — per-symbol checkpoints, stored rows and recent runs
//! - `features` — the expanded feature instances and the lookback window
//! - `universe` — write the default core symbol list

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use featurelab_core::checkpoint::CheckpointStore;
use featurelab_core::data::{StoreHandle, Universe};
use featurelab_core::domain::time::{format_timestamp, parse_timestamp};
use featurelab_core::features::{Category, FeatureEngine, FeatureRegistry};
use featurelab_runner::{EtlConfig, Orchestrator, Outcome, RunReport, SYMBOL_LIBRARY};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "featurelab",
    about = "FeatureLab — incremental feature engineering over minute bars"
)]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the listed symbols and run one incremental ETL pass.
    Run {
        /// Path to the ETL TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Symbol list, one per line.
        #[arg(long)]
        symbols_file: PathBuf,

        /// Run end ("YYYY-MM-DD HH:MM:SS", UTC). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Override the configured worker count.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Register symbols in the checkpoint file.
    Add {
        #[arg(long)]
        config: PathBuf,

        #[arg(required = true)]
        symbols: Vec<String>,
    },
    /// Show checkpoints, stored rows and recent runs.
    Status {
        #[arg(long)]
        config: PathBuf,

        /// Number of recent runs to show.
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    /// List the expanded feature instances.
    Features {
        #[arg(long)]
        config: PathBuf,
    },
    /// Write the default core symbol list.
    Universe {
        #[arg(long)]
        output: PathBuf,

        /// Only this group (forex, indices, commodities, crypto, stocks, bonds, misc).
        #[arg(long)]
        group: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            symbols_file,
            end,
            workers,
        } => run_etl(&config, &symbols_file, end.as_deref(), workers),
        Commands::Add { config, symbols } => run_add(&config, &symbols),
        Commands::Status { config, runs } => run_status(&config, runs),
        Commands::Features { config } => run_features(&config),
        Commands::Universe { output, group } => run_universe(&output, group.as_deref()),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("featurelab=debug,featurelab_core=debug,featurelab_runner=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("featurelab=info,featurelab_core=info,featurelab_runner=info")
        })
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<EtlConfig> {
    EtlConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn run_etl(
    config_path: &Path,
    symbols_file: &Path,
    end: Option<&str>,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(n) = workers {
        config.etl.workers = n;
        config.validate()?;
    }
    let end: DateTime<Utc> = match end {
        Some(raw) => parse_timestamp(raw).with_context(|| format!("bad --end '{raw}'"))?,
        None => Utc::now(),
    };

    let universe = Universe::from_file(symbols_file)?;
    if universe.is_empty() {
        bail!("no symbols in {}", symbols_file.display());
    }

    let mut orchestrator = Orchestrator::from_config(&config)?;
    let added = orchestrator.add_symbols(universe.symbols())?;
    if !added.added.is_empty() {
        println!("Registered {} new symbol(s)", added.added.len());
    }
    if !added.not_found.is_empty() {
        println!("Unknown at source: {}", added.not_found.join(", "));
    }

    let report = orchestrator.run(universe.symbols(), end)?;
    print_run_summary(&report);
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    println!();
    println!("Run at {}", format_timestamp(&report.record.timestamp));
    println!("{:<12} {:<10} {:>8} {:>20}", "Symbol", "Result", "Rows", "Last");
    println!("{}", "-".repeat(53));
    for r in &report.reports {
        let (result, rows, last) = match &r.result {
            Ok(Outcome::Persisted {
                rows,
                last_timestamp,
            }) => ("persisted", rows.to_string(), format_timestamp(last_timestamp)),
            Ok(Outcome::NoNewData) => ("no data", "-".into(), "-".into()),
            Err(_) => ("FAILED", "-".into(), "-".into()),
        };
        println!("{:<12} {:<10} {:>8} {:>20}", r.symbol, result, rows, last);
    }
    for r in report.failed() {
        if let Err(e) = &r.result {
            println!("  {} after {} attempt(s): {e}", r.symbol, r.attempts);
        }
    }
    if !report.skipped.is_empty() {
        println!("Skipped (not registered): {}", report.skipped.join(", "));
    }
    println!(
        "Processed {} of {} symbol(s)",
        report.processed().len(),
        report.reports.len()
    );
}

fn run_add(config_path: &Path, symbols: &[String]) -> Result<()> {
    let config = load_config(config_path)?;
    let mut orchestrator = Orchestrator::from_config(&config)?;
    let summary = orchestrator.add_symbols(symbols)?;
    for s in &summary.added {
        println!("added     {s}");
    }
    for s in &summary.already_registered {
        println!("present   {s}");
    }
    for s in &summary.not_found {
        println!("not found {s}");
    }
    for s in &summary.failed {
        println!("failed    {s}");
    }
    Ok(())
}

fn run_status(config_path: &Path, recent_runs: usize) -> Result<()> {
    let config = load_config(config_path)?;
    let checkpoints = CheckpointStore::load(&config.etl.metadata_path)?;
    let store = StoreHandle::open(&config.etl.store_root)?.library(SYMBOL_LIBRARY);

    println!("Checkpoint: {}", checkpoints.path().display());
    println!("Store: {}", store.dir().display());
    println!();
    println!(
        "{:<12} {:<20} {:>10} {:>8}  {}",
        "Symbol", "Last", "Rows", "Chunks", "Description"
    );
    println!("{}", "-".repeat(72));
    for (symbol, checkpoint) in checkpoints.symbols() {
        let last = checkpoint
            .last_timestamp
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "-".into());
        let (rows, chunks) = match store.meta(symbol) {
            Ok(Some(meta)) => (meta.rows(), meta.chunks.len()),
            Ok(None) => (0, 0),
            Err(e) => {
                warn!(symbol, error = %e, "cannot read stored series metadata");
                (0, 0)
            }
        };
        println!(
            "{:<12} {:<20} {:>10} {:>8}  {}",
            symbol, last, rows, chunks, checkpoint.description
        );
    }

    let runs = checkpoints.runs();
    if !runs.is_empty() {
        println!();
        println!("Recent runs:");
        for run in runs.iter().rev().take(recent_runs) {
            println!(
                "  {}  {:?}  {} symbol(s)",
                format_timestamp(&run.timestamp),
                run.status,
                run.processed_symbols.len()
            );
        }
    }
    Ok(())
}

fn run_features(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let features = config.load_features()?;
    let engine = FeatureEngine::new(FeatureRegistry::builtin(), &features);

    println!("Max lookback: {} bars", engine.max_lookback());
    for (category, instances) in [
        (Category::SymbolSpecific, engine.symbol_instances()),
        (Category::Universal, engine.universal_instances()),
    ] {
        println!();
        println!("{category} ({}):", instances.len());
        for instance in instances {
            println!("  {}", instance.output_name);
        }
    }
    Ok(())
}

fn run_universe(output: &Path, group: Option<&str>) -> Result<()> {
    let universe = match group {
        Some(name) => match Universe::core_group(name) {
            Some(u) => u,
            None => bail!("unknown group '{name}'"),
        },
        None => Universe::core(),
    };
    universe.write_to(output)?;
    println!("Wrote {} symbols to {}", universe.len(), output.display());
    Ok(())
}
