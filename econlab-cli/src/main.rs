//! econlab CLI: load datasets through the cache and inspect cache state.
//!
//! Commands:
//! - `load` loads named datasets in parallel, refreshing stale caches
//! - `cache status` reports what the cache holds per dataset

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use econlab_core::{CacheStore, CsvRetriever, ParquetStore, Registry, SqliteStore};
use econlab_runner::{
    default_cache_dir, load_parallel, BatchLoad, ExecutionStrategy, LoadFlags, LoadProgress,
    ParallelOptions, ReconcileConfig, Reconciler, TracingProgress,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "econlab", about = "econlab CLI: cached economic indicator datasets")]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Parquet,
    Sqlite,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Threads,
    Pool,
}

#[derive(clap::Args)]
struct StoreArgs {
    /// Dataset registry TOML.
    #[arg(long)]
    registry: PathBuf,

    /// Cache directory. Defaults to $ECONLAB_DATA_DIR, then the user cache dir.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Cache backend.
    #[arg(long, value_enum, default_value_t = Backend::Parquet)]
    backend: Backend,
}

#[derive(Subcommand)]
enum Commands {
    /// Load datasets, refreshing stale caches from raw CSV files.
    Load {
        /// Dataset names (e.g., cpi nxr wages).
        #[arg(required = true)]
        names: Vec<String>,

        #[command(flatten)]
        store: StoreArgs,

        /// Directory holding one `<name>.csv` per dataset.
        #[arg(long, default_value = "raw")]
        raw_dir: PathBuf,

        /// Reconciliation settings TOML (similarity, retry, staleness).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fetch without reading or writing the cache.
        #[arg(long, default_value_t = false)]
        skip_cache: bool,

        /// Return stale caches without fetching.
        #[arg(long, default_value_t = false)]
        skip_update: bool,

        /// Write updates even when they fail the similarity check.
        #[arg(long, default_value_t = false)]
        force_overwrite: bool,

        /// Apply each dataset's registered transform chain.
        #[arg(long, default_value_t = false)]
        transform: bool,

        /// Execution strategy.
        #[arg(long, value_enum, default_value_t = Strategy::Threads)]
        strategy: Strategy,

        /// Pool size for `--strategy pool`. Defaults to the number of cores.
        #[arg(long)]
        workers: Option<usize>,

        /// Abandon loads still running after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Exit with an error if any dataset fails.
        #[arg(long, default_value_t = false)]
        fail_fast: bool,

        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report rows, period range and staleness per dataset.
    Status {
        /// Dataset names. Defaults to every registered dataset.
        names: Vec<String>,

        #[command(flatten)]
        store: StoreArgs,

        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Load {
            names,
            store,
            raw_dir,
            config,
            skip_cache,
            skip_update,
            force_overwrite,
            transform,
            strategy,
            workers,
            deadline_secs,
            fail_fast,
            json,
        } => {
            let strategy = match strategy {
                Strategy::Threads => {
                    if workers.is_some() {
                        bail!("--workers only applies to --strategy pool");
                    }
                    ExecutionStrategy::Threads
                }
                Strategy::Pool => ExecutionStrategy::Pool { workers },
            };
            let opts = ParallelOptions {
                strategy,
                flags: LoadFlags {
                    skip_cache,
                    skip_update,
                    force_overwrite,
                },
                fail_on_error: fail_fast,
                deadline: deadline_secs.map(Duration::from_secs),
                transform,
            };
            run_load(&names, &store, &raw_dir, config.as_deref(), &opts, json)
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { names, store, json } => run_cache_status(&names, &store, json),
        },
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("econlab=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("econlab=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

fn open_store(args: &StoreArgs) -> Result<(Arc<dyn CacheStore>, PathBuf)> {
    let dir = args.cache_dir.clone().unwrap_or_else(default_cache_dir);
    let store: Arc<dyn CacheStore> = match args.backend {
        Backend::Parquet => Arc::new(ParquetStore::new(&dir)),
        Backend::Sqlite => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating cache directory {}", dir.display()))?;
            let path = dir.join("econlab.sqlite");
            Arc::new(
                SqliteStore::open(&path)
                    .with_context(|| format!("opening {}", path.display()))?,
            )
        }
    };
    Ok((store, dir))
}

fn build_reconciler(
    args: &StoreArgs,
    raw_dir: &Path,
    config: Option<&Path>,
) -> Result<Arc<Reconciler>> {
    let registry = Registry::from_path(&args.registry)
        .with_context(|| format!("reading registry {}", args.registry.display()))?;
    let config = match config {
        Some(path) => ReconcileConfig::from_path(path)?,
        None => ReconcileConfig::default(),
    };
    let (store, dir) = open_store(args)?;
    tracing::info!(cache = %dir.display(), location = %store.location(), "cache opened");
    let retriever = Arc::new(CsvRetriever::new(raw_dir));
    Ok(Arc::new(Reconciler::new(
        Arc::new(registry),
        store,
        retriever,
        config,
    )))
}

fn run_load(
    names: &[String],
    store: &StoreArgs,
    raw_dir: &Path,
    config: Option<&Path>,
    opts: &ParallelOptions,
    json: bool,
) -> Result<()> {
    let reconciler = build_reconciler(store, raw_dir, config)?;
    let progress: &dyn LoadProgress = &TracingProgress;
    let batch = load_parallel(&reconciler, names, opts, Some(progress))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&batch_json(&batch))?);
    } else {
        print_batch(&batch);
    }

    if batch.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn batch_json(batch: &BatchLoad) -> serde_json::Value {
    let items: Vec<serde_json::Value> = batch
        .results
        .iter()
        .map(|(name, result)| match result {
            Ok(outcome) => serde_json::json!({
                "name": name,
                "state": outcome.state,
                "transitions": outcome.transitions,
                "rows": outcome.dataset.len(),
                "start": outcome.dataset.first_period(),
                "end": outcome.dataset.last_period(),
                "written": outcome.written,
                "warnings": outcome.warnings,
                "metadata": outcome.dataset.metadata(),
            }),
            Err(e) => serde_json::json!({ "name": name, "error": e.to_string() }),
        })
        .collect();
    serde_json::Value::Array(items)
}

fn print_batch(batch: &BatchLoad) {
    println!(
        "{:<16} {:<12} {:>6} {:<23} {}",
        "Dataset", "State", "Rows", "Periods", "Notes"
    );
    println!("{}", "-".repeat(72));
    for (name, result) in &batch.results {
        match result {
            Ok(outcome) => {
                let ds = &outcome.dataset;
                let periods = match (ds.first_period(), ds.last_period()) {
                    (Some(a), Some(b)) => format!("{a} to {b}"),
                    _ => "(empty)".into(),
                };
                println!(
                    "{:<16} {:<12} {:>6} {:<23} {}",
                    name,
                    outcome.state.to_string(),
                    ds.len(),
                    periods,
                    outcome.warnings.join("; ")
                );
            }
            Err(e) => println!("{:<16} {:<12} {:>6} {:<23} {}", name, "FAILED", "-", "-", e),
        }
    }
    println!();
    println!(
        "{} loaded, {} failed",
        batch.results.len() - batch.failed(),
        batch.failed()
    );
}

fn run_cache_status(names: &[String], store: &StoreArgs, json: bool) -> Result<()> {
    let registry = Registry::from_path(&store.registry)
        .with_context(|| format!("reading registry {}", store.registry.display()))?;
    for name in names {
        if !registry.contains(name) {
            bail!("unknown dataset '{name}'");
        }
    }
    let (cache, dir) = open_store(store)?;
    // Status never fetches, so the retriever is never called.
    let reconciler = Reconciler::new(
        Arc::new(registry),
        cache,
        Arc::new(CsvRetriever::new(&dir)),
        ReconcileConfig::default(),
    );
    let statuses = reconciler.cache_status(names);

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("Cache: {}", dir.display());
    println!();
    println!(
        "{:<16} {:>6} {:<25} {:<20} {:<6}",
        "Dataset", "Rows", "Periods", "Written", "Stale"
    );
    println!("{}", "-".repeat(77));
    for s in &statuses {
        if let Some(err) = &s.error {
            println!("{:<16} {:>6} {}", s.name, "-", err);
            continue;
        }
        if !s.cached {
            println!("{:<16} {:>6} {:<25}", s.name, "-", "(not cached)");
            continue;
        }
        let periods = match (s.start, s.end) {
            (Some(a), Some(b)) => format!("{a} to {b}"),
            _ => "(empty)".into(),
        };
        let written = s
            .written_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let stale = match s.stale {
            Some(true) => "yes",
            Some(false) => "no",
            None => "?",
        };
        println!(
            "{:<16} {:>6} {:<25} {:<20} {:<6}",
            s.name,
            s.rows.unwrap_or(0),
            periods,
            written,
            stale
        );
    }
    Ok(())
}
