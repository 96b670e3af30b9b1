//! Listing-Ingest main entry point
//!
//! Command-line interface for running ingestion passes and inspecting the ledger.

use anyhow::Context;
use clap::Parser;
use listing_ingest::config::{load_config_with_hash, load_selectors, Config, SelectorConfig};
use listing_ingest::http::{CacheManager, Clock, SystemClock};
use listing_ingest::output::{print_statistics, write_result, write_run_report};
use listing_ingest::{Coordinator, RunMode, StateManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Listing-Ingest: incremental ingestion of vehicle listings
///
/// Walks the listing pages of one source, extracts and validates every
/// vehicle detail page, and reports only records that are new or changed
/// since the previous run.
#[derive(Parser, Debug)]
#[command(name = "listing-ingest")]
#[command(version = "1.0.0")]
#[command(about = "Incremental vehicle listing ingestion", long_about = None)]
struct Cli {
    /// Path to TOML settings file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Selector/mapping document (overrides source.selectors-path)
    #[arg(long, value_name = "PATH")]
    selectors: Option<PathBuf>,

    /// Run mode: `full` also marks vehicles missing from the listings unavailable
    #[arg(long, default_value = "incremental")]
    mode: RunMode,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate both documents and print the effective configuration
    #[arg(long, conflicts_with_all = ["stats", "clear_cache"])]
    dry_run: bool,

    /// Show ledger statistics and recent runs, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "clear_cache"])]
    stats: bool,

    /// Remove every cached response, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    clear_cache: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;

    setup_logging(cli.verbose, cli.quiet, &config.logging.level);
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    let selectors_path = cli
        .selectors
        .clone()
        .or_else(|| config.source.selectors_path.clone());
    let selectors = load_selectors(selectors_path.as_deref())
        .context("failed to load selector document")?;

    if cli.dry_run {
        handle_dry_run(&config, &selectors, &config_hash);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.clear_cache {
        handle_clear_cache(&config);
    } else {
        handle_run(config, selectors, config_hash, cli.mode).await?;
    }

    Ok(())
}

/// Sets up the tracing subscriber from the CLI flags and the configured level
fn setup_logging(verbose: u8, quiet: bool, level: &str) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
            1 => EnvFilter::new("listing_ingest=debug,info"),
            2 => EnvFilter::new("listing_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: prints the effective configuration without any request
fn handle_dry_run(config: &Config, selectors: &SelectorConfig, config_hash: &str) {
    println!("=== Listing-Ingest Dry Run ===\n");
    println!("Config hash: {}\n", config_hash);

    println!("Source:");
    println!("  Max listing pages: {}", config.source.max_listing_pages);
    println!("  Start URLs ({}):", config.source.start_urls.len());
    for url in &config.source.start_urls {
        println!("    * {}", url);
    }

    println!("\nHTTP:");
    println!("  User agent: {}", config.http.user_agent);
    println!(
        "  Timeout: {}s (connect {}s)",
        config.http.timeout_secs, config.http.connect_timeout_secs
    );
    println!(
        "  Retries: {} (backoff factor {})",
        config.http.max_retries, config.http.backoff_factor
    );

    println!("\nRate limit:");
    println!(
        "  {} requests/minute, min delay {}ms",
        config.rate_limit.requests_per_minute, config.rate_limit.min_delay_ms
    );
    println!(
        "  Business hours {}..{} at factor {}",
        config.rate_limit.business_hours_start,
        config.rate_limit.business_hours_end,
        config.rate_limit.business_hours_factor
    );

    println!("\nWorkers:");
    println!(
        "  {} workers, queue {}, checkpoint every {} items",
        config.workers.count, config.workers.queue_size, config.workers.checkpoint_interval
    );

    println!("\nCache:");
    if config.cache.enabled {
        println!(
            "  {} (ttl {}h, {} MB, {} entries)",
            config.cache.directory.display(),
            config.cache.ttl_hours,
            config.cache.max_size_mb,
            config.cache.max_entries
        );
    } else {
        println!("  disabled");
    }

    println!("\nOutput:");
    println!("  Artifact: {}", config.output.path.display());
    println!("  Database: {}", config.output.database_path.display());
    if let Some(report) = &config.output.report_path {
        println!("  Report: {}", report.display());
    }

    println!("\nQuality:");
    println!("  Min completeness: {}", config.quality.min_completeness);
    println!("  Max failure rate: {}", config.quality.max_failure_rate);

    println!("\nSelectors:");
    for field in listing_ingest::config::FIELD_NAMES {
        println!(
            "  {}: {} strategies",
            field,
            selectors.field_strategies(field).len()
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles --stats: prints ledger statistics and recent runs
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path.display());

    let state = StateManager::open(&config.output.database_path, Arc::new(SystemClock))
        .context("failed to open state database")?;
    let stats = state.get_statistics()?;
    let recent = state.get_recent_runs(10)?;

    print_statistics(&stats, &recent);

    Ok(())
}

/// Handles --clear-cache
fn handle_clear_cache(config: &Config) {
    let cache = CacheManager::new(config.cache.clone(), Arc::new(SystemClock));
    let removed = cache.clear();
    println!(
        "✓ Removed {} cached responses from {}",
        removed,
        config.cache.directory.display()
    );
}

/// Handles the main ingestion run
async fn handle_run(
    config: Config,
    selectors: SelectorConfig,
    config_hash: String,
    mode: RunMode,
) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let output = config.output.clone();

    let state = StateManager::open(&output.database_path, clock.clone())
        .context("failed to open state database")?;
    let coordinator =
        Coordinator::new(config, selectors, state, clock)?.with_config_hash(config_hash);

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight items and stopping");
            stop.request_stop();
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::error!("Second interrupt received, exiting without saving state");
                std::process::exit(130);
            }
        }
    });

    let result = match coordinator.run(mode).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            return Err(e.into());
        }
    };

    let artifact = write_result(&result, &output).context("failed to write run artifact")?;
    tracing::info!(
        "Run {} finished: {} processed, {} new/changed, {} unchanged, {} rejected",
        result.id,
        result.processed,
        result.success,
        result.skipped,
        result.errors
    );
    tracing::info!("Artifact written to {}", artifact.display());

    if let Some(report_path) = &output.report_path {
        let ledger = coordinator.state().get_statistics()?;
        write_run_report(&result, Some(&ledger), report_path)
            .context("failed to write run report")?;
        tracing::info!("Report written to {}", report_path.display());
    }

    Ok(())
}
