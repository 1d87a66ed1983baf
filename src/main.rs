//! Choral-Ripper main entry point
//!
//! This is the command-line interface for the Choral-Ripper catalog crawler.

use anyhow::Context;
use choral_ripper::catalog::{open_catalog, Catalog, RunStatus, SqliteCatalog};
use choral_ripper::config::{load_config_with_hash, Config};
use choral_ripper::notify::Notifier;
use choral_ripper::output::{load_statistics, print_statistics};
use choral_ripper::{CrawlOrchestrator, RequestGate, RipperError, RunOutcome};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Choral-Ripper: a resumable choral music catalog crawler
///
/// Choral-Ripper enumerates composers, their pieces and the scores of each
/// piece, then downloads score files. Every stage can be interrupted and
/// resumed without repeating finished work.
#[derive(Parser, Debug)]
#[command(name = "choral-ripper")]
#[command(version = "1.0.0")]
#[command(about = "A resumable choral music catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed composers, then expand composers and pieces
    Scrape,

    /// Download score files
    Download {
        /// JSON array of piece URLs to download instead of the catalog
        #[arg(long, value_name = "FILE", conflicts_with = "search")]
        list: Option<PathBuf>,

        /// Search API URL whose results should be downloaded
        #[arg(long, value_name = "URL")]
        search: Option<String>,
    },

    /// Show catalog statistics and exit
    Stats,

    /// Clear the failure flag on every composer and piece
    ResetFailed,

    /// Validate config and show what would be crawled
    DryRun,
}

/// A pipeline invocation recorded as a run
enum Job {
    Scrape,
    DownloadCatalog,
    DownloadList(PathBuf),
    DownloadSearch(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let notifier = Notifier::from_config(&config.notify);
    match cli.command {
        Command::Scrape => handle_job(config, &config_hash, Job::Scrape, &notifier).await,
        Command::Download { list, search } => {
            let job = match (list, search) {
                (Some(path), _) => Job::DownloadList(path),
                (None, Some(url)) => Job::DownloadSearch(url),
                (None, None) => Job::DownloadCatalog,
            };
            handle_job(config, &config_hash, job, &notifier).await
        }
        Command::Stats => handle_stats(&config),
        Command::ResetFailed => handle_reset_failed(&config),
        Command::DryRun => handle_dry_run(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("choral_ripper=info,warn"),
            1 => EnvFilter::new("choral_ripper=debug,info"),
            2 => EnvFilter::new("choral_ripper=trace,debug"),
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

fn open_configured_catalog(config: &Config) -> anyhow::Result<SqliteCatalog> {
    open_catalog(Path::new(&config.catalog.database_path)).with_context(|| {
        format!(
            "Failed to open catalog at {}",
            config.catalog.database_path
        )
    })
}

/// Cancels `token` on Ctrl+C or SIGTERM
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::warn!("Received Ctrl+C; finishing the current unit of work"),
            _ = terminate => tracing::warn!("Received terminate signal; finishing the current unit of work"),
        }
        token.cancel();
    });
}

/// Runs one pipeline job inside a recorded run
///
/// Every error, including those raised while setting up the run, goes
/// through `report_failure`. Once the run row exists it is always finished.
async fn handle_job(
    config: Config,
    config_hash: &str,
    job: Job,
    notifier: &Notifier,
) -> anyhow::Result<()> {
    let mut catalog = match open_catalog(Path::new(&config.catalog.database_path)) {
        Ok(catalog) => catalog,
        Err(e) => return Err(abort(notifier, e.into())),
    };
    let run_id = match catalog.create_run(config_hash) {
        Ok(run_id) => run_id,
        Err(e) => return Err(abort(notifier, e.into())),
    };
    tracing::info!("Started run {}", run_id);

    let gate = match RequestGate::new(&config.site.root, &config.requester) {
        Ok(gate) => gate,
        Err(e) => {
            finish_run(&mut catalog, run_id, RunStatus::Failed);
            return Err(abort(notifier, e));
        }
    };
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let mut orchestrator = CrawlOrchestrator::new(
        &config,
        gate,
        catalog,
        Notifier::from_config(&config.notify),
        cancel,
    );

    let result = match job {
        Job::Scrape => orchestrator.run_scrape().await,
        Job::DownloadCatalog => orchestrator.download_catalog().await,
        Job::DownloadList(path) => orchestrator.download_list_file(&path).await,
        Job::DownloadSearch(url) => orchestrator.download_search(&url).await,
    };

    let status = match &result {
        Ok(RunOutcome::Completed) => RunStatus::Completed,
        Ok(RunOutcome::Interrupted) => RunStatus::Interrupted,
        Err(e) if e.is_blocked() => RunStatus::Blocked,
        Err(_) => RunStatus::Failed,
    };
    finish_run(orchestrator.catalog_mut(), run_id, status);

    match result {
        Ok(RunOutcome::Completed) => {
            tracing::info!("Run {} completed", run_id);
            Ok(())
        }
        Ok(RunOutcome::Interrupted) => {
            tracing::info!("Run {} interrupted; rerun to resume", run_id);
            Ok(())
        }
        Err(e) => Err(abort(notifier, e)),
    }
}

fn finish_run<C: Catalog>(catalog: &mut C, run_id: i64, status: RunStatus) {
    if let Err(e) = catalog.finish_run(run_id, status) {
        tracing::error!("Failed to record end of run {}: {}", run_id, e);
    }
}

/// Reports a fatal error and hands it back for the exit status
fn abort(notifier: &Notifier, error: RipperError) -> anyhow::Error {
    report_failure(notifier, &error);
    error.into()
}

/// Logs a fatal error and sends the top-level failure notification
fn report_failure(notifier: &Notifier, error: &RipperError) {
    tracing::error!("Run failed: {}", error);

    if let RipperError::Blocked(blocked) = error {
        let evidence = blocked
            .evidence
            .as_ref()
            .map(|p| format!("The block page was saved to {}.", p.display()))
            .unwrap_or_else(|| "The block page could not be saved.".to_string());
        notifier.notify(
            "Crawler blocked by anti-scraping protection",
            &format!(
                "The crawl was stopped because the site served its ban page at {}.\n{}\nWait before resuming, and consider changing proxies.",
                blocked.url, evidence
            ),
        );
    } else {
        notifier.notify(
            "Crawler stopped with an error",
            &format!(
                "The crawl stopped with an unexpected error:\n{}\nThe last checkpoint is preserved.",
                error
            ),
        );
    }
}

/// Handles the stats command: shows statistics from the catalog
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.catalog.database_path);

    let catalog = open_configured_catalog(config)?;
    let stats = load_statistics(&catalog)?;
    print_statistics(&stats);

    if let Some(run) = catalog.get_latest_run()? {
        println!(
            "\nLast run: #{} started {} ({})",
            run.id,
            run.started_at,
            run.status.to_db_string()
        );
    }

    Ok(())
}

/// Handles the reset-failed command
fn handle_reset_failed(config: &Config) -> anyhow::Result<()> {
    let mut catalog = open_configured_catalog(config)?;
    let counts = catalog.reset_failed()?;

    println!(
        "Cleared failure flag on {} composer(s) and {} piece(s)",
        counts.composers, counts.pieces
    );
    Ok(())
}

/// Handles the dry-run command: validates config and shows pending work
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Choral-Ripper Dry Run ===\n");

    println!("Site:");
    println!("  Root: {}", config.site.root);
    println!("  Composer listing: {}", config.site.composer_list_url);
    println!("  Expected composers: {}", config.site.expected_composers);

    println!("\nRequester:");
    println!(
        "  Delay between requests: {}-{}ms",
        config.requester.fuzz_min_ms, config.requester.fuzz_max_ms
    );
    if config.requester.proxies.is_empty() {
        println!("  Proxies: none (direct connection)");
    } else {
        println!("  Proxies ({}):", config.requester.proxies.len());
        for proxy in &config.requester.proxies {
            println!("    - {}", proxy);
        }
    }

    println!("\nDownloads:");
    println!("  Directory: {}", config.download.directory);
    println!(
        "  Allowed extensions: {}",
        config.download.allowed_extensions.join(", ")
    );
    println!("  Ledger: {}", config.download.ledger_path);

    let catalog = open_configured_catalog(config)?;
    let stats = load_statistics(&catalog)?;
    let seeding = stats.composers < config.site.expected_composers;

    println!("\nCatalog: {}", config.catalog.database_path);
    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would {}seed composers ({} known)",
        if seeding { "" } else { "not " },
        stats.composers
    );
    println!(
        "✓ Would expand {} composer(s)",
        catalog.composers_to_expand()?.len()
    );
    println!("✓ Would scrape {} piece(s)", catalog.pieces_to_scrape()?.len());
    println!(
        "✓ Would download files of {} piece(s)",
        catalog.pieces_to_download()?.len()
    );

    Ok(())
}
