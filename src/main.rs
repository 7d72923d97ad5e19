mod config;
mod db;
mod fetcher;
mod parser;
mod pipeline;
mod rate_limit;
mod record;
mod store;
mod validate;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::fetcher::{FetchPolicy, Fetcher, Reference};
use crate::pipeline::{Orchestrator, RunSummary};
use crate::rate_limit::RateLimiter;
use crate::store::Store;

#[derive(Parser)]
#[command(name = "patent_scraper", about = "Patent record scraper and cleaner")]
struct Cli {
    /// Settings file (default: ./patent_scraper.{toml,json,yaml} if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the output directory
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// Override the minimum delay between requests
    #[arg(long, global = true)]
    delay_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape patents by identifier
    Scrape {
        /// Identifiers or patent page URLs
        ids: Vec<String>,
        /// Read identifiers from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Scrape a page range of the listing portal
    Listing {
        #[arg(long)]
        start: Option<u32>,
        #[arg(long)]
        end: Option<u32>,
    },
    /// Re-run every source whose latest capture was quarantined
    RetryQuarantined,
    /// Show ledger totals and recent runs
    Stats {
        /// Number of recent runs to list
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },
    /// Print one cleaned record as JSON
    Show { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }
    if let Some(ms) = cli.delay_ms {
        settings.request_delay_ms = ms;
    }
    std::fs::create_dir_all(&settings.output_dir)
        .with_context(|| format!("creating {}", settings.output_dir.display()))?;
    let _log_guard = init_tracing(&settings);

    let result = match cli.command {
        Commands::Scrape { ids, file } => {
            let mut inputs = ids;
            if let Some(path) = file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                inputs.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with('#'))
                        .map(String::from),
                );
            }
            let refs = parse_references(&inputs);
            if refs.is_empty() {
                println!("No valid identifiers given.");
                return Ok(());
            }
            println!("Scraping {} patents...", refs.len());
            let summary = run_pipeline(&settings, &refs).await?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Listing { start, end } => {
            if let Some(s) = start {
                settings.start_page = s;
            }
            if let Some(e) = end {
                settings.end_page = e;
            }
            settings.validate()?;
            let refs: Vec<_> = (settings.start_page..=settings.end_page)
                .map(|page| Reference::listing_page(&settings.listing_base_url, page))
                .collect();
            println!(
                "Scraping listing pages {}..={} ({} pages)...",
                settings.start_page,
                settings.end_page,
                refs.len()
            );
            let summary = run_pipeline(&settings, &refs).await?;
            print_summary(&summary);
            Ok(())
        }
        Commands::RetryQuarantined => {
            let sources = Store::open(&settings.output_dir)?.quarantined_sources()?;
            let refs = parse_references(&sources);
            if refs.is_empty() {
                println!("Nothing quarantined.");
                return Ok(());
            }
            println!("Retrying {} quarantined sources...", refs.len());
            let summary = run_pipeline(&settings, &refs).await?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Stats { limit } => {
            let store = Store::open(&settings.output_dir)?;
            let s = store.stats()?;
            println!("Cleaned:      {}", store.cleaned().len());
            println!("Captures:     {}", s.captures);
            println!("Identifiers:  {}", s.identifiers);
            println!("Quarantined:  {}", s.quarantined);
            println!("Replacements: {}", s.replacements);
            println!("Raw keys:     {}", store.raw_collection()?.len());
            println!("Runs:         {}", s.runs);
            if let Some(id) = store.last_run_id()? {
                println!("Last run:     {}", id);
            }

            let runs = store.recent_runs(limit)?;
            if !runs.is_empty() {
                println!("\n--- Recent runs ---");
                for json in runs {
                    match serde_json::from_str::<RunSummary>(&json) {
                        Ok(r) => println!(
                            "  {} | {} refs | {} valid | {} quarantined | {} failed{}",
                            r.run_id,
                            r.references,
                            r.valid,
                            r.quarantined,
                            r.failed_fetch + r.failed_store,
                            if r.halted { " | halted" } else { "" },
                        ),
                        Err(e) => warn!(error = %e, "Unreadable run summary in ledger"),
                    }
                }
            }
            Ok(())
        }
        Commands::Show { id } => {
            let store = Store::open(&settings.output_dir)?;
            match store.get(&id) {
                Some(rec) => println!("{}", serde_json::to_string_pretty(rec)?),
                None => println!("No cleaned record for {}.", id),
            }
            let history = store.history(&id)?;
            if !history.is_empty() {
                println!("\n--- Captures ---");
                for c in history {
                    println!(
                        "  {} | {} | {} bytes{}",
                        c.retrieved_at,
                        c.verdict,
                        c.content_length,
                        if c.replaced { " | replaced" } else { "" },
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// stderr plus `{output_dir}/scraper.log`. The guard flushes the file writer.
fn init_tracing(settings: &Settings) -> tracing_appender::non_blocking::WorkerGuard {
    let appender = tracing_appender::rolling::never(&settings.output_dir, "scraper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    guard
}

fn parse_references(inputs: &[String]) -> Vec<Reference> {
    inputs
        .iter()
        .filter_map(|input| match Reference::parse(input) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(input = %input, error = %e, "Skipping reference");
                None
            }
        })
        .collect()
}

async fn run_pipeline(settings: &Settings, refs: &[Reference]) -> anyhow::Result<RunSummary> {
    let limiter = Arc::new(RateLimiter::new(settings.request_delay()));
    let fetcher = Fetcher::new(FetchPolicy::from_settings(settings), Arc::clone(&limiter))?;
    let store = Store::open(&settings.output_dir)?;
    info!(
        output_dir = %store.dir().display(),
        delay_ms = limiter.min_delay().as_millis() as u64,
        max_retries = fetcher.policy().max_retries,
        "Pipeline configured"
    );

    let pb = ProgressBar::new(refs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, eta {eta}) {msg}")?
            .progress_chars("#>-"),
    );
    let mut orchestrator =
        Orchestrator::new(fetcher, store, settings.halt_after_consecutive_failures)
            .with_progress(pb);

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, finishing the current reference");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = orchestrator.run(refs).await?;
    info!(records = orchestrator.store().cleaned().len(), "Cleaned collection updated");
    Ok(summary)
}

fn print_summary(s: &RunSummary) {
    println!(
        "Done: {} references ({} fetched, {} valid, {} quarantined, {} fetch errors, {} store errors, {} skipped).",
        s.references, s.fetched, s.valid, s.quarantined, s.failed_fetch, s.failed_store, s.skipped
    );
    if !s.failures_by_kind.is_empty() {
        let kinds: Vec<_> = s
            .failures_by_kind
            .iter()
            .map(|(k, n)| format!("{} x{}", k, n))
            .collect();
        println!("Failures: {}", kinds.join(", "));
    }
    if s.halted {
        println!("Run halted after repeated fetch failures; the site structure may have changed.");
    }
    if s.cancelled {
        println!("Run cancelled.");
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
