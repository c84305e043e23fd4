//! Claims batching operations tool
//!
//! Usage:
//!   claims-batcher --database-url postgres://... <command> [options]
//!
//! Configuration comes from `claims-batching.{toml,yaml}` (or `--config`),
//! then `BATCHING__*` environment variables, then `DATABASE_URL`.

use anyhow::Context;
use batching_service::{BatchingConfig, ClaimBatchingService, LogNotifier, PostgresBatchStore};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use logger_redacted::{init_logging, PiiRedactor};
use ops_cli::{parse_submissions, seed_reference_data};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "claims-batcher")]
#[command(about = "Batch insurer claims, run the daily capacity pass and rebalance batches")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Database connection URL, overrides the configuration
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the schema migrations
    Migrate,
    /// Create the reference specialties, insurers and providers
    Seed,
    /// Submit claims from a JSON file (one object or an array)
    Submit { file: PathBuf },
    /// Process batches due on or before a date (default today)
    Process {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Rebalance pending batches scheduled for a date (default tomorrow)
    Rebalance {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Retry assignment for claims left without a batch
    AssignPending {
        #[arg(long, default_value = "100")]
        limit: i64,
    },
    /// Capacity pass for a date (default today) then rebalance of the next day
    Cycle {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run the daily cycle on a fixed interval until interrupted
    Daemon {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = BatchingConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    init_logging(&config.logging)?;

    info!(database = %mask_url(&config.database_url), "Connecting to database");
    let store = PostgresBatchStore::from_connection_string(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    if let Command::Migrate = cli.command {
        store.migrate().await?;
        info!("Migrations applied");
        return Ok(());
    }

    let notifier = LogNotifier::new(PiiRedactor::from_logger_config(&config.logging));
    let service = ClaimBatchingService::from_config(Arc::new(store.clone()), Arc::new(notifier), &config);
    let today = Utc::now().date_naive();

    match cli.command {
        Command::Migrate => {}
        Command::Seed => print_json(&seed_reference_data(&store).await?)?,
        Command::Submit { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut rejected = 0usize;
            for submission in parse_submissions(&raw)? {
                match service.submit_claim(submission).await {
                    Ok(outcome) => print_json(&outcome)?,
                    Err(e) => {
                        error!(error = %e, "Claim rejected");
                        rejected += 1;
                    }
                }
            }
            if rejected > 0 {
                anyhow::bail!("{rejected} claim(s) rejected");
            }
        }
        Command::Process { date } => {
            print_json(&service.run_daily_capacity_pass(date.unwrap_or(today)).await?)?;
        }
        Command::Rebalance { date } => {
            let target = date.unwrap_or_else(|| batching_service::next_day(today));
            print_json(&service.run_rebalance_pass(target).await?)?;
        }
        Command::AssignPending { limit } => print_json(&service.assign_pending_claims(limit).await?)?,
        Command::Cycle { date } => print_json(&service.run_daily_cycle(date.unwrap_or(today)).await?)?,
        Command::Daemon { interval_secs } => {
            let period = Duration::from_secs(interval_secs.unwrap_or(config.scheduler.cycle_interval_secs).max(1));
            run_daemon(&service, period).await;
        }
    }

    Ok(())
}

async fn run_daemon(service: &ClaimBatchingService, period: Duration) {
    info!(interval_secs = period.as_secs(), "Daemon started");
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let today = Utc::now().date_naive();
                match service.run_daily_cycle(today).await {
                    Ok(report) => info!(
                        %today,
                        processed = report.processed.len(),
                        savings = %report.optimization.savings,
                        failed_insurers = report.optimization.failed_insurers.len(),
                        "Daily cycle finished"
                    ),
                    Err(e) => warn!(%today, error = %e, "Daily cycle failed, retrying next tick"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn mask_url(url: &str) -> String {
    if let (Some(at_pos), Some(scheme_end)) = (url.rfind('@'), url.find("://")) {
        if let (Some(scheme), Some(host_part)) = (url.get(..scheme_end + 3), url.get(at_pos..)) {
            return format!("{scheme}***:***{host_part}");
        }
    }
    "***".to_string()
}
