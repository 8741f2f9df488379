//! One-shot job runner
//!
//! Runs a single job pass and prints its JSON summary, for invocation from cron.
//!
//! Usage:
//!   keyfleet-run --job <sync|lifecycle|bandwidth|health|all> [--config <path>] [--verbose]
//!
//! Exits 1 when the job could not start, 2 when the summary records errors.
//!
//! Example cron entry (usage sync every five minutes):
//!   */5 * * * * /usr/local/bin/keyfleet-run --job sync --config /etc/keyfleet/config.yaml

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info};

use keyfleet::models::HasErrors;
use keyfleet::{utils::init_logging, AppConfig, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Sync,
    Lifecycle,
    Bandwidth,
    Health,
    All,
}

impl Job {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Job::Sync),
            "lifecycle" => Some(Job::Lifecycle),
            "bandwidth" => Some(Job::Bandwidth),
            "health" => Some(Job::Health),
            "all" => Some(Job::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Job::Sync => "sync",
            Job::Lifecycle => "lifecycle",
            Job::Bandwidth => "bandwidth",
            Job::Health => "health",
            Job::All => "all",
        }
    }
}

struct Args {
    job: Job,
    config_path: Option<PathBuf>,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut job = None;
    let mut config_path = None;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--job" | "-j" => {
                let value = args.get(i + 1).context("--job needs a value")?;
                job = Some(Job::parse(value).with_context(|| format!("Unknown job: {}", value))?);
                i += 1;
            }
            "--config" | "-c" => {
                let value = args.get(i + 1).context("--config needs a value")?;
                config_path = Some(PathBuf::from(value));
                i += 1;
            }
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => return Ok(None),
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    let job = job.context("--job is required")?;
    Ok(Some(Args {
        job,
        config_path,
        verbose,
    }))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Job failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the job and print its summary, returning the recorded error count
async fn run(args: Args) -> Result<usize> {
    let _ = dotenvy::dotenv();
    let mut config = match args.config_path {
        Some(path) => AppConfig::load_from(Some(path)),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&config.logging);
    info!(job = args.job.name(), "keyfleet-run starting");

    let state = AppState::from_config(config).await?;
    let engine = &state.engine;

    let errors = match args.job {
        Job::Sync => print_summary(&engine.sync().await?)?,
        Job::Lifecycle => print_summary(&engine.reconcile_lifecycle().await?)?,
        Job::Bandwidth => print_summary(&engine.check_bandwidth_alerts().await?)?,
        Job::Health => print_summary(&engine.run_health_checks().await?)?,
        Job::All => print_summary(&engine.run_all().await?)?,
    };

    info!(job = args.job.name(), errors, "keyfleet-run finished");
    Ok(errors)
}

fn print_summary<T: Serialize + HasErrors>(summary: &T) -> Result<usize> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    println!("{}", json);
    Ok(summary.error_count())
}

fn print_help() {
    println!(
        r#"keyfleet-run {}

USAGE:
    keyfleet-run --job <JOB> [OPTIONS]

JOBS:
    sync        Mirror remote usage counters
    lifecycle   Expire, deplete and archive keys
    bandwidth   Send threshold alerts and apply quota cutoffs
    health      Probe servers
    all         Run every job in that order

OPTIONS:
    -j, --job <JOB>         Job to run
    -c, --config <PATH>     Configuration file to load
    -v, --verbose           Debug logging
    -h, --help              Print this help message"#,
        env!("CARGO_PKG_VERSION")
    );
}
