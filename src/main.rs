//! series-reaper - drops series that stopped reporting from InfluxDB 1.x

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use series_reaper::config::Config;
use series_reaper::db::HttpConnector;
use series_reaper::tasks::runner;

/// Exit status when every job and connection succeeded
const EXIT_CLEAN: u8 = 0;
/// Exit status when the configuration or arguments were unusable
const EXIT_STARTUP: u8 = 1;
/// Exit status when at least one job or connection failed
const EXIT_FAILURES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Finds series with data in a historical window but none in a recent one and drops them.
#[derive(Parser, Debug)]
#[command(name = "series-reaper", version, about)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "series-reaper.toml", env = "SERIES_REAPER_CONFIG")]
    config: PathBuf,

    /// Only log drop statements; pass `--dry-run=false` to really drop series
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    dry_run: bool,

    /// Log queries and results
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// Exit status after clap reported `e`.
///
/// `--help` and `--version` exit clean unless their text could not be written.
fn argument_exit_code(e: &clap::Error, printed: std::io::Result<()>) -> u8 {
    if e.use_stderr() || printed.is_err() {
        EXIT_STARTUP
    } else {
        EXIT_CLEAN
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => return ExitCode::from(argument_exit_code(&e, e.print())),
    };

    // Logging lives for this run only
    let default_filter = if args.debug {
        "series_reaper=debug"
    } else {
        "series_reaper=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);
    let _log_guard = match args.log_format {
        LogFormat::Text => {
            tracing::subscriber::set_default(registry.with(tracing_subscriber::fmt::layer()))
        }
        LogFormat::Json => {
            tracing::subscriber::set_default(registry.with(tracing_subscriber::fmt::layer().json()))
        }
    };

    let config = match Config::load(&args.config)
        .with_context(|| format!("Could not load config in file {}", args.config.display()))
    {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    if config.job_count() == 0 {
        warn!("No stale series jobs configured");
    }

    info!(
        "series-reaper v{} running {} jobs from {}",
        env!("CARGO_PKG_VERSION"),
        config.job_count(),
        args.config.display()
    );

    let report = runner::run_jobs(&config, &HttpConnector, args.dry_run).await;

    for job in &report.jobs {
        info!(
            job = %job.job,
            databases = job.databases,
            stale = job.stale_found,
            dropped = job.dropped,
            ok = job.is_success(),
            "Job summary"
        );
    }

    match &report.last_error {
        None => ExitCode::from(EXIT_CLEAN),
        Some(e) => {
            error!(
                run_id = %report.run_id,
                failed_connections = report.failed_connections,
                error = %e,
                "Run finished with failures"
            );
            ExitCode::from(EXIT_FAILURES)
        }
    }
}
