//! swell-collector - collect one marine forecast bundle and exit.
//!
//! Prints the bundle directory on stdout on success; logs go to stderr.
//! Exit codes: 0 on success, 1 on failure, 130 when interrupted by
//! SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use swell_collector::logging::{DEFAULT_LOG_DIR, init_logging};
use swell_collector::{Collector, Config, Error, ProducerRegistry, run_with_shutdown};
use tracing::{error, info};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "swell-collector")]
#[command(about = "Collect marine forecast data into a timestamped bundle")]
#[command(version)]
struct Args {
    /// Configuration file (INI, or JSON when the extension is .json)
    #[arg(short, long, default_value = "config.ini")]
    config: PathBuf,

    /// Delete bundles older than this many days before collecting
    #[arg(long)]
    cache_days: Option<u64>,

    /// Directory for log files
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match init_logging(&args.log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot set up logging in {}: {e}", args.log_dir.display());
            return ExitCode::FAILURE;
        }
    };

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(days) = args.cache_days {
        config.retention.max_age = Duration::from_secs(days.saturating_mul(86_400));
    }

    let registry = match ProducerRegistry::from_config(&config) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "invalid producer configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        producers = registry.len(),
        data_dir = %config.data_dir().display(),
        "starting collection"
    );

    let collector = Collector::new(config, registry);

    match run_with_shutdown(&collector).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                records = summary.records,
                "collection finished"
            );
            println!("{}", summary.bundle_dir.display());
            ExitCode::SUCCESS
        }
        Err(Error::ShuttingDown) => {
            info!("collection interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!(error = %e, "collection failed");
            ExitCode::FAILURE
        }
    }
}
