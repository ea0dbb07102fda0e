//! credsync binary

use clap::{Parser, Subcommand};
use credsync::common::{parse_duration, Config};
use credsync::credential::describe_error;
use credsync::sim::{parse_code, run_group, SimulatedService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "credsync")]
#[command(about = "Group-wide credential acquisition, distribution and redemption")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the protocol over an in-process group and simulated service
    Simulate {
        /// Number of ranks
        #[arg(long)]
        ranks: Option<usize>,

        /// Per-rank propagation lag in polls (comma-separated, by rank)
        #[arg(long, value_delimiter = ',')]
        delays: Vec<u32>,

        /// Random per-rank lag up to this many polls
        #[arg(long, conflicts_with = "delays")]
        max_delay: Option<u32>,

        /// Seed for --max-delay
        #[arg(long, default_value = "0")]
        seed: u64,

        /// First credential id handed out by the service
        #[arg(long, default_value = "1")]
        first_id: u32,

        /// Make acquire fail with this code (number or name)
        #[arg(long, allow_hyphen_values = true, value_parser = parse_service_code)]
        fail_acquire: Option<i32>,

        /// Make release fail with this code (number or name)
        #[arg(long, allow_hyphen_values = true, value_parser = parse_service_code)]
        fail_release: Option<i32>,

        /// Failed attempts allowed before a rank aborts the group
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Sleep before each access attempt (e.g. 1s, 250ms)
        #[arg(long, value_parser = parse_interval)]
        poll_interval: Option<Duration>,

        /// Config file (defaults to ./credsync.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Describe a service return code
    Describe {
        /// Return code, e.g. -6
        #[arg(allow_hyphen_values = true)]
        code: i32,
    },
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn parse_service_code(s: &str) -> Result<i32, String> {
    parse_code(s).map_err(|e| e.to_string())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Describe { code } => {
            println!("{} : {}", code, describe_error(code));
        }

        Commands::Simulate {
            ranks,
            delays,
            max_delay,
            seed,
            first_id,
            fail_acquire,
            fail_release,
            max_attempts,
            poll_interval,
            config,
            json,
        } => {
            // Load config from file, then override with CLI arguments
            let mut config = Config::load_from(config.as_deref())?;
            if let Some(ranks) = ranks {
                config.group_size = ranks;
            } else if !delays.is_empty() {
                config.group_size = config.group_size.max(delays.len());
            }
            if let Some(max_attempts) = max_attempts {
                config.retry.max_attempts = max_attempts;
            }
            if let Some(interval) = poll_interval {
                config.retry.set_poll_interval(interval)?;
            }
            config.validate()?;
            init_tracing(&config.log_level);

            let mut service = SimulatedService::new(first_id).lags(&delays);
            if let Some(max_delay) = max_delay {
                service = service.random_lags(config.group_size, max_delay, seed);
            }
            if let Some(code) = fail_acquire {
                service = service.fail_acquire(code);
            }
            if let Some(code) = fail_release {
                service = service.fail_release(code);
            }
            let service = Arc::new(service);

            let outcome = run_group(&config, |rank| service.endpoint(rank)).await?;

            if let Some(report) = &outcome.report {
                if json {
                    println!("{}", serde_json::to_string_pretty(report)?);
                } else {
                    print!("{}", report.histogram);
                }
            }

            if !outcome.succeeded() {
                std::process::exit(outcome.exit_code);
            }
        }
    }

    Ok(())
}
