//! # Main — CLI Entry Point
//!
//! ## Subcommands
//!
//! - `serve`: run the WebSocket/HTTP server, the metric poller, and the
//!   participant source for whichever stream a viewer starts monitoring.
//! - `fetch <tracked_id>`: read the engagement counter once and print it.
//! - `check-config`: resolve defaults, the TOML file, and overrides, validate,
//!   and print the result as TOML.
//!
//! ## Global Options
//!
//! - `--config` / `STREAMPRIZE_CONFIG`: TOML configuration file.
//! - `LOG_FORMAT=json` switches logging to JSON; `RUST_LOG` sets the filter.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use streamprize::config::{AppConfig, ConfigOverrides};
use streamprize::metric_source::{normalize_tracked_id, MetricSource, WatchPageSource};
use streamprize::winner::WinnerPolicy;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "streamprize",
    about = "Threshold-triggered giveaways for live streams"
)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true, env = "STREAMPRIZE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve {
        /// Listen port
        #[arg(long, env = "PORT")]
        port: Option<u16>,
        /// Directory with the viewer frontend and winner GIFs
        #[arg(long, env = "STATIC_DIR")]
        static_dir: Option<PathBuf>,
        /// Seconds between metric polls
        #[arg(long, env = "POLL_INTERVAL_SECS")]
        poll_interval: Option<u64>,
        /// allow_repeat or exclude_previous
        #[arg(long, env = "WINNER_POLICY")]
        winner_policy: Option<WinnerPolicy>,
        /// Do not spawn the participant source process
        #[arg(long)]
        no_participant_source: bool,
    },
    /// Fetch the engagement counter once and print it
    Fetch {
        /// Stream id or watch URL
        tracked_id: String,
    },
    /// Validate the configuration and print it as TOML
    CheckConfig,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            static_dir,
            poll_interval,
            winner_policy,
            no_participant_source,
        } => {
            let overrides = ConfigOverrides {
                port,
                static_dir,
                poll_interval_secs: poll_interval,
                winner_policy,
                no_participant_source,
            };
            let config = AppConfig::load(cli.config.as_deref(), &overrides)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(streamprize::dashboard::run(config))
        }
        Commands::Fetch { tracked_id } => {
            let config = AppConfig::load(cli.config.as_deref(), &ConfigOverrides::default())?;
            let id = normalize_tracked_id(&tracked_id).map_err(|e| anyhow::anyhow!(e))?;
            let source = WatchPageSource::new(
                &config.metric.watch_url,
                &config.metric.user_agent,
                Duration::from_secs(config.metric.request_timeout_secs),
            )?;
            let rt = tokio::runtime::Runtime::new()?;
            match rt.block_on(source.fetch_metric(&id)) {
                Some(value) => {
                    println!("{}", value);
                    Ok(())
                }
                None => anyhow::bail!("could not read the metric for {}", id),
            }
        }
        Commands::CheckConfig => {
            let config = AppConfig::load(cli.config.as_deref(), &ConfigOverrides::default())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
