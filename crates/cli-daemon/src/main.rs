//! CLI entry point for the timelapse daemon
//!
//! Parses command line arguments, sets up logging and starts the daemon.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use timelapse_daemon::{Config, Daemon};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timelapse Daemon - builds timelapse videos from image folders via FFmpeg
#[derive(Parser, Debug)]
#[command(name = "timelapse-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml); defaults apply if missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Skip startup checks (ffmpeg, temp dir). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timelapse_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!(config = %args.config.display(), "Timelapse daemon starting");

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let daemon_result = if args.skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
        Ok(Daemon::new_without_checks(config))
    } else {
        Daemon::with_config(config)
    };

    match daemon_result {
        Ok(daemon) => {
            tracing::info!(
                ffmpeg = %daemon.config.encoder.ffmpeg_path.display(),
                temp_dir = %daemon.config.encoder.temp_dir.display(),
                "Daemon initialized"
            );

            if let Err(e) = daemon.run_with_server().await {
                tracing::error!(error = %e, "Daemon error");
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
