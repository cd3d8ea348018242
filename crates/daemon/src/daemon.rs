//! Daemon startup and main loop for the timelapse daemon
//!
//! Provides the daemon entry point, startup sequence and the API serve loop.

use crate::config::{Config, ConfigError};
use crate::orchestrator::Orchestrator;
use crate::registry::JobRegistry;
use crate::request::ResourceLimits;
use crate::server::{run_server, ServerError};
use crate::startup::{run_startup_checks, StartupError};
use crate::system_info::{new_shared_limits, SharedLimits};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Job state shared with the API
    pub registry: JobRegistry,
    /// Last-submitted resource limits
    pub limits: SharedLimits,
    /// Drives submitted jobs
    pub orchestrator: Orchestrator,
    /// Root token; every job holds a child of it
    shutdown: CancellationToken,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// Startup sequence:
    /// 1. Load config from file (defaults if absent)
    /// 2. Apply environment overrides
    /// 3. Run startup checks (temp dir, ffmpeg)
    /// 4. Build registry, limits board and orchestrator
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load_or_default(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when ffmpeg is not available.
    pub fn new_without_checks(config: Config) -> Self {
        let registry = JobRegistry::new();
        let limits = new_shared_limits(ResourceLimits {
            cpu_percent: config.limits.cpu_percent,
            memory_mb: config.limits.memory_mb,
        });
        let shutdown = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            config.encoder.clone(),
            registry.clone(),
            limits.clone(),
            shutdown.clone(),
        );

        Self {
            config,
            registry,
            limits,
            orchestrator,
            shutdown,
        }
    }

    /// Token that stops the server and cancels running jobs when fired
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve the API until the shutdown token fires
    pub async fn serve(&self) -> Result<(), DaemonError> {
        run_server(
            self.orchestrator.clone(),
            self.config.server.bind,
            self.shutdown.clone(),
        )
        .await?;
        Ok(())
    }

    /// Run the daemon until Ctrl-C
    ///
    /// Ctrl-C stops the server and cancels every running job.
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
        });

        self.serve().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, LimitsConfig, ServerConfig};
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_config(temp_dir: PathBuf) -> Config {
        Config {
            server: ServerConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            },
            encoder: EncoderConfig {
                ffmpeg_path: PathBuf::from("ffmpeg"),
                temp_dir,
                poll_interval_ms: 50,
            },
            limits: LimitsConfig {
                cpu_percent: 60,
                memory_mb: 2048,
            },
        }
    }

    #[tokio::test]
    async fn test_daemon_initialization_without_checks() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(dir.path().to_path_buf());
        let daemon = Daemon::new_without_checks(config.clone());

        assert_eq!(daemon.config, config);
        assert!(daemon.registry.is_empty());
    }

    #[tokio::test]
    async fn test_limits_seeded_from_config() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new_without_checks(create_test_config(dir.path().to_path_buf()));

        let limits = *daemon.limits.read().await;
        assert_eq!(limits.cpu_percent, 60);
        assert_eq!(limits.memory_mb, 2048);
    }

    #[tokio::test]
    async fn test_orchestrator_shares_registry() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new_without_checks(create_test_config(dir.path().to_path_buf()));

        let request = crate::request::TimelapseRequest::new(dir.path(), dir.path().join("out"));
        let record = daemon.orchestrator.submit(&request).await.unwrap();

        assert!(daemon.registry.get(&record.job_id).is_ok());
    }

    #[test]
    fn test_startup_checks_reject_missing_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path().join("tmp"));
        config.encoder.ffmpeg_path = dir.path().join("no-such-ffmpeg");

        let result = Daemon::with_config(config);
        assert!(matches!(result, Err(DaemonError::Startup(_))));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::new_without_checks(create_test_config(dir.path().to_path_buf()));

        let token = daemon.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), daemon.serve()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
