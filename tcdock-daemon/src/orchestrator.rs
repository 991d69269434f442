//! Daemon assembly and lifecycle management.
//!
//! The [`Orchestrator`] loads configuration, connects to the Docker
//! daemon, builds the shaper [`Synchronizer`] and runs it until a
//! shutdown signal arrives.
//!
//! # Startup Order
//!
//! 1. Configuration (file or defaults, then env, then CLI overrides)
//! 2. Metrics recorder (when enabled)
//! 3. Docker connection and ping (fatal on failure)
//! 4. Synchronizer bootstrap and event loop

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use tcdock_core::config::TcdockConfig;
use tcdock_core::error::{ConfigError, TcdockError};
use tcdock_shaper::{
    BollardRuntime, ContainerRuntime, FileStore, ProcessRunner, ShaperConfig, SyncHandle,
    Synchronizer, SynchronizerBuilder,
};

use crate::cli::DaemonCli;
use crate::metrics_server;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tcdock/tcdock.toml";

/// Host-wired synchronizer type.
type HostSynchronizer = Synchronizer<BollardRuntime, ProcessRunner, FileStore>;

/// Builds the effective configuration: file, then env, then CLI flags.
///
/// A missing `--config` file is an error. Without `--config`, a missing
/// default file falls back to built-in defaults plus env overrides.
pub async fn load_config(cli: &DaemonCli) -> Result<TcdockConfig> {
    let mut config = match &cli.config {
        Some(path) => TcdockConfig::load(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?,
        None => load_default(Path::new(DEFAULT_CONFIG_PATH)).await?,
    };

    apply_cli_overrides(&mut config, cli);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    Ok(config)
}

async fn load_default(path: &Path) -> Result<TcdockConfig> {
    match TcdockConfig::load(path).await {
        Ok(config) => Ok(config),
        Err(TcdockError::Config(ConfigError::FileNotFound { .. })) => {
            TcdockConfig::from_env().map_err(|e| anyhow::anyhow!("invalid default config: {}", e))
        }
        Err(e) => Err(anyhow::anyhow!("failed to load config: {}", e)),
    }
}

/// CLI flags win over the config file and environment variables.
pub fn apply_cli_overrides(config: &mut TcdockConfig, cli: &DaemonCli) {
    if cli.debug {
        config.general.log_level = "debug".to_owned();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
}

/// Central coordinator of `tcdock-daemon`.
pub struct Orchestrator {
    config: TcdockConfig,
    synchronizer: HostSynchronizer,
    handle: SyncHandle,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The metrics recorder cannot be installed
    /// - The Docker daemon is unreachable
    pub async fn build_from_config(config: TcdockConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let runtime = Arc::new(
            BollardRuntime::connect(&config.docker.socket)
                .map_err(|e| anyhow::anyhow!("failed to create docker client: {}", e))?,
        );
        runtime
            .ping()
            .await
            .map_err(|e| anyhow::anyhow!("docker daemon unreachable: {}", e))?;
        tracing::info!("connected to docker daemon");

        let shaper_config = ShaperConfig::from_core(&config);
        let store = Arc::new(FileStore::new(&shaper_config.state_dir));

        let (synchronizer, handle) = SynchronizerBuilder::new()
            .config(shaper_config)
            .runtime(runtime)
            .runner(Arc::new(ProcessRunner::new()))
            .store(store)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build synchronizer: {}", e))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            synchronizer,
            handle,
            shutdown_tx,
        })
    }

    /// Run the synchronizer until SIGTERM/SIGINT or until it stops on its own.
    ///
    /// # Errors
    ///
    /// Returns an error when bootstrap fails (the initial container listing
    /// could not be fetched) or signal handlers cannot be installed.
    pub async fn run(self) -> Result<()> {
        let Self {
            synchronizer,
            handle,
            shutdown_tx,
            ..
        } = self;

        let shutdown_rx = shutdown_tx.subscribe();
        let mut task = tokio::spawn(async move { synchronizer.run(shutdown_rx).await });

        tokio::select! {
            joined = &mut task => {
                tracing::warn!(state = handle.state().as_str(), "synchronizer stopped");
                return joined?.map_err(|e| anyhow::anyhow!("synchronizer failed: {}", e));
            }
            signal = wait_for_shutdown_signal() => {
                let signal = signal?;
                tracing::info!(signal = signal, "shutdown signal received");
            }
        }

        let _ = shutdown_tx.send(());
        task.await?
            .map_err(|e| anyhow::anyhow!("synchronizer failed: {}", e))?;

        Ok(())
    }

    /// Synchronizer state handle.
    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &TcdockConfig {
        &self.config
    }
}

/// Wait for SIGTERM or SIGINT.
///
/// Returns the name of the signal that was received.
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}
