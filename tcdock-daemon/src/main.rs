use anyhow::Result;
use clap::Parser;

use tcdock_daemon::cli::DaemonCli;
use tcdock_daemon::logging;
use tcdock_daemon::orchestrator::{self, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let config = orchestrator::load_config(&cli).await?;
    logging::init_tracing(&config.general, cli.debug)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tcdock-daemon starting");

    let orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("tcdock-daemon shut down");
    Ok(())
}
