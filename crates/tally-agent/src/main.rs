//! tally-agent binary.
//!
//! # Usage
//!
//! ```text
//! tally-agent -a localhost:8080 -p 2 -r 10
//! ```

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use tally_agent::{Agent, AgentConfig, Reporter, Sampler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tally=debug")),
        )
        .init();

    let config = AgentConfig::parse();
    let reporter = Reporter::new(&config.address)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Keep the sender alive; dropping it would stop the agent.
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut agent = Agent::new(Sampler::new(), reporter);
    agent
        .run(config.poll_interval(), config.report_interval(), shutdown_rx)
        .await;

    info!("tally-agent stopped");
    Ok(())
}
