//! OpenAgents network node binary
//!
//! Loads a YAML network config, opens the workspace, binds the configured
//! transports, and runs until interrupted.
//!
//! Exit codes: 0 clean, 1 configuration error, 2 port in use, 3 storage
//! error.

use std::path::PathBuf;

use clap::Parser;
use openagents_node::config::load_network_config;
use openagents_node::network::AgentNetwork;
use openagents_node::Result;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "openagents-node", about = "OpenAgents network node")]
struct Args {
    /// Network config file (YAML)
    #[arg(long, short, default_value = "network.yaml", env = "OPENAGENTS_CONFIG")]
    config: PathBuf,

    /// Workspace root override
    #[arg(long, env = "OPENAGENTS_WORKSPACE")]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openagents_node=info".into()),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    info!(
        "starting {} v{}",
        openagents_node::NAME,
        openagents_node::VERSION
    );

    let mut config = load_network_config(&args.config)?;
    if let Some(workspace) = args.workspace {
        config.workspace_path = Some(workspace);
    }

    let node = AgentNetwork::create(config).await?;
    node.start().await?;
    info!(
        network = node.network_name(),
        network_id = node.network_id(),
        "node is up"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(openagents_node::Error::Io)?;
    info!("interrupt received, shutting down");
    node.shutdown().await;
    Ok(())
}
