use anyhow::{Context, Result};
use clap::Parser;
use huddle_server::{server, telemetry, Cli, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = ServerConfig::load(&cli).context("Failed to load server configuration")?;

    // Initialize telemetry
    telemetry::init(config.json_logs)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Huddle Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config.log_config();

    // Start the server
    server::start(config).await?;

    telemetry::shutdown();

    Ok(())
}
