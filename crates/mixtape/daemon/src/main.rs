//! Mixtape daemon - signature challenge service
//!
//! Serves challenge creation, voting and challenge reads for the shared
//! mixtape over HTTP, backed by in-memory or PostgreSQL storage.

use clap::Parser;
use mixtape_daemon::error::{DaemonError, DaemonResult};
use mixtape_daemon::{logging, DaemonConfig, Server};

/// Mixtape Daemon CLI
#[derive(Parser)]
#[command(name = "mixtaped")]
#[command(about = "Mixtape Daemon - signature challenge service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MIXTAPE_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "MIXTAPE_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "MIXTAPE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "MIXTAPE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    logging::init(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %config.server.listen_addr,
        storage = config.storage.kind(),
        challenge_ttl_hours = config.consensus.challenge_ttl_hours,
        "Starting mixtape daemon"
    );

    let server = Server::new(config).await?;
    server.run().await
}
