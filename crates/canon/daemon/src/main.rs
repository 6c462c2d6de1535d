use anyhow::Context;
use canon_daemon::{DaemonConfig, Server};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Canon Daemon CLI
#[derive(Parser)]
#[command(name = "canond")]
#[command(about = "Canon Daemon - policy decisions with a hash-chained audit ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CANON_CONFIG")]
    config: Option<String>,

    /// Listen address, overriding the configuration file
    #[arg(short, long, env = "CANON_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "CANON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CANON_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("invalid listen address {listen}"))?;
    }

    let server = Server::new(config).await?;
    server.run().await?;
    Ok(())
}
