//! Delve Web Server
//!
//! Serves the research pipeline over HTTP.

use std::path::PathBuf;

use clap::Parser;

use delve_core::{init_logging, DelveConfig, LoggingConfig};
use delve_web::{DelveServer, WebConfig};

/// Delve Web Server - research over HTTP with NDJSON progress streaming
#[derive(Parser)]
#[command(name = "delve-web")]
#[command(about = "HTTP server for Delve research")]
#[command(version)]
struct Args {
    /// Server host to bind to (overrides DELVE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Server port to listen on (overrides DELVE_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file path (overrides DELVE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = WebConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.config.is_some() {
        config.config_path = args.config;
    }

    let logging_config = if args.verbose {
        LoggingConfig::verbose()
    } else {
        DelveConfig::load(config.config_path.as_deref())?.logging
    };
    init_logging(&logging_config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let server = DelveServer::new(config).await?;
    server.start().await?;
    Ok(())
}
