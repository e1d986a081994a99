//! Uptime CLI
//!
//! Command-line interface for the website monitoring and alerting service.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use uptime::{issue_token, load_config, Config};

#[derive(Parser)]
#[command(name = "uptime")]
#[command(about = "Website uptime monitoring, alerting and reporting service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// Directory for the store snapshot (overrides config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Print a bearer token for this subject and exit
    #[arg(long, value_name = "SUBJECT")]
    issue_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, port={:?}, log_level={:?}",
        args.config,
        args.port,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    config.resolve_secrets()?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = Some(dir);
    }

    if let Some(subject) = &args.issue_token {
        println!("{}", issue_token(&config, subject)?);
        return Ok(());
    }

    tracing::info!("Starting uptime service");
    tracing::debug!(
        "Groups: {}, Monitors: {}, Debounce: {}",
        config.groups.len(),
        config.monitors.len(),
        config.engine.debounce_threshold
    );

    uptime::run(config).await?;

    Ok(())
}
