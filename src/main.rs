use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use portshift::bootstrap::Server;
use portshift::config::Config;
use portshift::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "portshift")]
#[command(author, version, about = "Moving-target port rotation and threat scoring engine")]
struct Args {
    /// Path to config file (defaults apply when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,

    /// RNG seed for reproducible rotations
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.seed.is_some() {
        config.engine.seed = args.seed;
        config.validate()?;
    }

    init_tracing(&TracingConfig::from(&config.telemetry))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args
            .config
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<defaults>".to_string()),
        "starting portshift"
    );

    info!(
        ports = ?config.engine.ports,
        rotation_interval = %humantime::format_duration(config.engine.rotation_interval),
        admin = %config.admin.address,
        "configuration loaded"
    );

    // Validate only mode
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
