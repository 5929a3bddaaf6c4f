//! lanwake Daemon - Main entry point
//!
//! Serves the REST API for listing, scanning and waking devices on the LAN.

mod api;
mod collector;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lanwake")]
#[command(about = "LAN device discovery and wake-on-LAN daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lanwake.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single scan, print the device table and exit
    #[arg(long)]
    scan_once: bool,

    /// Write a default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&args.log_level))
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("lanwake v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        subnet = %config.discovery.subnet,
        prefix = config.discovery.prefix_len,
        registry = %config.registry.path.display(),
        "Configuration loaded"
    );

    let bind = config.daemon.bind.clone();
    let state = state::AppState::new(config)?;

    if args.scan_once {
        info!("Running single discovery scan");
        let summary = state.scan().await?;
        let devices = state.list_devices(true).await?;
        println!(
            "Scan observed {} devices ({} new, {} updated); {} known:",
            summary.observed,
            summary.created,
            summary.updated,
            devices.len()
        );
        for device in devices {
            println!(
                "  - {} at {}{} (last seen {})",
                device.hardware_address,
                device.network_address,
                device
                    .hostname
                    .as_deref()
                    .map(|h| format!(" [{}]", h))
                    .unwrap_or_default(),
                device.last_seen.to_rfc3339()
            );
        }
    } else {
        server::run(state, &bind).await?;
    }

    Ok(())
}
