//! Standalone headless binary for the network audio renderer.
//!
//! This binary is the only concrete entry point this repository ships (§10.3):
//! it loads configuration, initializes logging, and boots the message-factory
//! and pool layer that every protocol/pipeline stage in `renderer-core` is
//! built against. Wiring actual protocol sources, pipeline stages and a device
//! driver together into a running transport is left to a host embedding this
//! crate, alongside the UPnP/AVTransport control surface and device
//! advertisement that are out of scope here (§1, §6).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use renderer_core::config::Config;
use renderer_core::msg::MsgFactory;
use tokio::signal;

/// Headless network audio renderer.
#[derive(Parser, Debug)]
#[command(name = "renderer-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RENDERER_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("renderer-server v{}", env!("CARGO_PKG_VERSION"));

    let config =
        Config::load(args.config.as_deref()).context("failed to load configuration")?;

    log::info!(
        "configuration: stage_channel_capacity={}, encoded_reservoir_bytes={}, gorge_ms={}, ramp_duration_ms={}",
        config.stage_channel_capacity,
        config.reservoirs.encoded_reservoir_bytes,
        config.reservoirs.gorge_ms,
        config.ramp.ramp_duration_ms,
    );

    let factory = MsgFactory::new(&config.pools);
    log::info!("message pools ready: {:?}", factory.stats());

    log::info!(
        "renderer core initialized; awaiting a host to attach protocol sources, \
         pipeline stages and a PcmProcessor driver"
    );

    shutdown_signal().await;
    log::info!("shutdown signal received, exiting");

    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
