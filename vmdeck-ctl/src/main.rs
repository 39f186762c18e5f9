//! # vmdeck-ctl
//!
//! Command-line front end for the vmdeck VM lifecycle core. Each invocation
//! connects to the libvirt daemon, runs one subcommand and prints the result as
//! JSON.
//!
//! ## Usage
//! ```bash
//! vmdeck-ctl --config /etc/vmdeck/vmdeck.yaml list
//! vmdeck-ctl create web-01 --disk /var/lib/libvirt/images/web-01.qcow2 --memory-mb 4096
//! vmdeck-ctl start web-01
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod cli;
mod commands;
mod config;

use cli::Args;
use commands::Runner;
use config::{Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    if args.log_json {
        vmdeck_common::init_logging_json(&args.log_level)?;
    } else {
        vmdeck_common::init_logging(&args.log_level)?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting vmdeck-ctl");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => {
            // Explicit config file provided
            match Config::load(config_path) {
                Ok(cfg) => {
                    info!(config_path = %config_path, "Configuration loaded");
                    cfg.with_cli_overrides(&args)
                }
                Err(e) => {
                    error!(error = %e, path = %config_path, "Failed to load configuration");
                    return Err(e);
                }
            }
        }
        None => {
            // Try default location, fall back to CLI-only config
            match Config::load(DEFAULT_CONFIG_PATH) {
                Ok(cfg) => {
                    info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                    cfg.with_cli_overrides(&args)
                }
                Err(_) => {
                    info!("No config file found, using CLI arguments and defaults");
                    Config::default().with_cli_overrides(&args)
                }
            }
        }
    };

    info!(
        uri = %config.connection.uri,
        backend = ?config.backend,
        timeout_secs = config.connection.timeout_secs,
        "vmdeck-ctl configured"
    );

    let timeout = Duration::from_secs(config.connection.timeout_secs);
    let service = Arc::new(commands::build_service(&config)?);
    let runner = Runner::new(Arc::clone(&service), timeout);

    let outcome = runner.run(args.command).await;

    // Release the daemon connection before exit. Shutdown waits for any
    // in-flight call, so it gets the same bound.
    let release = tokio::task::spawn_blocking(move || service.connections().shutdown());
    if tokio::time::timeout(timeout, release).await.is_err() {
        warn!("Timed out releasing the daemon connection");
    }

    let output = outcome.map_err(|e| {
        error!(error = %format!("{:#}", e), "Command failed");
        e
    })?;

    let rendered = serde_json::to_string_pretty(&output).context("Failed to render output")?;
    println!("{}", rendered);

    Ok(())
}
