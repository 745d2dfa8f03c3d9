//! # pulse-agent
//!
//! Pulse hub binary: loads settings, initializes logging and metrics, and
//! runs the HTTP/WebSocket server until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_server::config::ServerConfig;
use pulse_server::server::PulseServer;
use pulse_settings::PulseSettings;

/// Pulse WebSocket hub.
#[derive(Parser, Debug)]
#[command(name = "pulse-agent", about = "Pulse WebSocket hub", version)]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.pulse/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive (overrides settings; `RUST_LOG` still wins when set).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<PulseSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(pulse_settings::settings_path);
        let mut settings = pulse_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if settings.logging.json {
        pulse_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        pulse_core::logging::init_subscriber(&settings.logging.level);
    }

    let metrics_handle =
        pulse_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(&settings);
    let server = PulseServer::new(config, metrics_handle);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        version = pulse_core::constants::VERSION,
        ping_period_secs = settings.websocket.ping_period_secs,
        "Pulse hub listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop(handle).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
