//! Server configuration.

use pulse_settings::{PulseSettings, WebsocketSettings};
use serde::{Deserialize, Serialize};

use crate::websocket::connection::ConnectionConfig;

/// Configuration for the Pulse server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Per-connection WebSocket settings.
    pub websocket: WebsocketSettings,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Timing configuration handed to every new connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::from(&self.websocket)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            websocket: WebsocketSettings::default(),
        }
    }
}

impl From<&PulseSettings> for ServerConfig {
    fn from(settings: &PulseSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            websocket: settings.websocket.clone(),
        }
    }
}
