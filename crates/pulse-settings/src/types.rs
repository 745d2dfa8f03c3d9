//! Settings types and their compiled defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Per-connection WebSocket settings.
    pub websocket: WebsocketSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl PulseSettings {
    /// Check values that would make the connection lifecycle unusable.
    ///
    /// A read deadline shorter than the time the heartbeat needs to declare a
    /// peer dead is accepted, but logged.
    pub fn validate(&self) -> Result<()> {
        let ws = &self.websocket;
        if ws.ping_period_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.pingPeriodSecs must be non-zero".into(),
            ));
        }
        if ws.write_deadline_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.writeDeadlineSecs must be non-zero".into(),
            ));
        }
        if ws.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.maxMessageSize must be non-zero".into(),
            ));
        }
        let detection_window =
            ws.ping_period_secs.saturating_mul(u64::from(ws.max_heartbeat_failures) + 1);
        if ws.read_deadline_secs != 0 && ws.read_deadline_secs < detection_window {
            warn!(
                read_deadline_secs = ws.read_deadline_secs,
                detection_window,
                "read deadline is shorter than the heartbeat detection window"
            );
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Per-connection WebSocket settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsocketSettings {
    /// Read and write buffer size in bytes.
    pub buffer_size: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub ping_period_secs: u64,
    /// Consecutive ping failures tolerated before the connection is failed.
    pub max_heartbeat_failures: u32,
    /// Seconds a pong pushes the read deadline forward. `0` disables the deadline.
    pub read_deadline_secs: u64,
    /// Upper bound on a single frame write, in seconds.
    pub write_deadline_secs: u64,
}

impl WebsocketSettings {
    /// Ping period as a [`Duration`].
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }

    /// Read deadline, `None` when unlimited.
    pub fn read_deadline(&self) -> Option<Duration> {
        (self.read_deadline_secs > 0).then(|| Duration::from_secs(self.read_deadline_secs))
    }

    /// Write deadline as a [`Duration`].
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }
}

impl Default for WebsocketSettings {
    fn default() -> Self {
        Self {
            buffer_size: 20_480,
            max_message_size: 65_535,
            ping_period_secs: 20,
            max_heartbeat_failures: 3,
            read_deadline_secs: 100,
            write_deadline_secs: 35,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (an `EnvFilter` directive).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
