//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections added to the registry (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections removed from the registry (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections in the registry (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Failed replies and deliveries (counter).
pub const WS_WRITE_FAILURES_TOTAL: &str = "ws_write_failures_total";
/// Failed heartbeat pings (counter).
pub const WS_HEARTBEAT_FAILURES_TOTAL: &str = "ws_heartbeat_failures_total";
/// Broadcast passes run (counter).
pub const WS_BROADCASTS_TOTAL: &str = "ws_broadcasts_total";
