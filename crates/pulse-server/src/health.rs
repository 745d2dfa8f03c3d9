//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use pulse_core::constants::VERSION;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections in the registry.
    pub connections: usize,
    /// Crate version.
    pub version: &'static str,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        version: VERSION,
    }
}
