//! Heartbeat ping liveness monitoring.

use std::sync::Arc;

use pulse_core::ConnectionError;
use pulse_core::constants::SERVER_PING_PAYLOAD;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::connection::Connection;
use super::frame::Frame;
use crate::metrics::WS_HEARTBEAT_FAILURES_TOTAL;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Ping failures went over the configured maximum; the connection was failed.
    LivenessExceeded,
    /// The connection stopped being active for another reason.
    Stopped,
}

/// Run heartbeat pings for a connection.
///
/// Every `ping_period` an active connection is sent a ping through its
/// normal write path. A successful ping decrements the failure counter
/// (floored at zero); a failed one increments it, and once it exceeds
/// `max_heartbeat_failures` the connection is marked `Failed` and the
/// monitor returns [`HeartbeatResult::LivenessExceeded`].
///
/// The monitor never closes the stream or unregisters the connection. The
/// read loop observes the `Failed` state and tears the connection down.
pub async fn run_heartbeat(conn: Arc<Connection>) -> HeartbeatResult {
    let period = conn.config().ping_period;
    let max_failures = conn.config().max_heartbeat_failures;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = conn.failed() => return HeartbeatResult::Stopped,
        }

        if !conn.is_active() {
            return HeartbeatResult::Stopped;
        }

        match conn.send_message(Frame::ping(SERVER_PING_PAYLOAD)).await {
            Ok(()) => conn.record_ping_success(),
            Err(e) => {
                let failures = conn.record_ping_failure();
                ::metrics::counter!(WS_HEARTBEAT_FAILURES_TOTAL).increment(1);
                debug!(conn_id = %conn.id(), failures, error = %e, "heartbeat ping failed");
                if failures > max_failures {
                    let _ = conn.mark_failed();
                    let cause = ConnectionError::LivenessExceeded {
                        failures,
                        max: max_failures,
                    };
                    warn!(
                        conn_id = %conn.id(),
                        identity = conn.identity(),
                        error = %cause,
                        "marking connection failed"
                    );
                    return HeartbeatResult::LivenessExceeded;
                }
            }
        }
    }
}
