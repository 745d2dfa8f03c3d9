//! Application callbacks for the read loop.
//!
//! Each inbound data frame is answered with a fixed acknowledgment template
//! embedding the payload. A failed reply is fatal for the connection: it is
//! marked failed, so the read loop stops and `on_close` unregisters it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use pulse_core::ConnectionError;
use pulse_core::constants::{REPLY_PREFIX, reply_for};
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionHandler};
use super::frame::Frame;
use super::registry::ConnectionRegistry;
use crate::metrics::WS_WRITE_FAILURES_TOTAL;

/// Replies to every data frame and unregisters the connection on close.
#[derive(Clone, Debug)]
pub struct EchoHandler {
    registry: ConnectionRegistry,
}

impl EchoHandler {
    /// Handler that unregisters closed connections from `registry`.
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    fn reply(frame: Frame) -> Option<Frame> {
        match frame {
            Frame::Text(text) => Some(Frame::Text(reply_for(&text))),
            Frame::Binary(data) => Some(Frame::Binary(binary_reply(&data))),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close => None,
        }
    }
}

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn on_message(&self, conn: &Arc<Connection>, frame: Frame) {
        debug!(conn_id = %conn.id(), kind = ?frame.kind(), len = frame.len(), "message received");
        let Some(reply) = Self::reply(frame) else {
            return;
        };
        if let Err(e) = conn.send_message(reply).await {
            ::metrics::counter!(WS_WRITE_FAILURES_TOTAL).increment(1);
            warn!(conn_id = %conn.id(), error = %e, "reply failed, dropping connection");
            let _ = conn.mark_failed();
        }
    }

    fn on_error(&self, conn: &Arc<Connection>, error: &ConnectionError) {
        match error {
            ConnectionError::NotActive | ConnectionError::Read(_) => {
                debug!(conn_id = %conn.id(), error = %error, "read loop stopping");
            }
            e if e.is_write_failure() => {
                warn!(conn_id = %conn.id(), identity = conn.identity(), error = %error, "write path failed");
            }
            _ => info!(conn_id = %conn.id(), identity = conn.identity(), error = %error, "read loop failed"),
        }
        let _ = conn.mark_failed();
    }

    fn on_close(&self, conn: &Arc<Connection>) {
        info!(
            conn_id = %conn.id(),
            identity = conn.identity(),
            age_secs = conn.age().as_secs(),
            "connection closed"
        );
        if let Err(e) = self.registry.unregister(conn.id()) {
            warn!(conn_id = %conn.id(), error = %e, "unregister failed");
        }
    }
}

/// Binary payload with the reply prefix, as produced for binary frames.
pub fn binary_reply(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(REPLY_PREFIX.len() + data.len());
    buf.put_slice(REPLY_PREFIX.as_bytes());
    buf.put_slice(data);
    buf.freeze()
}
