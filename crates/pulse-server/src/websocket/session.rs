//! Session lifecycle: one upgraded client from handshake through disconnect.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tracing::{info, instrument, warn};

use super::connection::{Connection, ConnectionConfig};
use super::handler::EchoHandler;
use super::registry::ConnectionRegistry;
use super::stream::{self, FrameSink, FrameSource};

/// Run a session over an upgraded socket until the peer goes away.
pub async fn run_ws_session(
    socket: WebSocket,
    identity: String,
    registry: ConnectionRegistry,
    config: ConnectionConfig,
) {
    let (sink, source) = stream::split(socket);
    run_session(sink, source, identity, registry, config).await;
}

/// Open a connection over `sink`/`source` and drive its read loop.
///
/// Returns once the read loop has exited and the connection has been handed
/// back to the registry for removal.
#[instrument(skip_all, fields(identity = %identity))]
pub async fn run_session(
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
    identity: String,
    registry: ConnectionRegistry,
    config: ConnectionConfig,
) {
    let conn = match Connection::open(identity, sink, config, &registry).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "could not open connection");
            return;
        }
    };
    info!(conn_id = %conn.id(), "client connected");

    let handler = Arc::new(EchoHandler::new(registry));
    conn.read_pump(source, handler).await;
}
