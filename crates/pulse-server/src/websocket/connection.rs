//! WebSocket connection state, write path, and read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::constants::HANDSHAKE_ACK;
use pulse_core::{ConnectionError, ConnectionId, RegistryError, TransportError};
use pulse_settings::WebsocketSettings;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use super::frame::Frame;
use super::heartbeat;
use super::registry::ConnectionRegistry;
use super::stream::{FrameSink, FrameSource};

/// Liveness of a connection. `Failed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reading, writing, and pinging normally.
    Active,
    /// Marked dead; the read loop tears the connection down.
    Failed,
}

/// Timing and threshold configuration of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Interval between server pings.
    pub ping_period: Duration,
    /// How far a pong pushes the read deadline. `None` disables the deadline.
    pub read_deadline: Option<Duration>,
    /// Upper bound on a single frame write.
    pub write_timeout: Duration,
    /// Ping failures tolerated before the connection is failed.
    pub max_heartbeat_failures: u32,
    /// Largest inbound message or frame, enforced by the transport at read time.
    pub max_message_size: usize,
    /// Transport read and write buffer size.
    pub buffer_size: usize,
}

impl From<&WebsocketSettings> for ConnectionConfig {
    fn from(settings: &WebsocketSettings) -> Self {
        Self {
            ping_period: settings.ping_period(),
            read_deadline: settings.read_deadline(),
            write_timeout: settings.write_deadline(),
            max_heartbeat_failures: settings.max_heartbeat_failures,
            max_message_size: settings.max_message_size,
            buffer_size: settings.buffer_size,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&WebsocketSettings::default())
    }
}

/// Callbacks driven by [`Connection::read_pump`].
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A data frame arrived. The next read waits until this returns.
    async fn on_message(&self, conn: &Arc<Connection>, frame: Frame);

    /// The read loop is about to stop because of `error`.
    fn on_error(&self, conn: &Arc<Connection>, error: &ConnectionError);

    /// The read loop has exited. Called exactly once per `read_pump`.
    fn on_close(&self, conn: &Arc<Connection>);
}

/// One live duplex session.
pub struct Connection {
    id: ConnectionId,
    identity: String,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    heartbeat_failures: AtomicU32,
    read_deadline: Mutex<Option<Instant>>,
    sink: AsyncMutex<Box<dyn FrameSink>>,
    closed: AtomicBool,
    connected_at: Instant,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("heartbeat_failures", &self.heartbeat_failures())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Build an active connection without registering it or starting its heartbeat.
    pub fn new(
        id: ConnectionId,
        identity: impl Into<String>,
        sink: Box<dyn FrameSink>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let now = Instant::now();
        let (state, _) = watch::channel(ConnectionState::Active);
        Arc::new(Self {
            id,
            identity: identity.into(),
            read_deadline: Mutex::new(config.read_deadline.map(|d| now + d)),
            config,
            state,
            heartbeat_failures: AtomicU32::new(0),
            sink: AsyncMutex::new(sink),
            closed: AtomicBool::new(false),
            connected_at: now,
        })
    }

    /// Bring a freshly upgraded stream online.
    ///
    /// Sends the handshake acknowledgment, registers with `registry`, and
    /// spawns the heartbeat monitor. A failed acknowledgment is logged; the
    /// connection still comes up and the heartbeat decides its fate.
    pub async fn open(
        identity: impl Into<String>,
        sink: Box<dyn FrameSink>,
        config: ConnectionConfig,
        registry: &ConnectionRegistry,
    ) -> Result<Arc<Self>, RegistryError> {
        let conn = Self::new(registry.next_id(), identity, sink, config);

        if let Err(e) = conn.send_message(Frame::text(HANDSHAKE_ACK)).await {
            warn!(conn_id = %conn.id, error = %e, "failed to send handshake acknowledgment");
        }

        if let Err(e) = registry.register(conn.clone()) {
            conn.close().await;
            return Err(e);
        }

        let _ = tokio::spawn(heartbeat::run_heartbeat(conn.clone()));
        debug!(conn_id = %conn.id, identity = %conn.identity, "connection opened");
        Ok(conn)
    }

    /// Registry-assigned identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Owning identity (not unique across connections).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Configuration this connection was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current liveness state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the state is still `Active`.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Move to `Failed`. Returns `true` only for the call that made the transition.
    pub fn mark_failed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Active {
                *state = ConnectionState::Failed;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the state is `Failed`.
    pub async fn failed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Failed).await;
    }

    /// Current heartbeat failure count.
    pub fn heartbeat_failures(&self) -> u32 {
        self.heartbeat_failures.load(Ordering::Acquire)
    }

    /// A ping went out: decrement the failure count, floored at zero.
    pub(crate) fn record_ping_success(&self) {
        let _ = self
            .heartbeat_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// A ping failed: increment and return the new failure count.
    pub(crate) fn record_ping_failure(&self) -> u32 {
        self.heartbeat_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Instant after which a pending read fails, `None` when unlimited.
    pub fn read_deadline(&self) -> Option<Instant> {
        *self.read_deadline.lock()
    }

    /// Push the read deadline to `now + read_deadline` (or clear it when unlimited).
    pub fn extend_read_deadline(&self) {
        *self.read_deadline.lock() = self.config.read_deadline.map(|d| Instant::now() + d);
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Write one frame under the connection's write lock.
    ///
    /// Every outbound frame goes through here so frames from replies, pings,
    /// and registry deliveries never interleave. Never changes liveness state;
    /// the caller decides what a failure means.
    pub async fn send_message(&self, frame: Frame) -> Result<(), ConnectionError> {
        let mut sink = self.sink.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        match time::timeout(self.config.write_timeout, sink.send_frame(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Write(e)),
            Err(_) => Err(ConnectionError::WriteTimeout(self.config.write_timeout)),
        }
    }

    /// Mark failed and close the write half. Only the first call touches the stream.
    pub async fn close(&self) {
        let _ = self.mark_failed();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        match time::timeout(self.config.write_timeout, sink.close()).await {
            Ok(Ok(())) => debug!(conn_id = %self.id, "stream closed"),
            Ok(Err(e)) => debug!(conn_id = %self.id, error = %e, "stream close failed"),
            Err(_) => debug!(conn_id = %self.id, "stream close timed out"),
        }
    }

    /// Run the read loop until a read fails or the connection is no longer active.
    ///
    /// Data frames go to `handler.on_message`; pongs extend the read deadline;
    /// peer pings are answered by the transport. `handler.on_close` runs
    /// exactly once on every exit path, including a panic in `on_message`.
    pub async fn read_pump(
        self: &Arc<Self>,
        mut source: Box<dyn FrameSource>,
        handler: Arc<dyn ConnectionHandler>,
    ) {
        let _guard = CloseGuard {
            conn: self.clone(),
            handler: handler.clone(),
        };

        loop {
            if !self.is_active() {
                handler.on_error(self, &ConnectionError::NotActive);
                break;
            }

            let next = tokio::select! {
                () = self.failed() => continue,
                next = self.read_frame(source.as_mut()) => next,
            };

            match next {
                Ok(Frame::Pong(_)) => self.extend_read_deadline(),
                Ok(Frame::Ping(_)) => {}
                Ok(Frame::Close) => {
                    handler.on_error(self, &ConnectionError::Read(TransportError::Closed));
                    break;
                }
                Ok(frame) => handler.on_message(self, frame).await,
                Err(e) => {
                    handler.on_error(self, &e);
                    break;
                }
            }
        }
    }

    async fn read_frame(&self, source: &mut dyn FrameSource) -> Result<Frame, ConnectionError> {
        let next = match self.read_deadline() {
            Some(deadline) => time::timeout_at(deadline, source.next_frame())
                .await
                .map_err(|_| ConnectionError::ReadTimeout)?,
            None => source.next_frame().await,
        };
        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(ConnectionError::Read(e)),
            None => Err(ConnectionError::Read(TransportError::Closed)),
        }
    }
}

struct CloseGuard {
    conn: Arc<Connection>,
    handler: Arc<dyn ConnectionHandler>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.handler.on_close(&self.conn);
    }
}
