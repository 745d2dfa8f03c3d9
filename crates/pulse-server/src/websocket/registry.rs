//! Connection registry: the authoritative live set.
//!
//! Every membership change and every delivery pass is a [`Command`] sent to a
//! single coordinating task, which owns the map outright. Callers submit
//! concurrently; the task applies commands one at a time, so register,
//! unregister, broadcast, and targeted sends happen in one total order.
//!
//! Delivery passes write to each target in turn through the connection's own
//! write path. A slow peer delays the peers after it in the same pass (bounded
//! by the write deadline). The command queue is unbounded.

use std::collections::HashMap;
use std::sync::Arc;

use pulse_core::{ConnectionId, ConnectionIdAllocator, RegistryError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::frame::Frame;
use crate::metrics::{
    WS_BROADCASTS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_WRITE_FAILURES_TOTAL,
};

/// Outcome of one delivery pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections a write was attempted on.
    pub attempted: usize,
    /// Writes that succeeded.
    pub delivered: usize,
    /// Connections closed and removed because their write failed.
    pub removed: usize,
}

enum Command {
    Register(Arc<Connection>),
    Unregister(ConnectionId),
    Broadcast {
        payload: Frame,
        reply: Option<oneshot::Sender<DeliveryReport>>,
    },
    SendToIdentity {
        identity: String,
        payload: Frame,
        reply: oneshot::Sender<DeliveryReport>,
    },
    Count(oneshot::Sender<usize>),
    Identities(oneshot::Sender<Vec<(ConnectionId, String)>>),
    CloseAll(oneshot::Sender<usize>),
}

/// Cheap-clone handle to the coordinating task.
#[derive(Clone, Debug)]
pub struct ConnectionRegistry {
    tx: mpsc::UnboundedSender<Command>,
    ids: Arc<ConnectionIdAllocator>,
}

impl ConnectionRegistry {
    /// Start the coordinating task and return a handle to it.
    ///
    /// The task runs until every handle has been dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(RegistryTask::new(rx).run());
        let registry = Self {
            tx,
            ids: Arc::new(ConnectionIdAllocator::new()),
        };
        (registry, task)
    }

    /// Allocate the id for a connection about to be opened.
    pub fn next_id(&self) -> ConnectionId {
        self.ids.next_id()
    }

    /// Add `conn` to the live set. Re-registering the same connection is a no-op.
    pub fn register(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        self.submit(Command::Register(conn))
    }

    /// Close and remove the connection with `id`. Absent ids are ignored.
    pub fn unregister(&self, id: ConnectionId) -> Result<(), RegistryError> {
        self.submit(Command::Unregister(id))
    }

    /// Queue `payload` for every live connection and return without waiting.
    pub fn broadcast(&self, payload: Frame) -> Result<(), RegistryError> {
        self.submit(Command::Broadcast {
            payload,
            reply: None,
        })
    }

    /// Deliver `payload` to every live connection and wait for the pass to finish.
    pub async fn broadcast_and_wait(&self, payload: Frame) -> Result<DeliveryReport, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Broadcast {
            payload,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    /// Deliver `payload` to every live connection owned by `identity`.
    ///
    /// Targets whose write fails are closed and removed in the same pass.
    pub async fn send_to_identity(
        &self,
        identity: &str,
        payload: Frame,
    ) -> Result<DeliveryReport, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SendToIdentity {
            identity: identity.to_owned(),
            payload,
            reply,
        })?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Count(reply))?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    /// `(id, identity)` of every live connection, ordered by id.
    pub async fn identities(&self) -> Result<Vec<(ConnectionId, String)>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Identities(reply))?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    /// Close and remove every live connection. Returns how many were closed.
    pub async fn close_all(&self) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::CloseAll(reply))?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    fn submit(&self, command: Command) -> Result<(), RegistryError> {
        self.tx.send(command).map_err(|_| RegistryError::Stopped)
    }
}

/// State owned by the coordinating task.
struct RegistryTask {
    rx: mpsc::UnboundedReceiver<Command>,
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

impl RegistryTask {
    fn new(rx: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            rx,
            connections: HashMap::new(),
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
        debug!(remaining = self.connections.len(), "connection registry stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register(conn) => self.insert(conn),
            Command::Unregister(id) => {
                let _ = self.remove(id).await;
            }
            Command::Broadcast { payload, reply } => {
                ::metrics::counter!(WS_BROADCASTS_TOTAL).increment(1);
                let report = self.deliver(&payload, |_| true).await;
                debug!(
                    attempted = report.attempted,
                    delivered = report.delivered,
                    removed = report.removed,
                    "broadcast pass complete"
                );
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            Command::SendToIdentity {
                identity,
                payload,
                reply,
            } => {
                let report = self.deliver(&payload, |c| c.identity() == identity).await;
                debug!(
                    identity = %identity,
                    attempted = report.attempted,
                    delivered = report.delivered,
                    removed = report.removed,
                    "targeted send complete"
                );
                let _ = reply.send(report);
            }
            Command::Count(reply) => {
                let _ = reply.send(self.connections.len());
            }
            Command::Identities(reply) => {
                let mut entries: Vec<_> = self
                    .connections
                    .values()
                    .map(|c| (c.id(), c.identity().to_owned()))
                    .collect();
                entries.sort_by_key(|(id, _)| *id);
                let _ = reply.send(entries);
            }
            Command::CloseAll(reply) => {
                let ids: Vec<_> = self.connections.keys().copied().collect();
                let mut closed = 0;
                for id in ids {
                    if self.remove(id).await {
                        closed += 1;
                    }
                }
                info!(closed, "closed all connections");
                let _ = reply.send(closed);
            }
        }
    }

    fn insert(&mut self, conn: Arc<Connection>) {
        let id = conn.id();
        if self.connections.insert(id, conn).is_none() {
            ::metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
            self.update_gauge();
            debug!(conn_id = %id, live = self.connections.len(), "connection registered");
        }
    }

    /// Close and drop `id` if present. Returns whether it was present.
    async fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        conn.close().await;
        ::metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        self.update_gauge();
        debug!(
            conn_id = %id,
            identity = conn.identity(),
            live = self.connections.len(),
            "connection unregistered"
        );
        true
    }

    /// Write `payload` to each live connection matching `filter`, one at a time.
    async fn deliver(
        &mut self,
        payload: &Frame,
        filter: impl Fn(&Connection) -> bool,
    ) -> DeliveryReport {
        let targets: Vec<Arc<Connection>> = self
            .connections
            .values()
            .filter(|c| filter(c))
            .cloned()
            .collect();

        let mut report = DeliveryReport::default();
        for conn in targets {
            report.attempted += 1;
            match conn.send_message(payload.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    ::metrics::counter!(WS_WRITE_FAILURES_TOTAL).increment(1);
                    warn!(
                        conn_id = %conn.id(),
                        identity = conn.identity(),
                        error = %e,
                        "delivery failed, removing connection"
                    );
                    if self.remove(conn.id()).await {
                        report.removed += 1;
                    }
                }
            }
        }
        report
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauge(&self) {
        ::metrics::gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
    }
}
