//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown of the listener and live connections.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop accepting, close every live connection, then drain `handles`.
    ///
    /// 1. Cancel the token (the listener stops accepting)
    /// 2. Close all connections through the registry so read loops end
    /// 3. Wait up to `timeout` for the handles to complete
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        match registry.close_all().await {
            Ok(closed) => info!(closed, "connections closed for shutdown"),
            Err(e) => warn!(error = %e, "could not close connections"),
        }

        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::testing::connection;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::default();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_is_idempotent_and_reaches_tokens() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_connections_and_awaits_tasks() {
        let coord = ShutdownCoordinator::new();
        let (registry, _task) = ConnectionRegistry::spawn();
        let (conn, probe) = connection(1, "alice");
        registry.register(conn.clone()).unwrap();

        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        coord.graceful_shutdown(&registry, vec![handle], None).await;

        assert!(coord.is_shutting_down());
        assert!(!conn.is_active());
        assert_eq!(probe.close_calls(), 1);
        assert_eq!(registry.connection_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let (registry, _task) = ConnectionRegistry::spawn();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(&registry, vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_tolerates_stopped_registry() {
        let coord = ShutdownCoordinator::new();
        let (registry, task) = ConnectionRegistry::spawn();
        task.abort();
        let _ = task.await;

        coord.graceful_shutdown(&registry, Vec::new(), None).await;
        assert!(coord.is_shutting_down());
    }
}
