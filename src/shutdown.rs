//! Graceful shutdown coordination
//!
//! Shutdown runs in phases, each bounded by its own timeout:
//!
//! 1. **Stop Accepting** - the shutdown token is cancelled and the HTTP server
//!    stops taking new connections
//! 2. **Drain** - in-flight requests finish (driven by axum's graceful shutdown)
//! 3. **Close Connection** - registered handlers run; the store client is released
//!
//! The whole sequence is capped by `total_timeout`; past it the coordinator
//! reports a forced shutdown.

use crate::connection::ConnectionManager;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for in-flight requests
    pub drain_timeout: Duration,
    /// Upper bound on running shutdown handlers
    pub close_timeout: Duration,
    /// Total maximum shutdown time before force termination
    pub total_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(25),
            close_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(30),
        }
    }
}

impl ShutdownConfig {
    /// Scale the phase budgets to a total, keeping five seconds (or a sixth of
    /// the total, if smaller) for closing the store.
    pub fn with_total_timeout(mut self, timeout_secs: u64) -> Self {
        self.total_timeout = Duration::from_secs(timeout_secs);
        self.close_timeout = Duration::from_secs(5.min(timeout_secs / 6).max(1));
        self.drain_timeout = self.total_timeout.saturating_sub(self.close_timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    StopAccepting,
    Draining,
    ClosingConnection,
    Complete,
    /// A phase exceeded its budget
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StopAccepting => write!(f, "stop_accepting"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::ClosingConnection => write!(f, "closing_connection"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

/// Coordinates graceful shutdown across server components
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: Arc<RwLock<ShutdownPhase>>,
    shutdown_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the shutdown token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            },
            _ = self.shutdown_token.cancelled() => {
                debug!("shutdown requested programmatically");
            },
        }
        self.begin().await;
    }

    /// Phase 1: stop accepting work.
    pub async fn begin(&self) {
        let mut phase = self.phase.write().await;
        if *phase == ShutdownPhase::Running {
            *phase = ShutdownPhase::StopAccepting;
            info!("shutdown phase 1: no longer accepting requests");
        }
        self.shutdown_token.cancel();
    }

    /// Phase 2: wait for the server to drain, bounded by `drain_timeout`.
    ///
    /// Returns the server's own result, or `None` when draining timed out.
    pub async fn drain<F, T>(&self, server: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        *self.phase.write().await = ShutdownPhase::Draining;
        info!("shutdown phase 2: draining in-flight requests");
        match timeout(self.config.drain_timeout, server).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(
                    timeout_secs = self.config.drain_timeout.as_secs(),
                    "drain timeout reached, abandoning in-flight requests"
                );
                *self.phase.write().await = ShutdownPhase::Forced;
                None
            }
        }
    }

    /// Phase 3: run `handler`, bounded by `close_timeout`.
    pub async fn close(&self, handler: &dyn ShutdownHandler) -> Result<()> {
        let forced = *self.phase.read().await == ShutdownPhase::Forced;
        if !forced {
            *self.phase.write().await = ShutdownPhase::ClosingConnection;
        }
        info!("shutdown phase 3: closing connections");

        match timeout(self.config.close_timeout, handler.shutdown()).await {
            Ok(Ok(())) => {
                if !forced {
                    *self.phase.write().await = ShutdownPhase::Complete;
                }
                info!("graceful shutdown completed");
                Ok(())
            }
            Ok(Err(err)) => {
                error!(error = %err, "shutdown handler failed");
                *self.phase.write().await = ShutdownPhase::Forced;
                Err(err)
            }
            Err(_) => {
                error!(
                    timeout_secs = self.config.close_timeout.as_secs(),
                    "closing connections exceeded its timeout"
                );
                *self.phase.write().await = ShutdownPhase::Forced;
                Err(anyhow::anyhow!("shutdown timeout exceeded"))
            }
        }
    }
}

/// Trait for components that need graceful shutdown
#[async_trait::async_trait]
pub trait ShutdownHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn shutdown(&self) -> Result<()>;
}

/// Releases the store client held by the connection manager.
pub struct ConnectionShutdownHandler {
    manager: Arc<ConnectionManager>,
}

impl ConnectionShutdownHandler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for ConnectionShutdownHandler {
    fn name(&self) -> &'static str {
        "connection"
    }

    async fn shutdown(&self) -> Result<()> {
        self.manager.shutdown().await;
        Ok(())
    }
}

/// Runs multiple handlers in sequence; one failing does not stop the rest.
#[derive(Default)]
pub struct CompositeShutdownHandler {
    handlers: Vec<Box<dyn ShutdownHandler>>,
}

impl CompositeShutdownHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Box<dyn ShutdownHandler>) {
        self.handlers.push(handler);
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for CompositeShutdownHandler {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn shutdown(&self) -> Result<()> {
        let mut failed = Vec::new();
        for handler in &self.handlers {
            if let Err(e) = handler.shutdown().await {
                error!(handler = handler.name(), "shutdown handler error: {}", e);
                failed.push(handler.name());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("shutdown handlers failed: {}", failed.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_shutdown_config_scaling() {
        let config = ShutdownConfig::default().with_total_timeout(60);
        assert_eq!(config.total_timeout, Duration::from_secs(60));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(55));

        let config = ShutdownConfig::default().with_total_timeout(6);
        assert_eq!(config.close_timeout, Duration::from_secs(1));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(ShutdownPhase::Draining.to_string(), "draining");
        assert_eq!(
            ShutdownPhase::ClosingConnection.to_string(),
            "closing_connection"
        );
        assert_eq!(ShutdownPhase::Forced.to_string(), "forced");
    }

    #[tokio::test]
    async fn test_phases_close_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let handle = manager.attach(Arc::new(InMemoryStore::new())).unwrap();
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        assert_eq!(coordinator.phase().await, ShutdownPhase::Running);

        let token = coordinator.token();
        coordinator.begin().await;
        assert!(token.is_cancelled());
        assert!(coordinator.is_shutdown_initiated());

        assert_eq!(coordinator.drain(async { 7 }).await, Some(7));

        let mut composite = CompositeShutdownHandler::new();
        composite.add_handler(Box::new(ConnectionShutdownHandler::new(manager.clone())));
        coordinator.close(&composite).await.unwrap();

        assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
        assert!(!handle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_forces() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default().with_total_timeout(6));
        let stuck = coordinator.drain(std::future::pending::<()>()).await;
        assert!(stuck.is_none());
        assert_eq!(coordinator.phase().await, ShutdownPhase::Forced);
    }
}
