//! Admin HTTP server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

use crate::bootstrap::{wait_for_drain, Shutdown};
use crate::firewall::FirewallEngine;
use crate::telemetry::Metrics;

use super::handlers::{health_handler, live_handler, metrics_handler, status_handler};

/// Admin server state.
pub struct AdminState {
    /// Server start time
    start_time: Instant,
    /// Is the server healthy
    healthy: AtomicBool,
    engine: FirewallEngine,
    metrics: Arc<Metrics>,
}

impl AdminState {
    pub fn new(engine: FirewallEngine, metrics: Arc<Metrics>) -> Self {
        Self {
            start_time: Instant::now(),
            healthy: AtomicBool::new(true),
            engine,
            metrics,
        }
    }

    /// Get uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if healthy.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Set health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn engine(&self) -> &FirewallEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Admin HTTP server.
pub struct AdminServer {
    listener: TcpListener,
    state: Arc<AdminState>,
    shutdown: Arc<Shutdown>,
}

impl AdminServer {
    /// Bind the admin listener.
    pub async fn bind(
        address: SocketAddr,
        state: Arc<AdminState>,
        shutdown: Arc<Shutdown>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            state,
            shutdown,
        })
    }

    /// Bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Build the router.
    pub fn router(state: Arc<AdminState>) -> Router {
        Router::new()
            .route("/healthz", get(health_handler))
            .route("/livez", get(live_handler))
            .route("/metrics", get(metrics_handler))
            .route("/status", get(status_handler))
            .with_state(state)
    }

    /// Run the admin server until shutdown.
    pub async fn run(self) -> std::io::Result<()> {
        let router = Self::router(self.state.clone());

        info!(address = %self.local_addr()?, "starting admin server");

        let shutdown_rx = self.shutdown.subscribe();

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                wait_for_drain(shutdown_rx).await;
                info!("admin server shutting down");
            })
            .await?;

        Ok(())
    }
}
