use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::admin::{AdminServer, AdminState};
use crate::config::Config;
use crate::firewall::{Event, FirewallEngine};
use crate::telemetry::{counters, Metrics};

use super::shutdown::{wait_for_drain, Shutdown};

/// Main portshift server
///
/// Components:
/// - Firewall engine with its rotation scheduler
/// - Event logger: mirrors engine notifications into the log
/// - Admin server: health, Prometheus metrics and engine status
/// - Shutdown: stops the engine and drains the admin server
pub struct Server {
    /// Configuration
    config: Arc<Config>,

    engine: FirewallEngine,

    metrics: Arc<Metrics>,

    /// Shutdown manager
    shutdown: Arc<Shutdown>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self> {
        let metrics = Metrics::new().context("failed to initialize metrics")?;
        counters::init(&metrics.meter("portshift"));

        let engine = FirewallEngine::new(config.engine.clone())
            .context("failed to create firewall engine")?;

        Ok(Self {
            config: Arc::new(config),
            engine,
            metrics,
            shutdown: Shutdown::new(),
        })
    }

    /// Engine handle
    pub fn engine(&self) -> &FirewallEngine {
        &self.engine
    }

    /// Get shutdown manager
    pub fn shutdown_manager(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Run the server until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run the server until `stop` resolves
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> Result<()> {
        let span = span!(Level::INFO, "portshift", version = env!("CARGO_PKG_VERSION"));

        async move {
            let engine = &self.config.engine;
            info!(
                ports = engine.ports.len(),
                rotation_interval = %humantime::format_duration(engine.rotation_interval),
                escalation_threshold = engine.escalation_threshold,
                seeded = engine.seed.is_some(),
                "starting portshift server"
            );

            let logger = spawn_event_logger(&self.engine, self.shutdown.clone());

            let admin_handle = if self.config.admin.enabled {
                let state = Arc::new(AdminState::new(self.engine.clone(), self.metrics.clone()));
                let server = AdminServer::bind(self.config.admin.address, state, self.shutdown.clone())
                    .await
                    .with_context(|| {
                        format!("failed to bind admin server on {}", self.config.admin.address)
                    })?;

                Some(tokio::spawn(async move {
                    if let Err(e) = server.run().await {
                        error!(error = %e, "admin server failed");
                    }
                }))
            } else {
                info!("admin server disabled");
                None
            };

            self.engine.start().context("failed to start firewall engine")?;

            info!(
                admin_address = %self.config.admin.address,
                admin = self.config.admin.enabled,
                open_ports = ?self.engine.open_ports(),
                "portshift server started"
            );

            stop.await;

            info!("shutdown signal received, starting graceful shutdown");
            self.shutdown.start_drain();

            if let Err(e) = self.engine.stop() {
                warn!(error = %e, "engine was not running at shutdown");
            }

            if let Some(handle) = admin_handle {
                let _ = handle.await;
            }
            let _ = logger.await;

            let status = self.engine.status();
            info!(
                rotations = status.rotation_count,
                attacks = status.attack_count,
                suspicious_sources = status.suspicious_sources.len(),
                threat_level = status.threat.level,
                "final engine state"
            );

            self.shutdown.terminate();

            // Flush tracing
            crate::telemetry::shutdown_tracing();

            info!("portshift server stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Mirror engine events into the log until shutdown.
fn spawn_event_logger(engine: &FirewallEngine, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    let drained = wait_for_drain(shutdown.subscribe());

    tokio::spawn(async move {
        tokio::pin!(drained);
        loop {
            tokio::select! {
                _ = &mut drained => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event logger lagged behind engine");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("event logger stopped");
    })
}

fn log_event(event: &Event) {
    match event {
        Event::Rotated { rotation, ip_shift, threat_level } => info!(
            sequence = rotation.sequence,
            open_ports = ?rotation.open_ports,
            suspicious_sources = ip_shift.suspicious_sources,
            new_sources_last_hour = ip_shift.new_sources_last_hour,
            threat_level,
            "rotation"
        ),
        Event::SourceEscalated { attack, attempts } => warn!(
            source = %attack.source,
            port = attack.port,
            attempts,
            "source escalated to decoy"
        ),
        Event::Monitoring(threat) => debug!(
            threat_level = threat.level,
            patterns = ?threat.patterns,
            recent_attacks = threat.counters.recent_attacks,
            "threat heartbeat"
        ),
        other => debug!(kind = other.kind(), "engine event"),
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::SchedulerState;

    #[tokio::test]
    async fn test_run_until_stops_engine() {
        let mut config = Config::default();
        config.admin.enabled = false;
        config.engine.seed = Some(11);

        let server = Server::new(config).unwrap();
        let engine = server.engine().clone();
        let shutdown = server.shutdown_manager();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        tokio::task::yield_now().await;
        while engine.scheduler_state() != SchedulerState::Running {
            tokio::task::yield_now().await;
        }

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(engine.scheduler_state(), SchedulerState::Idle);
        assert_eq!(shutdown.state(), crate::bootstrap::ShutdownState::Terminated);
    }
}
