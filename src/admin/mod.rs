//! Admin HTTP API using Axum.
//!
//! Provides endpoints for:
//! - Health checks (/healthz, /livez)
//! - Metrics (/metrics)
//! - Engine status (/status)

mod handlers;
mod server;

pub use handlers::{health_handler, live_handler, metrics_handler, status_handler, HealthResponse};
pub use server::{AdminServer, AdminState};
