//! Moving-target firewall.
//!
//! Keeps a small, shifting subset of a known port universe open and rotates
//! it on a timer. Every access attempt against a closed port is classified
//! by attack category, logged, attributed to its source and folded into a
//! 0-100 threat level with human-readable attack patterns.
//!
//! - `PolicyState`: port universe and the currently open set
//! - `AccessClassifier`: allow/block/escalate decisions
//! - `SuspiciousSourceTracker`: per-source attempt counts
//! - `ThreatScorer`: threat level and pattern detection
//! - `FirewallEngine`: composes everything behind one lock
//!
//! # Example Configuration
//!
//! ```yaml
//! engine:
//!   ports: [21, 22, 23, 25, 53, 80, 110, 143, 443, 993, 995, 3389, 5432, 3306, 27017]
//!   rotation_interval: 30s
//!   monitor_interval: 2s
//!   seed_ports: 3
//!   escalation_threshold: 2
//!   max_tracked_sources: 10000
//!
//!   history:
//!     rotations: 20
//!     ip_shifts: 15
//!
//!   scoring:
//!     recency_window: 10m
//!     burst_window: 5m
//!     burst_threshold: 10
//! ```

mod classifier;
mod engine;
mod events;
mod history;
mod policy;
mod scheduler;
mod scorer;
mod tracker;
mod types;

pub use classifier::{category_for_port, severity_for, AccessClassifier, Outcome, Rejection};
pub use engine::{EngineStatus, FirewallEngine, SimulatedAttack, SourceCount, StatusStatistics};
pub use events::{Event, EventBus};
pub use history::{tail, BoundedHistory};
pub use policy::{PolicyState, MIN_OPEN_PORTS};
pub use scheduler::SchedulerState;
pub use scorer::{ThreatScorer, MAX_THREAT_LEVEL};
pub use tracker::{SuspiciousSource, SuspiciousSourceTracker};
pub use types::*;
