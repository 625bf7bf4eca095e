use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{AttackEvent, IpShiftRecord, RotationRecord, ThreatState};

/// Engine notifications, published once per state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Scheduler started with a freshly seeded open set
    Started { open_ports: Vec<u16> },

    /// Scheduler stopped
    Stopped,

    /// Rotation tick completed
    Rotated {
        rotation: RotationRecord,
        ip_shift: IpShiftRecord,
        threat_level: u8,
    },

    /// Access attempt blocked
    AttackBlocked(AttackEvent),

    /// Access attempt blocked and the source should be redirected to a decoy
    SourceEscalated { attack: AttackEvent, attempts: u64 },

    /// Periodic threat heartbeat
    Monitoring(ThreatState),
}

impl Event {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::Stopped => "stopped",
            Event::Rotated { .. } => "rotated",
            Event::AttackBlocked(_) => "attack_blocked",
            Event::SourceEscalated { .. } => "source_escalated",
            Event::Monitoring(_) => "monitoring",
        }
    }
}

/// Engine event bus.
///
/// Uses a broadcast channel so any number of collaborators can subscribe.
/// Publishing never blocks; a subscriber that falls behind loses the oldest
/// events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        debug!(kind = event.kind(), "publishing event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}
