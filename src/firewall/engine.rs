//! Firewall engine facade.
//!
//! Composes the policy, classifier, tracker, scorer and scheduler behind a
//! single engine-wide lock. Every mutation and every status read takes the
//! same lock, so a recompute never observes a half-applied rejection or
//! rotation. Snapshots are owned copies.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::classifier::{category_for_port, AccessClassifier, Outcome, Rejection};
use super::events::{Event, EventBus};
use super::history::{tail, BoundedHistory};
use super::policy::PolicyState;
use super::scheduler::{RotationScheduler, SchedulerState};
use super::scorer::{count_within, window_start, ThreatScorer};
use super::tracker::{SuspiciousSource, SuspiciousSourceTracker};
use super::types::*;
use crate::telemetry::counters;

/// Window used for the "new sources" figure of an IP-shift record.
const NEW_SOURCE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Ports tried when every universe port is open and a simulated attack needs
/// a closed target.
const FALLBACK_PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;

/// Unset fields are filled with random but valid values.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAttack {
    pub source: Option<IpAddr>,
    pub port: Option<u16>,
    pub category: Option<AttackCategory>,
}

/// Attempt count for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source: IpAddr,
    pub count: u64,
}

/// Derived statistics included in a status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusStatistics {
    /// Attacks inside the recency window
    pub recent_attack_count: usize,
    pub top_attacking_sources: Vec<SourceCount>,
    /// Category counts over the most recent attacks
    pub attack_type_distribution: BTreeMap<String, usize>,
    pub allowed_requests: u64,
    pub escalated_requests: u64,
    pub evicted_sources: u64,
}

/// Point-in-time copy of the engine state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub open_ports: Vec<u16>,
    pub universe: Vec<u16>,
    pub rotation_interval_secs: u64,
    pub scheduler: SchedulerState,
    pub attack_count: usize,
    pub suspicious_sources: Vec<SuspiciousSource>,
    pub recent_attacks: Vec<AttackEvent>,
    pub rotation_count: u64,
    pub port_history: Vec<RotationRecord>,
    pub ip_shift_history: Vec<IpShiftRecord>,
    pub threat: ThreatState,
    pub threat_timeline: Vec<ThreatSample>,
    pub statistics: StatusStatistics,
}

/// Everything guarded by the engine lock.
struct EngineState {
    policy: PolicyState,
    attack_log: Vec<AttackEvent>,
    tracker: SuspiciousSourceTracker,
    rotations: BoundedHistory<RotationRecord>,
    ip_shifts: BoundedHistory<IpShiftRecord>,
    threat_samples: BoundedHistory<ThreatSample>,
    threat: ThreatState,
    /// Generation of the running scheduler, if any
    running: Option<u64>,
    rng: StdRng,
    allowed: u64,
    escalations: u64,
}

impl EngineState {
    fn is_running(&self, generation: u64) -> bool {
        self.running == Some(generation)
    }

    fn rescore(&mut self, scorer: &ThreatScorer, now: DateTime<Utc>) {
        self.threat = scorer.recompute(&self.attack_log, &self.tracker, now);
        counters::threat_level_set(self.threat.level);
        counters::suspicious_sources_set(self.tracker.len());
    }

    fn apply_rejection(&mut self, rejection: &Rejection, scorer: &ThreatScorer, now: DateTime<Utc>) {
        if rejection.decision == Decision::BlockedEscalate {
            self.escalations += 1;
        }
        self.rescore(scorer, now);
    }

    fn apply_rotation(
        &mut self,
        scorer: &ThreatScorer,
        now: DateTime<Utc>,
    ) -> (RotationRecord, IpShiftRecord) {
        let rotation = self.policy.rotate(&mut self.rng, now);
        self.rotations.push(rotation.clone());

        let ip_shift = IpShiftRecord {
            timestamp: now,
            suspicious_sources: self.tracker.len(),
            new_sources_last_hour: self.tracker.count_new_since(now, NEW_SOURCE_WINDOW),
            total_attacks: self.attack_log.len(),
        };
        self.ip_shifts.push(ip_shift.clone());

        self.rescore(scorer, now);
        self.threat_samples.push(ThreatSample {
            timestamp: now,
            level: self.threat.level,
            total_attacks: self.attack_log.len(),
        });

        counters::rotation();
        counters::open_ports_set(self.policy.open_count());

        info!(
            sequence = rotation.sequence,
            closed = ?rotation.closed,
            opened = ?rotation.opened,
            open_ports = ?rotation.open_ports,
            threat_level = self.threat.level,
            "ports rotated"
        );

        (rotation, ip_shift)
    }

    /// Random closed target for a simulated attack, or `None` when every
    /// candidate port is open.
    fn random_closed_port(&mut self) -> Option<u16> {
        let closed = self.policy.closed_ports();
        if !closed.is_empty() {
            return Some(closed[self.rng.random_range(0..closed.len())]);
        }

        let policy = &self.policy;
        let candidates: Vec<u16> = FALLBACK_PORT_RANGE.filter(|p| !policy.is_open(*p)).collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.random_range(0..candidates.len())])
    }

    fn random_source(&mut self) -> IpAddr {
        let mut octet = || self.rng.random_range(1..=255u8);
        IpAddr::V4(Ipv4Addr::new(octet(), octet(), octet(), octet()))
    }
}

/// State shared between engine handles and the scheduler task.
pub(crate) struct Shared {
    config: EngineConfig,
    classifier: AccessClassifier,
    scorer: ThreatScorer,
    state: Mutex<EngineState>,
    /// Lock order: `scheduler` before `state`
    scheduler: Mutex<RotationScheduler>,
    events: Arc<EventBus>,
}

impl Shared {
    fn publish_rejection(&self, rejection: Rejection) {
        match rejection.decision {
            Decision::BlockedEscalate => {
                counters::escalation();
                self.events.publish(Event::SourceEscalated {
                    attack: rejection.event,
                    attempts: rejection.attempts,
                });
            }
            _ => self.events.publish(Event::AttackBlocked(rejection.event)),
        }
    }

    /// One timed rotation. Returns `false` when `generation` is no longer
    /// the running one.
    pub(crate) fn rotation_tick(&self, generation: u64) -> bool {
        let now = Utc::now();
        let (rotation, ip_shift, threat_level) = {
            let mut state = self.state.lock();
            if !state.is_running(generation) {
                return false;
            }
            let (rotation, ip_shift) = state.apply_rotation(&self.scorer, now);
            (rotation, ip_shift, state.threat.level)
        };

        self.events.publish(Event::Rotated {
            rotation,
            ip_shift,
            threat_level,
        });
        true
    }

    /// One monitoring heartbeat. Returns `false` when `generation` is no
    /// longer the running one.
    pub(crate) fn monitor_tick(&self, generation: u64) -> bool {
        let threat = {
            let state = self.state.lock();
            if !state.is_running(generation) {
                return false;
            }
            state.threat.clone()
        };

        self.events.publish(Event::Monitoring(threat));
        true
    }
}

/// Port rotation and threat scoring engine.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct FirewallEngine {
    shared: Arc<Shared>,
}

impl FirewallEngine {
    /// Create an engine with an initial seeded open set. The scheduler
    /// starts idle.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut policy = PolicyState::new(&config.ports);
        policy.seed(config.seed_ports, &mut rng);

        let scorer = ThreatScorer::new(config.scoring.clone());
        let tracker = SuspiciousSourceTracker::new(config.max_tracked_sources);
        let threat = scorer.recompute(&[], &tracker, Utc::now());

        let state = EngineState {
            rotations: BoundedHistory::new(config.history.rotations),
            ip_shifts: BoundedHistory::new(config.history.ip_shifts),
            threat_samples: BoundedHistory::new(config.history.threat_samples),
            policy,
            attack_log: Vec::new(),
            tracker,
            threat,
            running: None,
            rng,
            allowed: 0,
            escalations: 0,
        };

        counters::open_ports_set(state.policy.open_count());

        info!(
            universe = ?config.ports,
            open_ports = ?state.policy.open_ports(),
            rotation_interval = %humantime::format_duration(config.rotation_interval),
            seeded = config.seed.is_some(),
            "firewall engine created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                classifier: AccessClassifier::new(config.escalation_threshold),
                scheduler: Mutex::new(RotationScheduler::new(
                    config.rotation_interval,
                    config.monitor_interval,
                )),
                events: EventBus::new(config.event_capacity),
                scorer,
                state: Mutex::new(state),
                config,
            }),
        })
    }

    /// Check an access attempt with typed inputs.
    pub fn check(&self, source: IpAddr, port: u16) -> Decision {
        let shared = &*self.shared;
        let now = Utc::now();

        let outcome = {
            let mut guard = shared.state.lock();
            let state = &mut *guard;
            let level = state.threat.level;
            let outcome = shared.classifier.check(
                &state.policy,
                &mut state.tracker,
                &mut state.attack_log,
                source,
                port,
                level,
                now,
            );
            match &outcome {
                Outcome::Allowed => state.allowed += 1,
                Outcome::Rejected(rejection) => state.apply_rejection(rejection, &shared.scorer, now),
            }
            outcome
        };

        let decision = outcome.decision();
        counters::access_check(decision);
        if let Outcome::Rejected(rejection) = outcome {
            counters::attack_recorded(rejection.event.category, rejection.event.severity);
            shared.publish_rejection(rejection);
        }
        decision
    }

    /// Check an access attempt supplied as text and a raw port number.
    pub fn check_access(&self, source: &str, port: i64) -> Result<Decision, EngineError> {
        let source = parse_source(source)?;
        let port = parse_port(port)?;
        Ok(self.check(source, port))
    }

    /// Log a synthetic attack through the regular rejection path.
    pub fn simulate(&self, request: SimulatedAttack) -> Result<AttackEvent, EngineError> {
        let shared = &*self.shared;
        let now = Utc::now();

        let rejection = {
            let mut guard = shared.state.lock();
            let state = &mut *guard;

            let port = match request.port {
                Some(port) if !state.policy.in_universe(port) => {
                    return Err(EngineError::InvalidArgument(format!(
                        "port {port} is not in the port universe"
                    )));
                }
                Some(port) => port,
                None => state.random_closed_port().ok_or_else(|| {
                    EngineError::InvalidArgument("no closed port available".to_string())
                })?,
            };
            let source = match request.source {
                Some(source) => source,
                None => state.random_source(),
            };
            let category = request.category.unwrap_or_else(|| category_for_port(port));

            let level = state.threat.level;
            let rejection = shared.classifier.reject(
                &mut state.tracker,
                &mut state.attack_log,
                source,
                port,
                category,
                level,
                now,
            );
            state.apply_rejection(&rejection, &shared.scorer, now);
            rejection
        };

        let event = rejection.event.clone();
        counters::attack_recorded(event.category, event.severity);
        shared.publish_rejection(rejection);
        Ok(event)
    }

    /// Text-input variant of [`FirewallEngine::simulate`].
    pub fn simulate_attack(
        &self,
        source: Option<&str>,
        port: Option<i64>,
        category: Option<&str>,
    ) -> Result<AttackEvent, EngineError> {
        let request = SimulatedAttack {
            source: source.map(parse_source).transpose()?,
            port: port.map(parse_port).transpose()?,
            category: category.map(str::parse).transpose()?,
        };
        self.simulate(request)
    }

    /// Start the rotation scheduler.
    ///
    /// Reseeds the open set immediately, then rotates every
    /// `rotation_interval`. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let shared = &*self.shared;
        let runtime = Handle::try_current().map_err(|e| EngineError::Runtime(e.to_string()))?;

        let mut scheduler = shared.scheduler.lock();
        if scheduler.state() == SchedulerState::Running {
            return Err(EngineError::AlreadyRunning);
        }
        let generation = scheduler.next_generation();

        let open_ports = {
            let mut guard = shared.state.lock();
            let state = &mut *guard;
            let open_ports = state.policy.seed(shared.config.seed_ports, &mut state.rng);
            state.running = Some(generation);
            state.rescore(&shared.scorer, Utc::now());
            open_ports
        };
        counters::open_ports_set(open_ports.len());

        scheduler.spawn(&runtime, Arc::downgrade(&self.shared), generation);

        // Published under the scheduler lock so Started/Stopped follow state order
        info!(generation, open_ports = ?open_ports, "firewall engine started");
        shared.events.publish(Event::Started { open_ports });
        drop(scheduler);
        Ok(())
    }

    /// Stop the rotation scheduler. No rotation happens after this returns;
    /// the engine stays queryable.
    pub fn stop(&self) -> Result<(), EngineError> {
        let shared = &*self.shared;
        let mut scheduler = shared.scheduler.lock();
        let generation = scheduler.stop().ok_or(EngineError::NotStarted)?;
        shared.state.lock().running = None;

        info!(generation, "firewall engine stopped");
        shared.events.publish(Event::Stopped);
        drop(scheduler);
        Ok(())
    }

    /// Rotate immediately, outside the timer. Requires a running scheduler.
    pub fn rotate_now(&self) -> Result<RotationRecord, EngineError> {
        let shared = &*self.shared;
        let now = Utc::now();

        let (rotation, ip_shift, threat_level) = {
            let mut state = shared.state.lock();
            if state.running.is_none() {
                return Err(EngineError::NotStarted);
            }
            let (rotation, ip_shift) = state.apply_rotation(&shared.scorer, now);
            (rotation, ip_shift, state.threat.level)
        };

        shared.events.publish(Event::Rotated {
            rotation: rotation.clone(),
            ip_shift,
            threat_level,
        });
        Ok(rotation)
    }

    /// Consistent snapshot of the engine state.
    pub fn status(&self) -> EngineStatus {
        self.status_at(Utc::now())
    }

    pub(crate) fn status_at(&self, now: DateTime<Utc>) -> EngineStatus {
        let shared = &*self.shared;
        let history = &shared.config.history;
        let scheduler = shared.scheduler.lock().state();
        let state = shared.state.lock();

        let mut distribution = BTreeMap::new();
        for attack in state
            .attack_log
            .iter()
            .rev()
            .take(history.distribution_window)
        {
            *distribution.entry(attack.category.to_string()).or_insert(0) += 1;
        }

        EngineStatus {
            open_ports: state.policy.open_ports(),
            universe: state.policy.universe().to_vec(),
            rotation_interval_secs: shared.config.rotation_interval.as_secs(),
            scheduler,
            attack_count: state.attack_log.len(),
            suspicious_sources: state.tracker.snapshot(),
            recent_attacks: tail(&state.attack_log, history.status_attacks),
            rotation_count: state.policy.rotation_count(),
            port_history: state.rotations.recent_cloned(history.status_rotations),
            ip_shift_history: state.ip_shifts.recent_cloned(history.status_ip_shifts),
            threat: state.threat.clone(),
            threat_timeline: state.threat_samples.recent_cloned(history.threat_samples),
            statistics: StatusStatistics {
                recent_attack_count: count_within(
                    &state.attack_log,
                    window_start(now, shared.scorer.config().recency_window),
                ),
                top_attacking_sources: state
                    .tracker
                    .top_sources(history.top_sources)
                    .into_iter()
                    .map(|(source, count)| SourceCount { source, count })
                    .collect(),
                attack_type_distribution: distribution,
                allowed_requests: state.allowed,
                escalated_requests: state.escalations,
                evicted_sources: state.tracker.evicted(),
            },
        }
    }

    /// Current threat state.
    pub fn threat(&self) -> ThreatState {
        self.shared.state.lock().threat.clone()
    }

    /// Sorted copy of the open port set.
    pub fn open_ports(&self) -> Vec<u16> {
        self.shared.state.lock().policy.open_ports()
    }

    /// Attempt record for one source.
    pub fn source(&self, source: &IpAddr) -> Option<SuspiciousSource> {
        self.shared.state.lock().tracker.get(source).cloned()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.shared.scheduler.lock().state()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Event bus handle.
    pub fn events(&self) -> Arc<EventBus> {
        self.shared.events.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for FirewallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallEngine")
            .field("ports", &self.shared.config.ports)
            .field("scheduler", &self.scheduler_state())
            .finish()
    }
}

fn parse_source(source: &str) -> Result<IpAddr, EngineError> {
    source.trim().parse().map_err(|_| {
        warn!(source, "rejecting malformed source address");
        EngineError::InvalidArgument(format!("malformed source address: {source:?}"))
    })
}

fn parse_port(port: i64) -> Result<u16, EngineError> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(EngineError::InvalidArgument(format!(
            "port out of range 1-65535: {port}"
        ))),
    }
}
