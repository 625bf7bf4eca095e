//! Threat level aggregation and pattern detection.
//!
//! The threat state is recomputed from scratch on every attack and every
//! rotation. Given the same attack log, source set and `now`, the result is
//! identical; nothing here draws randomness.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::tracker::SuspiciousSourceTracker;
use super::types::{AttackCategory, AttackEvent, RealtimeStats, ScoringConfig, ThreatState};

/// Upper bound of the threat level.
pub const MAX_THREAT_LEVEL: u64 = 100;

/// Start of a look-back window, or `None` when it reaches past the
/// representable range (everything is inside the window).
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(window).ok()?;
    now.checked_sub_signed(delta)
}

pub(crate) fn count_within(attacks: &[AttackEvent], start: Option<DateTime<Utc>>) -> usize {
    match start {
        Some(start) => attacks.iter().filter(|a| a.timestamp > start).count(),
        None => attacks.len(),
    }
}

/// Pattern candidate ordered by the log position of its latest event.
struct Candidate {
    latest: usize,
    description: String,
}

/// Computes [`ThreatState`] from the attack log and source tracker.
#[derive(Debug, Clone, Default)]
pub struct ThreatScorer {
    config: ScoringConfig,
}

impl ThreatScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Recompute the threat state.
    pub fn recompute(
        &self,
        attacks: &[AttackEvent],
        sources: &SuspiciousSourceTracker,
        now: DateTime<Utc>,
    ) -> ThreatState {
        let cfg = &self.config;

        let recent = count_within(attacks, window_start(now, cfg.recency_window));
        let burst = count_within(attacks, window_start(now, cfg.burst_window));

        let base = cfg
            .attack_weight
            .saturating_mul(attacks.len() as u64)
            .saturating_add(cfg.source_weight.saturating_mul(sources.len() as u64))
            .min(cfg.base_cap);
        let bonus = cfg
            .recency_weight
            .saturating_mul(recent as u64)
            .min(cfg.recency_cap);
        let level = base.saturating_add(bonus).min(MAX_THREAT_LEVEL) as u8;

        ThreatState {
            level,
            patterns: self.detect_patterns(attacks, burst, now),
            counters: RealtimeStats {
                blocked_requests: attacks.len() as u64,
                recent_attacks: recent,
                burst_attacks: burst,
            },
            computed_at: Some(now),
        }
    }

    /// Heuristic patterns, most recent first, capped at `max_patterns`.
    fn detect_patterns(
        &self,
        attacks: &[AttackEvent],
        burst: usize,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let cfg = &self.config;
        let mut candidates = Vec::new();

        if burst > cfg.burst_threshold {
            let start = window_start(now, cfg.burst_window);
            let latest = attacks
                .iter()
                .rposition(|a| start.map_or(true, |s| a.timestamp > s))
                .unwrap_or(0);
            candidates.push(Candidate {
                latest,
                description: "High frequency attack pattern detected".to_string(),
            });
        }

        // (count, log index of latest event, first appearance)
        let mut scans: HashMap<IpAddr, (usize, usize, usize)> = HashMap::new();
        for (idx, attack) in attacks.iter().enumerate() {
            if attack.category != AttackCategory::PortScanning {
                continue;
            }
            let entry = scans.entry(attack.source).or_insert((0, idx, idx));
            entry.0 += 1;
            entry.1 = idx;
        }

        let mut scanners: Vec<_> = scans
            .into_iter()
            .filter(|(_, (count, _, _))| *count > cfg.port_scan_threshold)
            .collect();
        scanners.sort_by_key(|(_, (_, _, first))| *first);
        candidates.extend(scanners.into_iter().map(|(source, (count, latest, _))| Candidate {
            latest,
            description: format!("Port scanning pattern detected from {source} ({count} attempts)"),
        }));

        candidates.sort_by(|a, b| b.latest.cmp(&a.latest));

        let mut patterns: Vec<String> = Vec::with_capacity(cfg.max_patterns);
        for candidate in candidates {
            if patterns.len() == cfg.max_patterns {
                break;
            }
            if !patterns.contains(&candidate.description) {
                patterns.push(candidate.description);
            }
        }
        patterns
    }
}
