//! Access classification.
//!
//! Static port → category and category → severity tables, plus the
//! rejection path that logs attacks and updates the source tracker.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::policy::PolicyState;
use super::tracker::SuspiciousSourceTracker;
use super::types::{AttackAction, AttackCategory, AttackEvent, Decision, Severity};

/// Category for an attempt on a closed port.
pub fn category_for_port(port: u16) -> AttackCategory {
    match port {
        22 => AttackCategory::SshBruteForce,
        23 => AttackCategory::TelnetAttack,
        25 => AttackCategory::SmtpExploit,
        53 => AttackCategory::DnsAmplification,
        80 => AttackCategory::HttpAttack,
        443 => AttackCategory::HttpsAttack,
        3389 => AttackCategory::RdpBruteForce,
        3306 => AttackCategory::SqlInjection,
        27017 => AttackCategory::MongoDbExploit,
        _ => AttackCategory::PortScanning,
    }
}

/// Severity for a category; unlisted categories are `Medium`.
pub fn severity_for(category: AttackCategory) -> Severity {
    match category {
        AttackCategory::SshBruteForce => Severity::High,
        AttackCategory::SqlInjection => Severity::Critical,
        AttackCategory::RdpBruteForce => Severity::High,
        AttackCategory::HttpAttack => Severity::Medium,
        AttackCategory::HttpsAttack => Severity::Medium,
        AttackCategory::DnsAmplification => Severity::High,
        AttackCategory::MongoDbExploit => Severity::Critical,
        _ => Severity::Medium,
    }
}

/// A logged rejection.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub event: AttackEvent,
    /// Source attempt count after this rejection
    pub attempts: u64,
    pub decision: Decision,
}

/// Result of classifying one access attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    Allowed,
    Rejected(Rejection),
}

impl Outcome {
    pub fn decision(&self) -> Decision {
        match self {
            Outcome::Allowed => Decision::Allowed,
            Outcome::Rejected(rejection) => rejection.decision,
        }
    }
}

/// Classifies access attempts against the current policy.
#[derive(Debug, Clone)]
pub struct AccessClassifier {
    escalation_threshold: u64,
}

impl AccessClassifier {
    /// Escalate sources whose attempt count exceeds `escalation_threshold`.
    pub fn new(escalation_threshold: u64) -> Self {
        Self {
            escalation_threshold,
        }
    }

    /// Check one attempt; on rejection, log it and update the tracker.
    ///
    /// Never mutates the policy.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &self,
        policy: &PolicyState,
        tracker: &mut SuspiciousSourceTracker,
        attack_log: &mut Vec<AttackEvent>,
        source: IpAddr,
        port: u16,
        threat_level: u8,
        now: DateTime<Utc>,
    ) -> Outcome {
        if policy.is_open(port) {
            debug!(%source, port, "access allowed");
            return Outcome::Allowed;
        }

        let category = category_for_port(port);
        Outcome::Rejected(self.reject(
            tracker,
            attack_log,
            source,
            port,
            category,
            threat_level,
            now,
        ))
    }

    /// Log a rejected attempt with an explicit category.
    #[allow(clippy::too_many_arguments)]
    pub fn reject(
        &self,
        tracker: &mut SuspiciousSourceTracker,
        attack_log: &mut Vec<AttackEvent>,
        source: IpAddr,
        port: u16,
        category: AttackCategory,
        threat_level: u8,
        now: DateTime<Utc>,
    ) -> Rejection {
        let severity = severity_for(category);
        let event = AttackEvent {
            timestamp: now,
            source,
            port,
            category,
            severity,
            action: AttackAction::Blocked,
            threat_level,
        };
        attack_log.push(event.clone());

        let attempts = tracker.record_rejection(source, now);
        let decision = if attempts > self.escalation_threshold {
            Decision::BlockedEscalate
        } else {
            Decision::Blocked
        };

        warn!(
            %source,
            port,
            category = %category,
            severity = %severity,
            attempts,
            decision = decision.as_str(),
            "attack detected"
        );

        Rejection {
            event,
            attempts,
            decision,
        }
    }
}
