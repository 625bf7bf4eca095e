//! Engine types and configuration structures.
//!
//! Defines the core data structures shared by the engine components:
//! - Access decisions, attack categories and severities
//! - Rotation, attack, IP-shift and threat records
//! - Engine, history and scoring configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Ports the engine rotates through when no universe is configured.
pub const DEFAULT_PORTS: [u16; 15] = [
    80, 443, 8080, 8443, 22, 3389, 21, 25, 53, 110, 143, 993, 995, 3306, 27017,
];

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Port is currently open
    Allowed,
    /// Port is closed; attempt logged
    Blocked,
    /// Port is closed and the source is a repeat offender that should be
    /// redirected to a decoy service
    BlockedEscalate,
}

impl Decision {
    /// Whether the connection may proceed to the real service.
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Label used for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Blocked => "blocked",
            Decision::BlockedEscalate => "blocked_escalate",
        }
    }
}

/// Attack category derived from the targeted port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackCategory {
    #[serde(rename = "SSH Brute Force")]
    SshBruteForce,
    #[serde(rename = "Telnet Attack")]
    TelnetAttack,
    #[serde(rename = "SMTP Exploit")]
    SmtpExploit,
    #[serde(rename = "DNS Amplification")]
    DnsAmplification,
    #[serde(rename = "HTTP Attack")]
    HttpAttack,
    #[serde(rename = "HTTPS Attack")]
    HttpsAttack,
    #[serde(rename = "RDP Brute Force")]
    RdpBruteForce,
    #[serde(rename = "SQL Injection")]
    SqlInjection,
    #[serde(rename = "MongoDB Exploit")]
    MongoDbExploit,
    #[serde(rename = "Port scanning")]
    PortScanning,
}

impl AttackCategory {
    pub const ALL: [AttackCategory; 10] = [
        AttackCategory::SshBruteForce,
        AttackCategory::TelnetAttack,
        AttackCategory::SmtpExploit,
        AttackCategory::DnsAmplification,
        AttackCategory::HttpAttack,
        AttackCategory::HttpsAttack,
        AttackCategory::RdpBruteForce,
        AttackCategory::SqlInjection,
        AttackCategory::MongoDbExploit,
        AttackCategory::PortScanning,
    ];

    /// Human-readable category name.
    pub fn as_str(self) -> &'static str {
        match self {
            AttackCategory::SshBruteForce => "SSH Brute Force",
            AttackCategory::TelnetAttack => "Telnet Attack",
            AttackCategory::SmtpExploit => "SMTP Exploit",
            AttackCategory::DnsAmplification => "DNS Amplification",
            AttackCategory::HttpAttack => "HTTP Attack",
            AttackCategory::HttpsAttack => "HTTPS Attack",
            AttackCategory::RdpBruteForce => "RDP Brute Force",
            AttackCategory::SqlInjection => "SQL Injection",
            AttackCategory::MongoDbExploit => "MongoDB Exploit",
            AttackCategory::PortScanning => "Port scanning",
        }
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackCategory {
    type Err = EngineError;

    /// Parses either the display name ("SQL Injection") or a snake_case
    /// identifier ("sql_injection").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', " ");
        AttackCategory::ALL
            .into_iter()
            .find(|c| c.as_str().to_ascii_lowercase() == wanted)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown attack category: {s}")))
    }
}

/// Severity assigned to an attack category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action taken against a rejected attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackAction {
    #[default]
    Blocked,
}

/// A rejected access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEvent {
    pub timestamp: DateTime<Utc>,
    pub source: IpAddr,
    pub port: u16,
    pub category: AttackCategory,
    pub severity: Severity,
    pub action: AttackAction,
    /// Threat level observed when the attempt arrived (before recompute)
    pub threat_level: u8,
}

/// One scheduled change to the open port set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    /// Rotation sequence number, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub closed: Vec<u16>,
    pub opened: Vec<u16>,
    /// Open set after the rotation, sorted
    pub open_ports: Vec<u16>,
}

/// Source-population snapshot taken on every rotation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpShiftRecord {
    pub timestamp: DateTime<Utc>,
    pub suspicious_sources: usize,
    pub new_sources_last_hour: usize,
    pub total_attacks: usize,
}

/// Threat level sample taken on every rotation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatSample {
    pub timestamp: DateTime<Utc>,
    pub level: u8,
    pub total_attacks: usize,
}

/// Counters derived from the attack log during a recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeStats {
    /// Total blocked attempts in the log
    pub blocked_requests: u64,
    /// Attacks inside the recency window
    pub recent_attacks: usize,
    /// Attacks inside the burst window
    pub burst_attacks: usize,
}

/// Aggregated threat assessment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatState {
    /// Threat level in [0, 100]
    pub level: u8,
    /// Detected pattern descriptions, most recent first
    pub patterns: Vec<String>,
    pub counters: RealtimeStats,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Port universe the engine rotates through
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Time between rotations
    #[serde(default = "default_rotation_interval", with = "humantime_serde")]
    pub rotation_interval: Duration,
    /// Time between monitoring heartbeats
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,
    /// Number of ports opened by the seed rotation
    #[serde(default = "default_seed_ports")]
    pub seed_ports: usize,
    /// RNG seed (unset = OS entropy)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Escalate once a source's rejected attempts exceed this count
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u64,
    /// Maximum distinct suspicious sources retained (0 = unbounded)
    #[serde(default = "default_max_tracked_sources")]
    pub max_tracked_sources: usize,
    /// Event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            rotation_interval: default_rotation_interval(),
            monitor_interval: default_monitor_interval(),
            seed_ports: default_seed_ports(),
            seed: None,
            escalation_threshold: default_escalation_threshold(),
            max_tracked_sources: default_max_tracked_sources(),
            event_capacity: default_event_capacity(),
            history: HistoryConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate engine configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        for port in &self.ports {
            if *port == 0 {
                return Err(EngineError::InvalidConfig("port 0 is not a valid service port".into()));
            }
            if !seen.insert(*port) {
                return Err(EngineError::InvalidConfig(format!("duplicate port in universe: {port}")));
            }
        }
        if self.ports.len() < 2 {
            return Err(EngineError::InvalidConfig(
                "port universe must contain at least 2 ports".into(),
            ));
        }
        if self.seed_ports < 2 {
            return Err(EngineError::InvalidConfig("seed_ports must be at least 2".into()));
        }
        if self.rotation_interval.is_zero() || self.monitor_interval.is_zero() {
            return Err(EngineError::InvalidConfig("intervals must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig("event_capacity must be non-zero".into()));
        }
        self.history.validate()?;
        self.scoring.validate()?;
        Ok(())
    }
}

fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

fn default_rotation_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_seed_ports() -> usize {
    3
}

fn default_escalation_threshold() -> u64 {
    2
}

fn default_max_tracked_sources() -> usize {
    10_000
}

fn default_event_capacity() -> usize {
    1024
}

/// History capacities and status read limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Rotation records retained
    pub rotations: usize,
    /// IP-shift records retained
    pub ip_shifts: usize,
    /// Threat samples retained
    pub threat_samples: usize,
    /// Attacks included in a status snapshot
    pub status_attacks: usize,
    /// Rotation records included in a status snapshot
    pub status_rotations: usize,
    /// IP-shift records included in a status snapshot
    pub status_ip_shifts: usize,
    /// Most recent attacks counted in the category distribution
    pub distribution_window: usize,
    /// Attacking sources listed in a status snapshot
    pub top_sources: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            rotations: 20,
            ip_shifts: 15,
            threat_samples: 60,
            status_attacks: 10,
            status_rotations: 10,
            status_ip_shifts: 10,
            distribution_window: 50,
            top_sources: 5,
        }
    }
}

impl HistoryConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.rotations == 0 || self.ip_shifts == 0 || self.threat_samples == 0 {
            return Err(EngineError::InvalidConfig(
                "history capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Threat scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Points per logged attack
    pub attack_weight: u64,
    /// Points per distinct suspicious source
    pub source_weight: u64,
    /// Cap on the base score
    pub base_cap: u64,
    /// Window for the recency bonus
    #[serde(with = "humantime_serde")]
    pub recency_window: Duration,
    /// Bonus points per attack inside the recency window
    pub recency_weight: u64,
    /// Cap on the recency bonus
    pub recency_cap: u64,
    /// Port-scan events from one source needed to exceed before a pattern is reported
    pub port_scan_threshold: usize,
    /// Window for high-frequency detection
    #[serde(with = "humantime_serde")]
    pub burst_window: Duration,
    /// Attacks inside the burst window needed to exceed before a pattern is reported
    pub burst_threshold: usize,
    /// Maximum reported patterns
    pub max_patterns: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            attack_weight: 2,
            source_weight: 3,
            base_cap: 100,
            recency_window: Duration::from_secs(10 * 60),
            recency_weight: 5,
            recency_cap: 30,
            port_scan_threshold: 5,
            burst_window: Duration::from_secs(5 * 60),
            burst_threshold: 10,
            max_patterns: 5,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.base_cap > 100 || self.recency_cap > 100 {
            return Err(EngineError::InvalidConfig(
                "score caps must not exceed 100".into(),
            ));
        }
        if self.max_patterns == 0 {
            return Err(EngineError::InvalidConfig("max_patterns must be non-zero".into()));
        }
        Ok(())
    }
}

/// Engine error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("rotation scheduler is not started")]
    NotStarted,

    #[error("rotation scheduler is already running")]
    AlreadyRunning,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("no async runtime available: {0}")]
    Runtime(String),
}

/// Humantime serde module for Duration serialization.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_deserialize() {
        let yaml = r#"
ports: [80, 443, 8080]
rotation_interval: 10s
seed: 42
scoring:
  recency_window: 15m
  burst_threshold: 20
history:
  rotations: 5
"#;

        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ports, vec![80, 443, 8080]);
        assert_eq!(config.rotation_interval, Duration::from_secs(10));
        assert_eq!(config.monitor_interval, Duration::from_secs(2));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.scoring.recency_window, Duration::from_secs(900));
        assert_eq!(config.scoring.burst_threshold, 20);
        assert_eq!(config.scoring.attack_weight, 2);
        assert_eq!(config.history.rotations, 5);
        assert_eq!(config.history.ip_shifts, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert_eq!(config.ports.len(), 15);
        assert_eq!(config.rotation_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_small_universe() {
        let config = EngineConfig {
            ports: vec![80],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_ports() {
        let config = EngineConfig {
            ports: vec![80, 443, 80],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate port"));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "SQL Injection".parse::<AttackCategory>().unwrap(),
            AttackCategory::SqlInjection
        );
        assert_eq!(
            "port_scanning".parse::<AttackCategory>().unwrap(),
            AttackCategory::PortScanning
        );
        assert!(matches!(
            "XSS".parse::<AttackCategory>(),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_category_serializes_as_display_name() {
        let json = serde_json::to_string(&AttackCategory::SshBruteForce).unwrap();
        assert_eq!(json, "\"SSH Brute Force\"");
        let json = serde_json::to_string(&Decision::BlockedEscalate).unwrap();
        assert_eq!(json, "\"blocked_escalate\"");
    }
}
