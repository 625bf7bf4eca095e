use anyhow::Result;
use opentelemetry::metrics::MeterProvider;
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// OTEL Metrics with Prometheus exporter
pub struct Metrics {
    registry: Registry,
    meter_provider: SdkMeterProvider,
}

impl Metrics {
    /// Create metrics with OTEL → Prometheus pipeline
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let exporter = exporter()
            .with_registry(registry.clone())
            .build()?;

        let meter_provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        // Register as global meter provider
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        info!("OTEL metrics configured with Prometheus exporter");

        Ok(Arc::new(Self {
            registry,
            meter_provider,
        }))
    }

    /// Get a meter for recording metrics
    pub fn meter(&self, name: &'static str) -> opentelemetry::metrics::Meter {
        self.meter_provider.meter(name)
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

impl Drop for Metrics {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            tracing::warn!(error = %e, "failed to shutdown meter provider");
        }
    }
}

/// Engine metrics with portshift_* prefix.
///
/// Recording functions are no-ops until [`init`] has run, so the engine can
/// be used without a metrics pipeline (tests, benches).
pub mod counters {
    use opentelemetry::metrics::{Counter, Gauge};
    use opentelemetry::KeyValue;
    use std::sync::OnceLock;

    use crate::firewall::{AttackCategory, Decision, Severity};

    // ============================================================================
    // ACCESS METRICS
    // ============================================================================

    static ACCESS_CHECKS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static ATTACKS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static ESCALATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // ============================================================================
    // ROTATION METRICS
    // ============================================================================

    static ROTATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static OPEN_PORTS: OnceLock<Gauge<i64>> = OnceLock::new();

    // ============================================================================
    // THREAT METRICS
    // ============================================================================

    static THREAT_LEVEL: OnceLock<Gauge<i64>> = OnceLock::new();
    static SUSPICIOUS_SOURCES: OnceLock<Gauge<i64>> = OnceLock::new();
    static SOURCES_EVICTED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    static SERVER_START_TIME: OnceLock<Gauge<i64>> = OnceLock::new();

    /// Initialize all metrics
    pub fn init(meter: &opentelemetry::metrics::Meter) {
        let _ = ACCESS_CHECKS_TOTAL.set(
            meter.u64_counter("portshift_access_checks_total")
                .with_description("Access checks by decision")
                .build(),
        );
        let _ = ATTACKS_TOTAL.set(
            meter.u64_counter("portshift_attacks_total")
                .with_description("Logged attacks by category and severity")
                .build(),
        );
        let _ = ESCALATIONS_TOTAL.set(
            meter.u64_counter("portshift_escalations_total")
                .with_description("Attempts redirected to a decoy")
                .build(),
        );

        let _ = ROTATIONS_TOTAL.set(
            meter.u64_counter("portshift_rotations_total")
                .with_description("Completed port rotations")
                .build(),
        );
        let _ = OPEN_PORTS.set(
            meter.i64_gauge("portshift_open_ports")
                .with_description("Currently open ports")
                .build(),
        );

        let _ = THREAT_LEVEL.set(
            meter.i64_gauge("portshift_threat_level")
                .with_description("Current threat level (0-100)")
                .build(),
        );
        let _ = SUSPICIOUS_SOURCES.set(
            meter.i64_gauge("portshift_suspicious_sources")
                .with_description("Tracked suspicious sources")
                .build(),
        );
        let _ = SOURCES_EVICTED_TOTAL.set(
            meter.u64_counter("portshift_sources_evicted_total")
                .with_description("Sources dropped by the tracking cap")
                .build(),
        );

        let _ = SERVER_START_TIME.set(
            meter.i64_gauge("portshift_start_time_seconds")
                .with_description("Process start time (unix timestamp)")
                .build(),
        );
        if let Some(g) = SERVER_START_TIME.get() {
            g.record(chrono::Utc::now().timestamp(), &[]);
        }
    }

    pub fn access_check(decision: Decision) {
        if let Some(c) = ACCESS_CHECKS_TOTAL.get() {
            c.add(1, &[kv("decision", decision.as_str())]);
        }
    }

    pub fn attack_recorded(category: AttackCategory, severity: Severity) {
        if let Some(c) = ATTACKS_TOTAL.get() {
            c.add(1, &[kv("category", category.as_str()), kv("severity", severity.as_str())]);
        }
    }

    pub fn escalation() {
        if let Some(c) = ESCALATIONS_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    pub fn rotation() {
        if let Some(c) = ROTATIONS_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    pub fn open_ports_set(count: usize) {
        if let Some(g) = OPEN_PORTS.get() {
            g.record(count as i64, &[]);
        }
    }

    pub fn threat_level_set(level: u8) {
        if let Some(g) = THREAT_LEVEL.get() {
            g.record(i64::from(level), &[]);
        }
    }

    pub fn suspicious_sources_set(count: usize) {
        if let Some(g) = SUSPICIOUS_SOURCES.get() {
            g.record(count as i64, &[]);
        }
    }

    pub fn source_evicted() {
        if let Some(c) = SOURCES_EVICTED_TOTAL.get() {
            c.add(1, &[]);
        }
    }

    // Helper function to create KeyValue
    #[inline]
    fn kv(key: &'static str, value: &str) -> KeyValue {
        KeyValue::new(key, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::Decision;

    #[test]
    fn test_recording_before_init_is_noop() {
        counters::access_check(Decision::Blocked);
        counters::threat_level_set(42);
        counters::source_evicted();
    }

    #[test]
    fn test_render_includes_recorded_counter() {
        let metrics = Metrics::new().unwrap();
        let meter = metrics.meter("portshift-test");
        let counter = meter.u64_counter("portshift_render_probe").build();
        counter.add(3, &[]);

        let text = metrics.render().unwrap();
        assert!(text.contains("portshift_render_probe"));
    }
}
