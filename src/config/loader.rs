use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("invalid engine section")?;

        let rate = self.telemetry.trace_sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            anyhow::bail!("trace_sample_rate must be within 0.0-1.0, got {rate}");
        }

        if self.telemetry.log_level.trim().is_empty() {
            anyhow::bail!("log_level must not be empty");
        }

        info!("configuration validated successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.engine.ports.len(), 15);
        assert_eq!(config.engine.rotation_interval, Duration::from_secs(30));
        assert!(config.admin.enabled);
        assert_eq!(config.admin.address.port(), 9090);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
engine:
  ports: [22, 80, 443, 8080]
  rotation_interval: 10s
  seed: 42
  scoring:
    burst_threshold: 20

admin:
  address: "0.0.0.0:9191"
  enabled: false

telemetry:
  log_level: debug
  json_logs: true
  trace_sample_rate: 0.1
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.engine.ports, vec![22, 80, 443, 8080]);
        assert_eq!(config.engine.rotation_interval, Duration::from_secs(10));
        assert_eq!(config.engine.seed, Some(42));
        assert_eq!(config.engine.scoring.burst_threshold, 20);
        assert!(!config.admin.enabled);
        assert_eq!(config.admin.address.port(), 9191);
        assert!(config.telemetry.json_logs);
    }

    #[test]
    fn test_invalid_engine_section() {
        let yaml = r#"
engine:
  ports: [80]
"#;

        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("at least 2 ports"));
    }

    #[test]
    fn test_invalid_sample_rate() {
        let yaml = r#"
telemetry:
  trace_sample_rate: 1.5
"#;

        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  rotation_interval: 1m\n  seed: 7").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.rotation_interval, Duration::from_secs(60));
        assert_eq!(config.engine.seed, Some(7));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/portshift.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
