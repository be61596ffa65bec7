//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;
use watchdog_core::config::{DetectorConfig, RateMonitoringConfig, StorageConfig};
use watchdog_core::WatchdogConfig;

const DEFAULT_CONFIG_PATH: &str = "watchdog.toml";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSettings {
    /// Instance name attached to every structured log event
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Backing store and counter source
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix of the counters written by the capture process
    #[serde(default = "default_counter_prefix")]
    pub counter_prefix: String,

    #[serde(default)]
    pub rate_monitoring: RateMonitoringConfig,

    #[serde(default)]
    pub detection: DetectorConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "rate-watchdog".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_counter_prefix() -> String {
    "counter:".to_string()
}

impl WatchdogSettings {
    /// Load configuration from the config file and environment
    ///
    /// The file defaults to `watchdog.toml` and may be missing; `WATCHDOG_CONFIG`
    /// points elsewhere. Environment variables use the `WATCHDOG_` prefix with
    /// `__` between nested keys, e.g. `WATCHDOG_STORAGE__MAX_RETRIES=5`.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("WATCHDOG_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("WATCHDOG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Options handed to the watchdog core
    pub fn core(&self) -> WatchdogConfig {
        WatchdogConfig {
            rate_monitoring: self.rate_monitoring.clone(),
            detection: self.detection.clone(),
            storage: self.storage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use watchdog_core::config::ThresholdEntry;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = WatchdogSettings::load_from("/nonexistent/watchdog.toml").unwrap();
        assert_eq!(settings.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(settings.counter_prefix, "counter:");
        assert!(settings.core().validate().is_ok());

        let (thresholds, rejected) = settings.core().threshold_configs();
        assert!(rejected.is_empty());
        assert_eq!(thresholds[0].monitored_key, "total:s");
    }

    #[test]
    fn test_loads_legacy_and_table_entries() {
        let file = write_config(
            r#"
            api_port = 9100
            redis_url = "redis://store:6379"

            [rate_monitoring]
            use_enhanced_detection = true
            thresholds = [
                "total:s, 1, 20, 30",
                { monitored_key = "tcp:m", sample_interval_seconds = 60, max_value = 500.0, consecutive_duration = 5 },
            ]

            [detection]
            z_threshold = 2.5

            [storage]
            retention = ["total:*, 2, 60, max, 48"]
            "#,
        );

        let settings = WatchdogSettings::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.api_port, 9100);
        assert_eq!(settings.redis_url, "redis://store:6379");

        let core = settings.core();
        assert!(core.validate().is_ok());
        assert!(core.rate_monitoring.use_enhanced_detection);
        assert_eq!(core.detection.z_threshold, 2.5);
        assert!(matches!(
            core.rate_monitoring.thresholds[1],
            ThresholdEntry::Rule(_)
        ));

        let (thresholds, rejected) = core.threshold_configs();
        assert!(rejected.is_empty());
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[1].reset_duration, 1);

        let policies = core.storage.retention_policies().unwrap();
        assert_eq!(policies[0].key_pattern(), "total:*");
    }

    #[test]
    fn test_out_of_range_option_fails_validation() {
        let file = write_config(
            r#"
            [detection]
            sensitivity = 25.0
            "#,
        );

        let settings = WatchdogSettings::load_from(file.path().to_str().unwrap()).unwrap();
        assert!(settings.core().validate().is_err());
    }
}
