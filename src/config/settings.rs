/*
* Usage Monitor Configuration
* ---------------------------
* @project: usage-monitor
*
* Layered settings, lowest to highest priority:
*   1. hardcoded defaults (below, mirrored by generate_default_config)
*   2. <config dir>/default.toml
*   3. <config dir>/local.toml
*   4. APP__SECTION__KEY environment variables
*
* The analyzer thresholds live here and nowhere else. They have been tuned by
* hand more than once, so change them in config, not in code.
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::monitoring::anomaly_detection::AnalyzerConfig;
use crate::monitoring::metrics::MetricKind;
use crate::monitoring::monitor::MonitorSettings;
use crate::monitoring::source::MAX_LOOKBACK_SECONDS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub monitoring: MonitoringSettings,
    pub analyzer: AnalyzerConfig,
    pub source: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub interval_seconds: u64,
    pub lookback_seconds: u64,
    pub max_values: usize,
    pub metrics: Vec<MetricKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Directory holding `<kind>.json` metric dumps.
    pub path: PathBuf,
}

impl MonitoringSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.lookback_seconds == 0 || self.lookback_seconds > MAX_LOOKBACK_SECONDS {
            return Err(format!(
                "monitoring.lookback_seconds must be in 1..={}, got {}",
                MAX_LOOKBACK_SECONDS, self.lookback_seconds
            ));
        }
        Ok(())
    }

    pub fn to_monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.interval_seconds.max(1)),
            lookback_seconds: self.lookback_seconds,
            max_values: self.max_values.max(1),
            metrics: self.metrics.clone(),
        }
    }
}

impl Settings {
    /// Loads from `CONFIG_PATH` (default `config`).
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        Self::new_from_dir(Path::new(&config_path))
    }

    pub fn new_from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from path: {}", config_dir.display());

        let defaults = generate_default_config();
        let config = Config::builder()
            .set_default("monitoring.interval_seconds", defaults.monitoring.interval_seconds)?
            .set_default("monitoring.lookback_seconds", defaults.monitoring.lookback_seconds)?
            .set_default("monitoring.max_values", defaults.monitoring.max_values as u64)?
            .set_default("monitoring.metrics", vec!["cpu"])?
            .set_default("analyzer.window_size", defaults.analyzer.window_size as u64)?
            .set_default("analyzer.sustained_window", defaults.analyzer.sustained_window as u64)?
            .set_default("analyzer.high_threshold", defaults.analyzer.high_threshold)?
            .set_default("analyzer.low_threshold", defaults.analyzer.low_threshold)?
            .set_default("analyzer.sustained_threshold", defaults.analyzer.sustained_threshold)?
            .set_default("source.path", defaults.source.path.to_string_lossy().to_string())?
            .add_source(File::with_name(&format!("{}/default", config_dir.display())).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir.display())).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.monitoring.validate().map_err(ConfigError::Message)?;
        settings
            .analyzer
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(settings)
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        monitoring: MonitoringSettings {
            interval_seconds: 10,
            lookback_seconds: 500,
            max_values: 500,
            metrics: vec![MetricKind::Cpu],
        },
        analyzer: AnalyzerConfig::default(),
        source: SourceSettings {
            path: PathBuf::from("metrics"),
        },
    }
}
