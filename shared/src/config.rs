//! Layered configuration loading shared by every binary in the workspace.
//!
//! Precedence, lowest to highest: built-in defaults, an optional YAML
//! file, then environment variables prefixed `SCHEDULER_` (double
//! underscore as the nesting separator, e.g. `SCHEDULER_KV__URL`).

use config::{Config as RawConfig, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvSettings {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    10
}

impl Default for KvSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingSettings {
    #[serde(default = "default_available_hours")]
    pub default_available_hours: f64,
    #[serde(default = "default_peak_hours")]
    pub default_peak_hours: Vec<u8>,
    #[serde(default = "default_energy_level")]
    pub default_energy_level: u8,
}

fn default_available_hours() -> f64 {
    8.0
}

fn default_peak_hours() -> Vec<u8> {
    vec![9, 10, 14, 15]
}

fn default_energy_level() -> u8 {
    3
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            default_available_hours: default_available_hours(),
            default_peak_hours: default_peak_hours(),
            default_energy_level: default_energy_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub kv: KvSettings,
    #[serde(default)]
    pub scheduling: SchedulingSettings,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Loads configuration from an optional YAML file overlaid with
    /// `SCHEDULER_`-prefixed environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = RawConfig::builder()
            .set_default("port", default_port() as i64)?
            .set_default("log_level", default_log_level())?
            .set_default("kv.url", "redis://127.0.0.1:6379")?
            .set_default("kv.pool_size", default_pool_size() as i64)?
            .set_default("scheduling.default_available_hours", default_available_hours())?
            .set_default(
                "scheduling.default_peak_hours",
                default_peak_hours()
                    .into_iter()
                    .map(i64::from)
                    .collect::<Vec<_>>(),
            )?
            .set_default("scheduling.default_energy_level", default_energy_level() as i64)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| SchedulerError::invalid_input(format!("config build failed: {e}")))?;

        raw.try_deserialize()
            .map_err(|e| SchedulerError::invalid_input(format!("config deserialize failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = AppConfig::load(None).expect("default config should load");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.scheduling.default_peak_hours, vec![9, 10, 14, 15]);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = AppConfig::load(Some("/nonexistent/path/config.yaml"));
        assert!(cfg.is_ok());
    }
}
