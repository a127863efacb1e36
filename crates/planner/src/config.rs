//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Daemon settings from `PLANNER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding the configuration and history documents
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// API server port for health/metrics/report
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Volume whose usage bounds chunk sizes
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Query LSF for queue status; without it queues read as empty
    #[serde(default = "default_use_lsf")]
    pub use_lsf: bool,

    #[serde(default = "default_bqueues_program")]
    pub bqueues_program: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("planner_data")
}

fn default_api_port() -> u16 {
    8080
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_use_lsf() -> bool {
    true
}

fn default_bqueues_program() -> String {
    "bqueues".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_port: default_api_port(),
            storage_path: default_storage_path(),
            use_lsf: default_use_lsf(),
            bqueues_program: default_bqueues_program(),
        }
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PLANNER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid PLANNER_* settings, using defaults");
            ServiceConfig::default()
        }))
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("resource_config.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("resource_history.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_data_dir() {
        let config = ServiceConfig {
            data_dir: PathBuf::from("/var/lib/planner"),
            ..Default::default()
        };
        assert_eq!(
            config.config_path(),
            PathBuf::from("/var/lib/planner/resource_config.json")
        );
        assert_eq!(
            config.history_path(),
            PathBuf::from("/var/lib/planner/resource_history.json")
        );
    }
}
