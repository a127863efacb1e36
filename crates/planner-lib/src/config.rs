//! Planner configuration document
//!
//! The configuration is persisted as a JSON document holding the queue
//! catalog, chunk strategies, cost weights, sizing calibration and monitoring
//! thresholds. On load the document is merged with the built-in defaults:
//! missing keys are added, keys already present are never overwritten and
//! keys this version does not know about are preserved untouched.

use crate::error::{PlannerError, Result};
use crate::models::{ObjectivePriority, QueueProfile, StrategyProfile};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Score weights and the per-job cost ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSettings {
    pub max_cost_per_job: f64,
    pub cost_weight: f64,
    pub time_weight: f64,
    pub reliability_weight: f64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            max_cost_per_job: 100.0,
            cost_weight: 0.3,
            time_weight: 0.4,
            reliability_weight: 0.3,
        }
    }
}

/// Dataset calibration used by chunk sizing and history-based prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingCalibration {
    pub min_chunk_size: usize,
    /// Storage footprint of one work item in GB
    pub per_item_storage_gb: f64,
    pub items_per_cpu: usize,
    pub cost_optimal_divisor: usize,
    pub cost_optimal_min: usize,
    pub cost_optimal_max: usize,
    /// Allocation records considered by the history-based prediction
    pub prediction_window: usize,
    /// Items per allocated CPU assumed by the history-based prediction
    pub prediction_scale: f64,
    pub default_predicted_chunk: usize,
}

impl Default for SizingCalibration {
    fn default() -> Self {
        Self {
            min_chunk_size: 100,
            per_item_storage_gb: 0.15,
            items_per_cpu: 20,
            cost_optimal_divisor: 20,
            cost_optimal_min: 500,
            cost_optimal_max: 2000,
            prediction_window: 100,
            prediction_scale: 100.0,
            default_predicted_chunk: 1000,
        }
    }
}

/// Thresholds that make the monitor loop raise an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Storage usage fraction
    pub storage_usage: f64,
    /// Pending jobs in a single queue
    pub queue_pending_jobs: u32,
    /// 1 - mean success probability of recent allocations
    pub job_failure_rate: f64,
    pub exhaustion_probability: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            storage_usage: 0.95,
            queue_pending_jobs: 24,
            job_failure_rate: 0.1,
            exhaustion_probability: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub update_interval_seconds: u64,
    pub error_backoff_seconds: u64,
    /// Ring-buffer cap applied to each history list
    pub history_max_entries: usize,
    pub queue_query_timeout_seconds: u64,
    pub alert_dedup_seconds: u64,
    pub persist_every_cycles: u64,
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            update_interval_seconds: 30,
            error_backoff_seconds: 60,
            history_max_entries: 1000,
            queue_query_timeout_seconds: 10,
            alert_dedup_seconds: 15 * 60,
            persist_every_cycles: 10,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

impl MonitoringSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    pub fn queue_query_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_query_timeout_seconds)
    }

    pub fn alert_dedup_window(&self) -> Duration {
        Duration::from_secs(self.alert_dedup_seconds)
    }
}

/// Typed view of the configuration document
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub cluster_name: String,
    pub scheduler: String,
    /// In document order, which decides score ties
    pub queues: Vec<QueueProfile>,
    pub strategies: BTreeMap<String, StrategyProfile>,
    pub cost: CostSettings,
    pub sizing: SizingCalibration,
    pub monitoring: MonitoringSettings,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cluster_name: "your_cluster".to_string(),
            scheduler: "LSF".to_string(),
            queues: vec![
                queue("normal", 100, 16, 256, 168.0, 0.1, 1, 1.0, 0.95),
                queue("hiprio", 50, 32, 512, 72.0, 0.2, 2, 0.7, 0.98),
                queue("long", 20, 8, 128, 720.0, 0.05, 3, 1.5, 0.90),
                queue("gpu", 10, 16, 256, 48.0, 0.5, 4, 0.5, 0.85),
            ],
            strategies: [
                strategy("balanced", 1000, 0.90, ObjectivePriority::Balanced),
                strategy("cost_optimized", 1000, 0.90, ObjectivePriority::CostEfficiency),
                strategy("storage_optimized", 500, 0.85, ObjectivePriority::StorageEfficiency),
                strategy("time_optimized", 2000, 0.95, ObjectivePriority::Speed),
            ]
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect(),
            cost: CostSettings::default(),
            sizing: SizingCalibration::default(),
            monitoring: MonitoringSettings::default(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn queue(
    name: &str,
    max_jobs: u32,
    max_cpu_per_job: u32,
    max_memory_per_job: u32,
    max_walltime_hours: f64,
    cost_per_cpu_hour: f64,
    priority: u32,
    speed_factor: f64,
    reliability_factor: f64,
) -> QueueProfile {
    QueueProfile {
        name: name.to_string(),
        max_jobs,
        max_cpu_per_job,
        max_memory_per_job,
        max_walltime_hours,
        cost_per_cpu_hour,
        priority,
        speed_factor,
        reliability_factor,
    }
}

fn strategy(
    name: &str,
    max_chunk_size: usize,
    storage_usage_threshold: f64,
    objective_priority: ObjectivePriority,
) -> StrategyProfile {
    StrategyProfile {
        name: name.to_string(),
        max_chunk_size,
        storage_usage_threshold,
        objective_priority,
    }
}

impl PlannerConfig {
    pub fn strategy(&self, name: &str) -> Option<&StrategyProfile> {
        self.strategies.get(name)
    }
}

// On-disk layout. Names live in the map keys, not inside the entries.

#[derive(Serialize, Deserialize)]
struct RawDocument {
    hpc_environment: RawEnvironment,
    optimization: RawOptimization,
    monitoring: MonitoringSettings,
}

#[derive(Serialize, Deserialize)]
struct RawEnvironment {
    cluster_name: String,
    scheduler: String,
    queues: QueueTable,
}

/// Queue entries keyed by name, kept in the order the document lists them
struct QueueTable(Vec<(String, QueueProfile)>);

impl Serialize for QueueTable {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.0.iter().map(|(name, q)| (name, q)))
    }
}

impl<'de> Deserialize<'de> for QueueTable {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct QueueTableVisitor;

        impl<'de> Visitor<'de> for QueueTableVisitor {
            type Value = QueueTable;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of queue names to queue profiles")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, profile)) = map.next_entry::<String, QueueProfile>()? {
                    entries.push((name, profile));
                }
                Ok(QueueTable(entries))
            }
        }

        deserializer.deserialize_map(QueueTableVisitor)
    }
}

#[derive(Serialize, Deserialize)]
struct RawOptimization {
    chunk_strategies: BTreeMap<String, StrategyProfile>,
    cost_optimization: CostSettings,
    chunk_sizing: SizingCalibration,
}

impl RawDocument {
    fn from_config(config: &PlannerConfig) -> Self {
        Self {
            hpc_environment: RawEnvironment {
                cluster_name: config.cluster_name.clone(),
                scheduler: config.scheduler.clone(),
                queues: QueueTable(
                    config
                        .queues
                        .iter()
                        .map(|q| (q.name.clone(), QueueProfile { name: String::new(), ..q.clone() }))
                        .collect(),
                ),
            },
            optimization: RawOptimization {
                chunk_strategies: config
                    .strategies
                    .iter()
                    .map(|(k, s)| (k.clone(), StrategyProfile { name: String::new(), ..s.clone() }))
                    .collect(),
                cost_optimization: config.cost.clone(),
                chunk_sizing: config.sizing.clone(),
            },
            monitoring: config.monitoring.clone(),
        }
    }

    fn into_config(self) -> PlannerConfig {
        let queues = self
            .hpc_environment
            .queues
            .0
            .into_iter()
            .map(|(name, q)| QueueProfile { name, ..q })
            .collect();
        let strategies = self
            .optimization
            .chunk_strategies
            .into_iter()
            .map(|(name, s)| (name.clone(), StrategyProfile { name, ..s }))
            .collect();

        PlannerConfig {
            cluster_name: self.hpc_environment.cluster_name,
            scheduler: self.hpc_environment.scheduler,
            queues,
            strategies,
            cost: self.optimization.cost_optimization,
            sizing: self.optimization.chunk_sizing,
            monitoring: self.monitoring,
        }
    }
}

/// Built-in default document
pub fn default_document() -> Value {
    // Serializing plain structs and string-keyed maps cannot fail
    serde_json::to_value(RawDocument::from_config(&PlannerConfig::default()))
        .unwrap_or_else(|_| Value::Object(Default::default()))
}

/// Recursively add keys from `defaults` that are missing in `current`
///
/// Values already present in `current` win, including when their type
/// differs from the default.
pub fn merge_defaults(defaults: &Value, current: &mut Value) {
    let (Value::Object(defaults), Value::Object(current)) = (defaults, current) else {
        return;
    };

    for (key, default_value) in defaults {
        match current.get_mut(key) {
            None => {
                current.insert(key.clone(), default_value.clone());
            }
            Some(existing) => merge_defaults(default_value, existing),
        }
    }
}

/// Configuration document together with its typed view
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: Option<PathBuf>,
    document: Value,
    config: PlannerConfig,
}

impl ConfigDocument {
    /// Defaults with no backing file
    pub fn defaults() -> Self {
        Self {
            path: None,
            document: default_document(),
            config: PlannerConfig::default(),
        }
    }

    /// Build from an in-memory document, merging defaults
    pub fn from_value(mut document: Value) -> std::result::Result<Self, String> {
        if !document.is_object() {
            return Err("configuration root must be a JSON object".to_string());
        }
        merge_defaults(&default_document(), &mut document);

        let raw: RawDocument =
            serde_json::from_value(document.clone()).map_err(|e| e.to_string())?;

        Ok(Self {
            path: None,
            document,
            config: raw.into_config(),
        })
    }

    /// Load and merge the document at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |message: String| PlannerError::ConfigLoad {
            path: path.to_path_buf(),
            message,
        };

        let data = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
        let document: Value = serde_json::from_slice(&data).map_err(|e| load_error(e.to_string()))?;
        let mut loaded = Self::from_value(document).map_err(load_error)?;
        loaded.path = Some(path.to_path_buf());

        info!(path = %path.display(), queues = loaded.config.queues.len(), "Loaded planner configuration");
        Ok(loaded)
    }

    /// Load `path`, falling back to defaults when it is missing or malformed
    ///
    /// The merged document is written back so new default keys become
    /// visible to operators.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut loaded = if path.exists() {
            match Self::load(path) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(error = %e, "Falling back to built-in configuration");
                    Self::defaults()
                }
            }
        } else {
            Self::defaults()
        };
        loaded.path = Some(path.to_path_buf());

        if let Err(e) = loaded.save() {
            warn!(error = %e, "Failed to write configuration document");
        }
        loaded
    }

    /// Write the document to its backing path, if any
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => {
                let json = serde_json::to_vec_pretty(&self.document)?;
                write_atomically(path, &json)
            }
            None => Ok(()),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Write `data` to `path` through a temp file and rename
pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let persist_error = |source| PlannerError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(persist_error)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, data).map_err(persist_error)?;
    std::fs::rename(&temp_path, path).map_err(persist_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_shape() {
        let config = PlannerConfig::default();
        let names: Vec<_> = config.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["normal", "hiprio", "long", "gpu"]);
        assert_eq!(config.strategy("balanced").unwrap().max_chunk_size, 1000);
        assert_eq!(config.sizing.min_chunk_size, 100);
        assert_eq!(config.monitoring.update_interval_seconds, 30);
    }

    #[test]
    fn test_default_document_keeps_names_in_keys() {
        let doc = default_document();
        let normal = &doc["hpc_environment"]["queues"]["normal"];
        assert_eq!(normal["max_jobs"], 100);
        assert!(normal.get("name").is_none());
        assert_eq!(doc["optimization"]["chunk_strategies"]["balanced"]["priority"], "balanced");
    }

    #[test]
    fn test_merge_adds_missing_keys_only() {
        let defaults = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let mut current = json!({"a": 5, "nested": {"x": 9}, "custom": true});

        merge_defaults(&defaults, &mut current);

        assert_eq!(current, json!({"a": 5, "nested": {"x": 9, "y": 2}, "custom": true}));
    }

    #[test]
    fn test_from_value_preserves_overrides_and_unknown_keys() {
        let doc = json!({
            "hpc_environment": {
                "queues": {
                    "short": {
                        "max_jobs": 5,
                        "max_cpu_per_job": 4,
                        "max_memory_per_job": 16,
                        "max_walltime_hours": 2.0,
                        "cost_per_cpu_hour": 0.01,
                        "priority": 1,
                        "speed_factor": 1.0
                    }
                }
            },
            "site_notes": "keep me"
        });

        let loaded = ConfigDocument::from_value(doc).unwrap();
        let queues = &loaded.config().queues;

        // Default queues are appended after the site-specific one
        let names: Vec<_> = queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["short", "normal", "hiprio", "long", "gpu"]);
        assert_eq!(queues[0].max_jobs, 5);
        assert_eq!(queues[0].reliability_factor, 0.95);
        assert!(loaded.document()["hpc_environment"]["queues"]["short"]
            .get("reliability_factor")
            .is_none());
        assert_eq!(loaded.document()["site_notes"], "keep me");
        assert_eq!(loaded.config().scheduler, "LSF");
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            ConfigDocument::load(&path),
            Err(PlannerError::ConfigLoad { .. })
        ));

        let doc = ConfigDocument::load_or_default(&path);
        assert_eq!(doc.config(), &PlannerConfig::default());

        // Defaults were written back
        let reloaded = ConfigDocument::load(&path).unwrap();
        assert_eq!(reloaded.config(), &PlannerConfig::default());
    }

    #[test]
    fn test_load_save_round_trip_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("config.json");

        let first = ConfigDocument::load_or_default(&path);
        let written = std::fs::read(&path).unwrap();

        let second = ConfigDocument::load(&path).unwrap();
        second.save().unwrap();
        let rewritten = std::fs::read(&path).unwrap();

        assert_eq!(first.document(), second.document());
        assert_eq!(written, rewritten);
    }
}
