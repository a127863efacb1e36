//! Per-resource exhaustion prediction
//!
//! Probabilities come from fixed threshold tables applied to the current
//! usage fraction. Horizons come from usage growth estimated over recent
//! history. Malformed or missing inputs never fail a prediction; the affected
//! forecast carries an `error` and, when nothing usable was supplied, an
//! UNKNOWN risk level.

use super::coerce::{coerce, join_errors, Reading};
use super::storage::{preventive_measures, StorageFailurePredictor, STORAGE_FAILURE_LIMIT};
use super::thresholds::{
    recommendations, risk_level, time_to_exhaustion, CPU_TABLE, CRITICAL_USAGE, MEMORY_TABLE,
    QUEUE_TABLE, STORAGE_TABLE,
};
use crate::models::{ExhaustionForecast, ResourceSnapshot, RiskLevel, SubReading};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Snapshots considered when estimating growth
pub const GROWTH_WINDOW: usize = 120;

/// Queue size assumed when the scheduler does not publish a limit
pub const DEFAULT_QUEUE_MAX_JOBS: f64 = 100.0;

/// Horizon reported for CPU when no core is free
const NO_FREE_CORES_HORIZON_HOURS: f64 = 0.5;

/// Usage growth in fraction per hour, never negative
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GrowthRates {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

impl GrowthRates {
    /// Least-squares slope of each usage series, in any snapshot order
    ///
    /// Snapshots that degraded a reading are left out of that reading's
    /// series. Fewer than two points give zero growth.
    pub fn from_snapshots(snapshots: &[ResourceSnapshot]) -> Self {
        let mut ordered: Vec<&ResourceSnapshot> = snapshots.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);

        let Some(first) = ordered.first() else {
            return Self::default();
        };
        let t0 = first.timestamp;

        Self {
            cpu: usage_growth(&ordered, t0, SubReading::Cpu, |s| s.cpu.usage_percent),
            memory: usage_growth(&ordered, t0, SubReading::Memory, |s| s.memory.usage_percent),
            storage: usage_growth(&ordered, t0, SubReading::Storage, |s| s.storage.usage_percent),
        }
    }
}

fn usage_growth(
    ordered: &[&ResourceSnapshot],
    t0: DateTime<Utc>,
    reading: SubReading,
    usage_percent: impl Fn(&ResourceSnapshot) -> f64,
) -> f64 {
    let points: Vec<(f64, f64)> = ordered
        .iter()
        .filter(|s| !s.is_degraded(reading))
        .map(|s| (hours_between(t0, s.timestamp), usage_percent(*s) / 100.0))
        .collect();
    linear_regression_slope(&points).max(0.0)
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

/// Slope of y over x; zero when undefined
fn linear_regression_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

/// Forecasts for every resource plus the aggregated view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExhaustionReport {
    pub timestamp: DateTime<Utc>,
    /// Keyed by `cpu`, `memory`, `storage`, `queues` or `queue:<name>`
    pub forecasts: BTreeMap<String, ExhaustionForecast>,
    pub overall_risk: RiskLevel,
    /// Resources at HIGH or CRITICAL risk
    pub critical_resources: Vec<String>,
    pub recommendations: Vec<String>,
    pub optimization_suggestions: Vec<String>,
}

impl ExhaustionReport {
    pub fn forecast(&self, resource: &str) -> Option<&ExhaustionForecast> {
        self.forecasts.get(resource)
    }

    /// Highest exhaustion probability among forecasts with a known risk
    pub fn max_probability(&self) -> f64 {
        self.forecasts
            .values()
            .filter(|f| f.risk_level != RiskLevel::Unknown)
            .map(|f| f.exhaustion_probability)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExhaustionPredictor {
    storage: StorageFailurePredictor,
}

impl ExhaustionPredictor {
    pub fn new(storage: StorageFailurePredictor) -> Self {
        Self { storage }
    }

    pub fn storage_predictor(&self) -> &StorageFailurePredictor {
        &self.storage
    }

    /// Forecast from a telemetry snapshot
    pub fn predict(
        &self,
        snapshot: &ResourceSnapshot,
        growth: &GrowthRates,
        io_errors_per_hour: f64,
    ) -> ExhaustionReport {
        let mut forecasts = BTreeMap::new();

        let cpu = if snapshot.is_degraded(SubReading::Cpu) {
            ExhaustionForecast::unknown("cpu", "cpu reading unavailable")
        } else {
            self.cpu_forecast(
                snapshot.cpu.usage_percent.into(),
                snapshot.cpu.available.into(),
                growth.cpu,
            )
        };
        forecasts.insert("cpu".to_string(), cpu);

        let memory = if snapshot.is_degraded(SubReading::Memory) {
            ExhaustionForecast::unknown("memory", "memory reading unavailable")
        } else {
            self.memory_forecast(snapshot.memory.usage_percent.into(), growth.memory)
        };
        forecasts.insert("memory".to_string(), memory);

        let storage = if snapshot.is_degraded(SubReading::Storage) {
            ExhaustionForecast::unknown("storage", "storage reading unavailable")
        } else {
            self.storage_forecast(
                snapshot.storage.usage_percent.into(),
                growth.storage,
                io_errors_per_hour,
            )
        };
        forecasts.insert("storage".to_string(), storage);

        if snapshot.is_degraded(SubReading::Queues) {
            forecasts.insert(
                "queues".to_string(),
                ExhaustionForecast::unknown("queues", "queue status unavailable"),
            );
        } else {
            for (name, occupancy) in &snapshot.queues {
                let max_jobs = occupancy.max_jobs.map_or(Reading::Missing, Reading::from);
                let forecast = self.queue_forecast(
                    name,
                    occupancy.pending.into(),
                    occupancy.running.into(),
                    max_jobs,
                );
                forecasts.insert(queue_key(name), forecast);
            }
        }

        assemble(forecasts)
    }

    /// Forecast from a loosely typed resource document
    ///
    /// Expects the snapshot layout: `cpu`, `memory`, `storage` and `queues`
    /// sections. Absent or non-object sections yield UNKNOWN forecasts.
    pub fn predict_value(
        &self,
        resources: &Value,
        growth: &GrowthRates,
        io_errors_per_hour: f64,
    ) -> ExhaustionReport {
        let mut forecasts = BTreeMap::new();

        let cpu = match section(resources, "cpu") {
            Ok(cpu) => self.cpu_forecast(
                cpu.get("usage_percent").into(),
                cpu.get("available").into(),
                growth.cpu,
            ),
            Err(e) => ExhaustionForecast::unknown("cpu", e),
        };
        forecasts.insert("cpu".to_string(), cpu);

        let memory = match section(resources, "memory") {
            Ok(memory) => self.memory_forecast(memory.get("usage_percent").into(), growth.memory),
            Err(e) => ExhaustionForecast::unknown("memory", e),
        };
        forecasts.insert("memory".to_string(), memory);

        let storage = match section(resources, "storage") {
            Ok(storage) => self.storage_forecast(
                storage.get("usage_percent").into(),
                growth.storage,
                io_errors_per_hour,
            ),
            Err(e) => ExhaustionForecast::unknown("storage", e),
        };
        forecasts.insert("storage".to_string(), storage);

        match section(resources, "queues") {
            Ok(queues) => {
                for (name, queue) in queues {
                    let key = queue_key(name);
                    let forecast = match queue {
                        Value::Object(q) => self.queue_forecast(
                            name,
                            q.get("pending").into(),
                            q.get("running").into(),
                            q.get("max_jobs").into(),
                        ),
                        _ => ExhaustionForecast::unknown(key.clone(), "invalid queue data"),
                    };
                    forecasts.insert(key, forecast);
                }
            }
            Err(e) => {
                forecasts.insert("queues".to_string(), ExhaustionForecast::unknown("queues", e));
            }
        }

        assemble(forecasts)
    }

    fn cpu_forecast(&self, usage_percent: Reading, available: Reading, growth: f64) -> ExhaustionForecast {
        let usage = coerce("cpu usage_percent", usage_percent, 0.0, 0.0, 100.0);
        let available = coerce("cpu available", available, 1.0, 0.0, f64::MAX);
        let u = usage.value / 100.0;

        let probability = CPU_TABLE.probability(u);
        let horizon = if u < CRITICAL_USAGE && available.value.floor() <= 0.0 {
            Some(NO_FREE_CORES_HORIZON_HOURS)
        } else {
            time_to_exhaustion(u, growth, CRITICAL_USAGE)
        };

        forecast("cpu", probability, horizon, u, join_errors([&usage.error, &available.error]))
    }

    fn memory_forecast(&self, usage_percent: Reading, growth: f64) -> ExhaustionForecast {
        let usage = coerce("memory usage_percent", usage_percent, 0.0, 0.0, 100.0);
        let u = usage.value / 100.0;

        forecast(
            "memory",
            MEMORY_TABLE.probability(u),
            time_to_exhaustion(u, growth, CRITICAL_USAGE),
            u,
            join_errors([&usage.error]),
        )
    }

    fn storage_forecast(&self, usage_percent: Reading, growth: f64, io_errors: f64) -> ExhaustionForecast {
        let usage = coerce("storage usage_percent", usage_percent, 0.0, 0.0, 100.0);
        let u = usage.value / 100.0;

        let occupancy = STORAGE_TABLE.probability(u);
        let failure = self.storage.failure_score(u, growth, io_errors);
        let probability = occupancy.max(failure);

        let mut result = forecast(
            "storage",
            probability,
            time_to_exhaustion(u, growth, STORAGE_FAILURE_LIMIT),
            u,
            join_errors([&usage.error]),
        );
        result.recommendations = preventive_measures(probability);
        result
    }

    fn queue_forecast(
        &self,
        name: &str,
        pending: Reading,
        running: Reading,
        max_jobs: Reading,
    ) -> ExhaustionForecast {
        let pending = coerce("queue pending", pending, 0.0, 0.0, f64::MAX);
        let running = coerce("queue running", running, 0.0, 0.0, f64::MAX);
        let max_jobs = coerce("queue max_jobs", max_jobs, DEFAULT_QUEUE_MAX_JOBS, 1.0, f64::MAX);

        let utilisation = (running.value + pending.value) / max_jobs.value;
        let probability = QUEUE_TABLE.probability(utilisation);

        forecast(
            &queue_key(name),
            probability,
            time_to_exhaustion(utilisation, 0.0, CRITICAL_USAGE),
            utilisation.clamp(0.0, 1.0),
            join_errors([&pending.error, &running.error, &max_jobs.error]),
        )
    }
}

fn queue_key(name: &str) -> String {
    format!("queue:{name}")
}

fn section<'a>(
    resources: &'a Value,
    name: &str,
) -> std::result::Result<&'a serde_json::Map<String, Value>, String> {
    match resources.get(name) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(format!("invalid {name} data format")),
        None => Err(format!("no {name} data available")),
    }
}

fn forecast(
    resource_type: &str,
    probability: f64,
    horizon: Option<f64>,
    current_usage: f64,
    error: Option<String>,
) -> ExhaustionForecast {
    let level = risk_level(probability);
    ExhaustionForecast {
        resource_type: resource_type.to_string(),
        exhaustion_probability: probability,
        time_to_exhaustion_hours: horizon,
        risk_level: level,
        current_usage,
        recommendations: recommendations(level),
        error,
    }
}

fn assemble(forecasts: BTreeMap<String, ExhaustionForecast>) -> ExhaustionReport {
    let overall_risk = forecasts
        .values()
        .map(|f| f.risk_level)
        .max()
        .unwrap_or(RiskLevel::Unknown);

    let critical_resources = forecasts
        .iter()
        .filter(|(_, f)| f.risk_level >= RiskLevel::High)
        .map(|(k, _)| k.clone())
        .collect();

    let optimization_suggestions = forecasts
        .iter()
        .filter(|(_, f)| f.risk_level != RiskLevel::Unknown && f.exhaustion_probability > 0.3)
        .map(|(key, _)| suggestion(key))
        .collect();

    ExhaustionReport {
        timestamp: Utc::now(),
        forecasts,
        overall_risk,
        critical_resources,
        recommendations: recommendations(overall_risk),
        optimization_suggestions,
    }
}

fn suggestion(key: &str) -> String {
    match key {
        "cpu" => "CPU: Reduce job concurrency or increase CPU allocation".to_string(),
        "memory" => "Memory: Optimize memory usage or increase memory allocation".to_string(),
        "storage" => "Storage: Clean up temporary files or expand storage".to_string(),
        other => {
            let queue = other.strip_prefix("queue:").unwrap_or(other);
            format!("Queue {queue}: Reduce pending jobs or use alternative queues")
        }
    }
}
