//! Core data models for the chunk planner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Clamp a percentage reading to [0, 100], mapping NaN to 0
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Host CPU reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    pub count: u32,
    pub usage_percent: f64,
    /// Cores not accounted for by current usage
    pub available: u32,
}

impl CpuReading {
    pub fn new(count: u32, usage_percent: f64) -> Self {
        let usage_percent = clamp_percent(usage_percent);
        let busy = (count as f64 * usage_percent / 100.0).floor() as u32;
        Self {
            count,
            usage_percent,
            available: count.saturating_sub(busy),
        }
    }
}

/// Host memory reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total_gb: f64,
    pub available_gb: f64,
    pub usage_percent: f64,
}

impl MemoryReading {
    pub fn from_bytes(total: u64, available: u64, usage_percent: f64) -> Self {
        Self {
            total_gb: total as f64 / BYTES_PER_GB,
            available_gb: available as f64 / BYTES_PER_GB,
            usage_percent: clamp_percent(usage_percent),
        }
    }
}

/// Storage reading for the working volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageReading {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
}

impl StorageReading {
    pub fn from_bytes(total: u64, used: u64, free: u64) -> Self {
        let usage_percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            total_gb: total as f64 / BYTES_PER_GB,
            used_gb: used as f64 / BYTES_PER_GB,
            free_gb: free as f64 / BYTES_PER_GB,
            usage_percent: clamp_percent(usage_percent),
        }
    }
}

/// Job counts reported by the queueing system for one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOccupancy {
    pub pending: u32,
    pub running: u32,
    pub suspended: u32,
    /// Concurrent job limit as reported by the scheduler, when it publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_jobs: Option<u32>,
}

/// Sub-readings of a snapshot that can fail independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubReading {
    Cpu,
    Memory,
    Storage,
    Queues,
}

impl fmt::Display for SubReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubReading::Cpu => write!(f, "cpu"),
            SubReading::Memory => write!(f, "memory"),
            SubReading::Storage => write!(f, "storage"),
            SubReading::Queues => write!(f, "queues"),
        }
    }
}

/// Point-in-time reading of host and queue occupancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub storage: StorageReading,
    #[serde(default)]
    pub queues: BTreeMap<String, QueueOccupancy>,
    /// Sub-readings that failed and were zero-filled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<SubReading>,
}

impl ResourceSnapshot {
    pub fn is_degraded(&self, reading: SubReading) -> bool {
        self.degraded.contains(&reading)
    }
}

/// Per-queue limits and characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Maximum concurrent jobs in the queue
    pub max_jobs: u32,
    pub max_cpu_per_job: u32,
    /// GB
    pub max_memory_per_job: u32,
    pub max_walltime_hours: f64,
    pub cost_per_cpu_hour: f64,
    pub priority: u32,
    /// Multiplier applied to predicted duration (below 1.0 is faster)
    pub speed_factor: f64,
    #[serde(default = "default_reliability_factor")]
    pub reliability_factor: f64,
}

fn default_reliability_factor() -> f64 {
    0.95
}

/// What a chunk-sizing strategy optimises for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectivePriority {
    StorageEfficiency,
    Speed,
    CostEfficiency,
    Balanced,
}

/// Named bundle of chunk-sizing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub max_chunk_size: usize,
    /// Fraction of free storage a chunk may consume
    #[serde(rename = "storage_threshold")]
    pub storage_usage_threshold: f64,
    #[serde(rename = "priority")]
    pub objective_priority: ObjectivePriority,
}

/// Resources requested for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequirement {
    pub cpus: u32,
    pub memory_gb: u32,
    pub walltime_hours: f64,
    pub storage_gb: f64,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_queue: Option<String>,
}

fn default_priority() -> u32 {
    1
}

impl JobRequirement {
    pub fn new(cpus: u32, memory_gb: u32, walltime_hours: f64, storage_gb: f64) -> Self {
        Self {
            cpus,
            memory_gb,
            walltime_hours,
            storage_gb,
            priority: default_priority(),
            preferred_queue: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_preferred_queue(mut self, queue: impl Into<String>) -> Self {
        self.preferred_queue = Some(queue.into());
        self
    }
}

/// Resources and queue chosen for one job
///
/// Carries exactly what the submission layer needs to build a queue request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub cpus: u32,
    pub memory_gb: u32,
    pub walltime_hours: f64,
    pub queue: String,
    pub estimated_cost: f64,
    pub estimated_duration_hours: f64,
    pub success_probability: f64,
}

/// History entry for one allocation decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub timestamp: DateTime<Utc>,
    pub requirements: JobRequirement,
    pub allocation: ResourceAllocation,
}

/// Coarse bucketing of an exhaustion probability
///
/// Ordered so that `max` over a set of levels yields the worst one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Unknown,
    Low,
    Moderate,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Unknown => write!(f, "UNKNOWN"),
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Moderate => write!(f, "MODERATE"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Exhaustion estimate for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhaustionForecast {
    pub resource_type: String,
    pub exhaustion_probability: f64,
    /// `None` when usage is not growing
    pub time_to_exhaustion_hours: Option<f64>,
    pub risk_level: RiskLevel,
    /// Usage fraction the forecast was computed from
    pub current_usage: f64,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExhaustionForecast {
    /// Forecast for a resource with no usable input
    pub fn unknown(resource_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            exhaustion_probability: 0.0,
            time_to_exhaustion_hours: None,
            risk_level: RiskLevel::Unknown,
            current_usage: 0.0,
            recommendations: vec![
                "UNKNOWN RISK: Check system status".to_string(),
                "UNKNOWN RISK: Verify resource data".to_string(),
            ],
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_reading_available_cores() {
        let cpu = CpuReading::new(64, 10.0);
        // floor(6.4) = 6 busy
        assert_eq!(cpu.available, 58);

        let saturated = CpuReading::new(8, 250.0);
        assert_eq!(saturated.usage_percent, 100.0);
        assert_eq!(saturated.available, 0);
    }

    #[test]
    fn test_usage_percent_clamped() {
        assert_eq!(clamp_percent(-4.0), 0.0);
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(42.5), 42.5);

        let storage = StorageReading::from_bytes(0, 10, 0);
        assert_eq!(storage.usage_percent, 0.0);
    }

    #[test]
    fn test_risk_level_ordering() {
        let worst = [RiskLevel::Low, RiskLevel::Unknown, RiskLevel::High, RiskLevel::Moderate]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, RiskLevel::High);
        assert!(RiskLevel::Unknown < RiskLevel::Low);
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn test_job_requirement_defaults_priority() {
        let req: JobRequirement = serde_json::from_str(
            r#"{"cpus": 4, "memory_gb": 32, "walltime_hours": 12.0, "storage_gb": 2.5}"#,
        )
        .unwrap();
        assert_eq!(req.priority, 1);
        assert!(req.preferred_queue.is_none());
    }
}
