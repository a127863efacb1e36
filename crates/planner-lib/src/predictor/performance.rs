//! Job duration, success and chunk-size estimates

use crate::config::SizingCalibration;
use crate::history::HistoryStore;
use crate::models::{AllocationRecord, JobRequirement, QueueProfile};
use serde::Serialize;
use std::sync::Arc;

/// Storage throughput of one CPU, in GB per hour
const GB_PER_CPU_HOUR: f64 = 0.1;

/// Allocations required before insights are reported
const INSIGHT_MIN_ALLOCATIONS: usize = 10;

/// Recent allocations summarised by insights
const INSIGHT_WINDOW: usize = 10;

/// Expected hours for `req` on `cpus` cores in `queue`
pub fn predict_duration(req: &JobRequirement, cpus: u32, queue: &QueueProfile) -> f64 {
    req.storage_gb / (cpus.max(1) as f64 * GB_PER_CPU_HOUR) * queue.speed_factor
}

/// Chance the job completes with the given shape
///
/// Mean of CPU and memory adequacy, scaled by queue reliability.
pub fn predict_success_probability(
    req: &JobRequirement,
    cpus: u32,
    memory_gb: u32,
    queue: &QueueProfile,
) -> f64 {
    let cpu_adequacy = adequacy(cpus, req.cpus);
    let memory_adequacy = adequacy(memory_gb, req.memory_gb);
    ((cpu_adequacy + memory_adequacy) / 2.0 * queue.reliability_factor).clamp(0.0, 1.0)
}

fn adequacy(granted: u32, required: u32) -> f64 {
    if required == 0 {
        1.0
    } else {
        (granted as f64 / required as f64).min(1.0)
    }
}

/// Chunk size suggested by past allocations
///
/// `records` are most recent first. Only records with a storage footprint
/// count; with none, the calibrated default is returned.
pub fn optimal_chunk_from(records: &[AllocationRecord], calibration: &SizingCalibration) -> usize {
    let sizes: Vec<f64> = records
        .iter()
        .take(calibration.prediction_window)
        .filter(|r| r.requirements.storage_gb > 0.0)
        .map(|r| r.allocation.cpus as f64 * calibration.prediction_scale)
        .collect();

    if sizes.is_empty() {
        return calibration.default_predicted_chunk;
    }
    (sizes.iter().sum::<f64>() / sizes.len() as f64) as usize
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceInsights {
    pub sample_size: usize,
    /// Mean success probability of recent allocations
    pub success_rate: f64,
    pub average_cost: f64,
}

impl PerformanceInsights {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Recent job success rate: {:.1}%", self.success_rate * 100.0),
            format!("Average job cost: ${:.2}", self.average_cost),
        ]
    }
}

/// History-backed predictions
pub struct PerformancePredictor {
    history: Arc<HistoryStore>,
    calibration: SizingCalibration,
}

impl PerformancePredictor {
    pub fn new(history: Arc<HistoryStore>, calibration: SizingCalibration) -> Self {
        Self {
            history,
            calibration,
        }
    }

    pub async fn predict_optimal_chunk_size(&self) -> usize {
        let records = self
            .history
            .recent_allocations(self.calibration.prediction_window)
            .await;
        optimal_chunk_from(&records, &self.calibration)
    }

    /// Summary of recent allocations, once enough have been recorded
    pub async fn insights(&self) -> Option<PerformanceInsights> {
        if self.history.stats().await.allocations <= INSIGHT_MIN_ALLOCATIONS {
            return None;
        }
        let recent = self.history.recent_allocations(INSIGHT_WINDOW).await;
        let n = recent.len() as f64;
        Some(PerformanceInsights {
            sample_size: recent.len(),
            success_rate: recent.iter().map(|r| r.allocation.success_probability).sum::<f64>() / n,
            average_cost: recent.iter().map(|r| r.allocation.estimated_cost).sum::<f64>() / n,
        })
    }
}
