//! Job cost estimation

use crate::config::SizingCalibration;
use crate::models::QueueProfile;

/// Memory at which the cost surcharge reaches 10%, in GB
const MEMORY_SURCHARGE_UNIT_GB: f64 = 128.0;
const MEMORY_SURCHARGE_RATE: f64 = 0.1;

/// Estimated cost of running `cpus` cores with `memory_gb` for `walltime_hours`
pub fn estimate_cost(cpus: u32, memory_gb: u32, walltime_hours: f64, queue: &QueueProfile) -> f64 {
    let base = cpus as f64 * walltime_hours * queue.cost_per_cpu_hour;
    let memory_factor = 1.0 + memory_gb as f64 / MEMORY_SURCHARGE_UNIT_GB * MEMORY_SURCHARGE_RATE;
    base * memory_factor
}

#[derive(Debug, Clone, Default)]
pub struct CostEstimator {
    calibration: SizingCalibration,
}

impl CostEstimator {
    pub fn new(calibration: SizingCalibration) -> Self {
        Self { calibration }
    }

    pub fn estimate_cost(
        &self,
        cpus: u32,
        memory_gb: u32,
        walltime_hours: f64,
        queue: &QueueProfile,
    ) -> f64 {
        estimate_cost(cpus, memory_gb, walltime_hours, queue)
    }

    /// Chunk size balancing per-job overhead against per-job cost
    pub fn cost_optimal_chunk_size(&self, total_items: usize) -> usize {
        let c = &self.calibration;
        let upper = c.cost_optimal_max.max(c.cost_optimal_min);
        (total_items / c.cost_optimal_divisor.max(1)).clamp(c.cost_optimal_min, upper)
    }

    /// Per-queue price comparison, empty with fewer than two queues
    pub fn analyze_costs(&self, queues: &[QueueProfile]) -> Vec<String> {
        if queues.len() < 2 {
            return Vec::new();
        }
        let mut lines = vec!["Queue cost comparison:".to_string()];
        lines.extend(
            queues
                .iter()
                .map(|q| format!("  {}: ${:.2}/CPU-hour", q.name, q.cost_per_cpu_hour)),
        );
        lines
    }
}
