//! Queue selection and job shaping
//!
//! Every feasible queue is scored on a weighted blend of estimated cost,
//! predicted duration and failure chance. The lowest score wins. An
//! allocation over the per-job cost ceiling gets one corrective pass that
//! halves its CPU and memory request.

use crate::catalog::{feasible_in, QueueCatalog};
use crate::config::CostSettings;
use crate::cost::CostEstimator;
use crate::error::{PlannerError, Result};
use crate::history::HistoryStore;
use crate::models::{AllocationRecord, JobRequirement, QueueProfile, ResourceAllocation};
use crate::predictor::{predict_duration, predict_success_probability};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Floors applied by the corrective pass
const MIN_CORRECTED_CPUS: u32 = 1;
const MIN_CORRECTED_MEMORY_GB: u32 = 8;

pub struct AllocationScorer {
    catalog: Arc<QueueCatalog>,
    history: Arc<HistoryStore>,
    costs: CostEstimator,
    settings: CostSettings,
}

impl AllocationScorer {
    pub fn new(
        catalog: Arc<QueueCatalog>,
        history: Arc<HistoryStore>,
        costs: CostEstimator,
        settings: CostSettings,
    ) -> Self {
        Self {
            catalog,
            history,
            costs,
            settings,
        }
    }

    /// Choose a queue and shape for `req` and record the decision
    pub async fn allocate(&self, req: &JobRequirement) -> Result<ResourceAllocation> {
        let allocation = self.choose(req)?;

        self.history
            .record_allocation(AllocationRecord {
                timestamp: chrono::Utc::now(),
                requirements: req.clone(),
                allocation: allocation.clone(),
            })
            .await;

        info!(
            queue = %allocation.queue,
            cpus = allocation.cpus,
            memory_gb = allocation.memory_gb,
            estimated_cost = allocation.estimated_cost,
            "Resources allocated"
        );
        Ok(allocation)
    }

    /// Pick the best allocation without recording it
    pub fn choose(&self, req: &JobRequirement) -> Result<ResourceAllocation> {
        let profiles = self.catalog.snapshot();
        let candidates = candidate_queues(&profiles, req);

        let mut best: Option<(f64, ResourceAllocation, &QueueProfile)> = None;
        for queue in &candidates {
            let allocation = self.shape(req, queue, req.cpus, req.memory_gb);
            let score = self.score(&allocation);
            debug!(queue = %queue.name, score, cost = allocation.estimated_cost, "Scored queue");

            // Strict comparison keeps the first enumerated queue on ties
            if best.as_ref().map_or(true, |(s, _, _)| score < *s) {
                best = Some((score, allocation, queue));
            }
        }

        let Some((_, allocation, queue)) = best else {
            return Err(PlannerError::NoFeasibleQueue {
                cpus: req.cpus,
                memory_gb: req.memory_gb,
                walltime_hours: req.walltime_hours,
            });
        };

        if allocation.estimated_cost > self.settings.max_cost_per_job {
            let cpus = (allocation.cpus / 2)
                .max(MIN_CORRECTED_CPUS)
                .min(queue.max_cpu_per_job);
            let memory_gb = (allocation.memory_gb / 2)
                .max(MIN_CORRECTED_MEMORY_GB)
                .min(queue.max_memory_per_job);
            let corrected = self.shape(req, queue, cpus, memory_gb);
            warn!(
                queue = %queue.name,
                cost = allocation.estimated_cost,
                corrected_cost = corrected.estimated_cost,
                ceiling = self.settings.max_cost_per_job,
                "Allocation over cost ceiling, halved request"
            );
            return Ok(corrected);
        }

        Ok(allocation)
    }

    /// Weighted score, lower is better
    pub fn score(&self, allocation: &ResourceAllocation) -> f64 {
        let s = &self.settings;
        s.cost_weight * allocation.estimated_cost
            + s.time_weight * allocation.estimated_duration_hours
            + s.reliability_weight * (1.0 - allocation.success_probability)
    }

    fn shape(
        &self,
        req: &JobRequirement,
        queue: &QueueProfile,
        cpus: u32,
        memory_gb: u32,
    ) -> ResourceAllocation {
        let cpus = cpus.min(queue.max_cpu_per_job);
        let memory_gb = memory_gb.min(queue.max_memory_per_job);
        let walltime_hours = req.walltime_hours.min(queue.max_walltime_hours);

        ResourceAllocation {
            cpus,
            memory_gb,
            walltime_hours,
            queue: queue.name.clone(),
            estimated_cost: self.costs.estimate_cost(cpus, memory_gb, walltime_hours, queue),
            estimated_duration_hours: predict_duration(req, cpus, queue),
            success_probability: predict_success_probability(req, cpus, memory_gb, queue),
        }
    }
}

/// Feasible queues, the preferred one first when it is feasible
fn candidate_queues(profiles: &[QueueProfile], req: &JobRequirement) -> Vec<QueueProfile> {
    let mut feasible = feasible_in(profiles, req);
    if let Some(preferred) = req.preferred_queue.as_deref() {
        if let Some(pos) = feasible.iter().position(|q| q.name == preferred) {
            let queue = feasible.remove(pos);
            feasible.insert(0, queue);
        }
    }
    feasible
}

/// Order pending jobs by priority, then by CPU and memory demand
pub fn order_pending(mut jobs: Vec<JobRequirement>) -> Vec<JobRequirement> {
    jobs.sort_by_key(|j| (j.priority, j.cpus, j.memory_gb));
    jobs
}
