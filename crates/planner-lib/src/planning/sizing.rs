//! Chunk sizing
//!
//! A chunk size is the smallest of several independent limits, bounded by
//! the strategy cap and the configured minimum:
//! - free storage, scaled by the strategy's storage threshold
//! - total queue slots times the strategy cap
//! - free CPU cores times items per core
//! - the cost-optimal size for the whole workload
//! - the size suggested by past allocations

use crate::catalog::QueueCatalog;
use crate::config::SizingCalibration;
use crate::cost::CostEstimator;
use crate::error::{PlannerError, Result};
use crate::models::{ResourceSnapshot, StrategyProfile, SubReading};
use crate::predictor::PerformancePredictor;
use crate::telemetry::TelemetryCollector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Individual limits behind one sizing decision
///
/// Limits whose reading was degraded in the sample are `None` and do not
/// constrain the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingCandidates {
    pub by_storage: Option<usize>,
    pub by_queue_capacity: usize,
    pub by_cpu: Option<usize>,
    pub cost_optimal: usize,
    pub predicted: usize,
}

impl SizingCandidates {
    /// Smallest limit, bounded to `[min_chunk, max(strategy cap, min_chunk)]`
    pub fn resolve(&self, strategy_cap: usize, min_chunk: usize) -> usize {
        let smallest = [
            self.by_storage,
            Some(self.by_queue_capacity),
            self.by_cpu,
            Some(self.cost_optimal),
            Some(self.predicted),
            Some(strategy_cap),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(strategy_cap);

        smallest.max(min_chunk).min(strategy_cap.max(min_chunk))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingDecision {
    pub chunk_size: usize,
    pub strategy: String,
    /// `None` when telemetry was unavailable
    pub candidates: Option<SizingCandidates>,
}

pub struct ChunkSizingEngine {
    telemetry: Arc<TelemetryCollector>,
    catalog: Arc<QueueCatalog>,
    performance: Arc<PerformancePredictor>,
    costs: CostEstimator,
    strategies: BTreeMap<String, StrategyProfile>,
    calibration: SizingCalibration,
}

impl ChunkSizingEngine {
    pub fn new(
        telemetry: Arc<TelemetryCollector>,
        catalog: Arc<QueueCatalog>,
        performance: Arc<PerformancePredictor>,
        strategies: BTreeMap<String, StrategyProfile>,
        calibration: SizingCalibration,
    ) -> Self {
        Self {
            telemetry,
            catalog,
            performance,
            costs: CostEstimator::new(calibration.clone()),
            strategies,
            calibration,
        }
    }

    pub fn strategy(&self, name: &str) -> Result<&StrategyProfile> {
        self.strategies
            .get(name)
            .ok_or_else(|| PlannerError::UnknownStrategy(name.to_string()))
    }

    pub async fn compute_chunk_size(&self, total_items: usize, strategy: &str) -> Result<usize> {
        Ok(self.decide(total_items, strategy).await?.chunk_size)
    }

    /// Chunk size together with the limits it was derived from
    pub async fn decide(&self, total_items: usize, strategy_name: &str) -> Result<SizingDecision> {
        let strategy = self.strategy(strategy_name)?;
        let min_chunk = self.calibration.min_chunk_size;
        let cap = strategy.max_chunk_size.max(min_chunk);

        if total_items == 0 {
            return Ok(SizingDecision {
                chunk_size: min_chunk,
                strategy: strategy_name.to_string(),
                candidates: None,
            });
        }

        let snapshot = match self.telemetry.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, strategy = strategy_name, chunk_size = cap, "Telemetry unavailable, using strategy cap");
                return Ok(SizingDecision {
                    chunk_size: cap,
                    strategy: strategy_name.to_string(),
                    candidates: None,
                });
            }
        };

        let candidates = self.candidates(total_items, strategy, &snapshot).await;
        let chunk_size = candidates.resolve(strategy.max_chunk_size, min_chunk);

        info!(
            total_items,
            strategy = strategy_name,
            chunk_size,
            "Optimal chunk size calculated"
        );
        Ok(SizingDecision {
            chunk_size,
            strategy: strategy_name.to_string(),
            candidates: Some(candidates),
        })
    }

    async fn candidates(
        &self,
        total_items: usize,
        strategy: &StrategyProfile,
        snapshot: &ResourceSnapshot,
    ) -> SizingCandidates {
        let c = &self.calibration;

        let by_storage = (!snapshot.is_degraded(SubReading::Storage)).then(|| {
            let per_item = c.per_item_storage_gb.max(f64::MIN_POSITIVE);
            (snapshot.storage.free_gb.max(0.0) * strategy.storage_usage_threshold / per_item).floor()
                as usize
        });
        let by_cpu = (!snapshot.is_degraded(SubReading::Cpu))
            .then(|| (snapshot.cpu.available as usize).saturating_mul(c.items_per_cpu));
        let by_queue_capacity =
            (self.catalog.total_capacity() as usize).saturating_mul(strategy.max_chunk_size);

        SizingCandidates {
            by_storage,
            by_queue_capacity,
            by_cpu,
            cost_optimal: self.costs.cost_optimal_chunk_size(total_items),
            predicted: self.performance.predict_optimal_chunk_size().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::history::HistoryStore;
    use crate::models::{CpuReading, MemoryReading, StorageReading};
    use crate::telemetry::{FixedHostProbe, FixedQueueStatus};

    fn ample_host() -> FixedHostProbe {
        FixedHostProbe::new(
            CpuReading::new(128, 10.0),
            MemoryReading {
                total_gb: 512.0,
                available_gb: 400.0,
                usage_percent: 20.0,
            },
            StorageReading {
                total_gb: 10_000.0,
                used_gb: 1_000.0,
                free_gb: 9_000.0,
                usage_percent: 10.0,
            },
        )
    }

    fn engine_with(host: FixedHostProbe, calibration: SizingCalibration) -> ChunkSizingEngine {
        let config = PlannerConfig::default();
        let history = Arc::new(HistoryStore::with_capacity(100));
        ChunkSizingEngine::new(
            Arc::new(TelemetryCollector::new(Arc::new(host), Arc::new(FixedQueueStatus::new()))),
            Arc::new(QueueCatalog::new(config.queues)),
            Arc::new(PerformancePredictor::new(history, calibration.clone())),
            config.strategies,
            calibration,
        )
    }

    #[tokio::test]
    async fn test_strategy_cap_binds_with_ample_resources() {
        // Cost window raised so the cost-optimal size does not bind at 10000 items
        let calibration = SizingCalibration {
            cost_optimal_min: 1000,
            ..Default::default()
        };
        let engine = engine_with(ample_host(), calibration);

        assert_eq!(engine.compute_chunk_size(10_000, "balanced").await.unwrap(), 1000);
        assert_eq!(engine.compute_chunk_size(10_000, "storage_optimized").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_cost_optimal_size_binds_for_small_workloads() {
        let engine = engine_with(ample_host(), SizingCalibration::default());

        let decision = engine.decide(10_000, "balanced").await.unwrap();
        let candidates = decision.candidates.unwrap();
        assert_eq!(candidates.cost_optimal, 500);
        // 9000 GB * 0.9 / 0.15 GB per item, modulo float rounding
        assert!(matches!(candidates.by_storage, Some(n) if (53_999..=54_000).contains(&n)));
        assert_eq!(candidates.by_cpu, Some(116 * 20));
        assert_eq!(candidates.by_queue_capacity, 180_000);
        assert_eq!(candidates.predicted, 1000);
        assert_eq!(decision.chunk_size, 500);
    }

    #[tokio::test]
    async fn test_scarce_cpu_floors_at_minimum() {
        let host = ample_host().with_cpu(Some(CpuReading::new(4, 100.0)));
        let engine = engine_with(host, SizingCalibration::default());

        assert_eq!(engine.compute_chunk_size(50_000, "time_optimized").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_zero_items_yield_minimum() {
        let engine = engine_with(FixedHostProbe::failing(), SizingCalibration::default());
        assert_eq!(engine.compute_chunk_size(0, "balanced").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_an_error() {
        let engine = engine_with(ample_host(), SizingCalibration::default());
        assert!(matches!(
            engine.compute_chunk_size(1000, "fastest").await,
            Err(PlannerError::UnknownStrategy(name)) if name == "fastest"
        ));
    }

    #[tokio::test]
    async fn test_telemetry_failure_returns_strategy_cap() {
        let engine = ChunkSizingEngine::new(
            Arc::new(TelemetryCollector::new(
                Arc::new(FixedHostProbe::failing()),
                Arc::new(FixedQueueStatus::failing()),
            )),
            Arc::new(QueueCatalog::new(PlannerConfig::default().queues)),
            Arc::new(PerformancePredictor::new(
                Arc::new(HistoryStore::with_capacity(10)),
                SizingCalibration::default(),
            )),
            PlannerConfig::default().strategies,
            SizingCalibration::default(),
        );
        assert_eq!(engine.compute_chunk_size(5000, "time_optimized").await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_degraded_storage_does_not_constrain() {
        let host = ample_host().with_storage(None);
        let engine = engine_with(host, SizingCalibration::default());

        let decision = engine.decide(40_000, "time_optimized").await.unwrap();
        assert_eq!(decision.candidates.unwrap().by_storage, None);
        // min(queue 360000, cpu 2320, cost 2000, predicted 1000, cap 2000)
        assert_eq!(decision.chunk_size, 1000);
    }

    #[tokio::test]
    async fn test_huge_items_per_cpu_saturates() {
        let calibration = SizingCalibration {
            items_per_cpu: usize::MAX,
            ..Default::default()
        };
        let engine = engine_with(ample_host(), calibration);

        let decision = engine.decide(40_000, "time_optimized").await.unwrap();
        assert_eq!(decision.candidates.unwrap().by_cpu, Some(usize::MAX));
        assert_eq!(decision.chunk_size, 1000);
    }

    #[test]
    fn test_result_always_within_bounds() {
        let base = SizingCandidates {
            by_storage: Some(0),
            by_queue_capacity: 0,
            by_cpu: None,
            cost_optimal: 0,
            predicted: 0,
        };
        assert_eq!(base.resolve(1000, 100), 100);

        let huge = SizingCandidates {
            by_storage: None,
            by_queue_capacity: usize::MAX,
            by_cpu: Some(usize::MAX),
            cost_optimal: usize::MAX,
            predicted: usize::MAX,
        };
        assert_eq!(huge.resolve(1000, 100), 1000);
        // Cap below the minimum resolves to the minimum
        assert_eq!(huge.resolve(50, 100), 100);
    }
}
