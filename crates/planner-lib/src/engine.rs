//! Caller-facing planner engine
//!
//! Owns one instance of every component and wires them together. Nothing
//! here is global except the metrics registry.

use crate::catalog::QueueCatalog;
use crate::config::{ConfigDocument, PlannerConfig};
use crate::cost::CostEstimator;
use crate::error::{PlannerError, Result};
use crate::health::{components, HealthRegistry};
use crate::history::{HistoryStats, HistoryStore};
use crate::models::{JobRequirement, ResourceAllocation, ResourceSnapshot, SubReading};
use crate::monitor::MonitorLoopBuilder;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::planning::{order_pending, AllocationScorer, ChunkSizingEngine, SizingDecision};
use crate::predictor::{
    ExhaustionPredictor, ExhaustionReport, GrowthRates, PerformanceInsights,
    PerformancePredictor, Reading, StorageFailureForecast, GROWTH_WINDOW,
};
use crate::telemetry::{HostProbe, QueueStatusSource, TelemetryCollector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Storage usage fraction above which the report recommends cleanup
const REPORT_STORAGE_CRITICAL: f64 = 0.9;
/// Pending jobs above which a queue is reported as overloaded
const REPORT_QUEUE_OVERLOADED: u32 = 50;
/// Average cost above which the report flags allocation cost
const REPORT_AVERAGE_COST_HIGH: f64 = 50.0;
const REPORT_COST_WINDOW: usize = 10;

/// Per-queue line of the planner report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueAnalysis {
    pub name: String,
    pub running: u32,
    pub pending: u32,
    /// `None` for queues missing from the catalog
    pub max_jobs: Option<u32>,
    pub utilization_percent: f64,
    pub cost_per_cpu_hour: f64,
}

/// Current telemetry plus derived recommendations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannerReport {
    pub generated_at: DateTime<Utc>,
    pub snapshot: ResourceSnapshot,
    pub queues: Vec<QueueAnalysis>,
    pub recommendations: Vec<String>,
    pub cost_analysis: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<PerformanceInsights>,
    pub exhaustion: ExhaustionReport,
    pub history: HistoryStats,
}

impl PlannerReport {
    /// Plain-text rendering for operators
    pub fn lines(&self) -> Vec<String> {
        let s = &self.snapshot;
        let mut lines = vec![
            format!("Planner report generated {}", self.generated_at.to_rfc3339()),
            "System resources:".to_string(),
            format!("  CPU: {} total, {:.1}% used", s.cpu.count, s.cpu.usage_percent),
            format!(
                "  Memory: {:.1}GB total, {:.1}% used",
                s.memory.total_gb, s.memory.usage_percent
            ),
            format!(
                "  Storage: {:.1}GB total, {:.1}% used",
                s.storage.total_gb, s.storage.usage_percent
            ),
        ];
        for reading in &s.degraded {
            lines.push(format!("  {reading}: unknown"));
        }

        lines.push("Queue analysis:".to_string());
        for q in &self.queues {
            let max_jobs = q.max_jobs.map_or("N/A".to_string(), |m| m.to_string());
            lines.push(format!("  {}:", q.name));
            lines.push(format!(
                "    Running: {}/{} ({:.1}%)",
                q.running, max_jobs, q.utilization_percent
            ));
            lines.push(format!("    Pending: {}", q.pending));
            lines.push(format!("    Cost: ${:.2}/CPU-hour", q.cost_per_cpu_hour));
        }

        lines.push("Recommendations:".to_string());
        lines.extend(self.recommendations.iter().map(|r| format!("  - {r}")));
        lines.push(format!("Overall exhaustion risk: {}", self.exhaustion.overall_risk));
        lines.extend(self.cost_analysis.iter().cloned());
        if let Some(insights) = &self.insights {
            lines.extend(insights.lines());
        }
        lines
    }
}

pub struct PlannerEngine {
    config: ConfigDocument,
    telemetry: Arc<TelemetryCollector>,
    history: Arc<HistoryStore>,
    catalog: Arc<QueueCatalog>,
    costs: CostEstimator,
    exhaustion: Arc<ExhaustionPredictor>,
    performance: Arc<PerformancePredictor>,
    scorer: AllocationScorer,
    sizing: ChunkSizingEngine,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl PlannerEngine {
    pub fn new(
        config: ConfigDocument,
        history: Arc<HistoryStore>,
        host: Arc<dyn HostProbe>,
        queues: Arc<dyn QueueStatusSource>,
    ) -> Self {
        let cfg = config.config().clone();
        let telemetry = Arc::new(
            TelemetryCollector::new(host, queues)
                .with_query_timeout(cfg.monitoring.queue_query_timeout()),
        );
        let catalog = Arc::new(QueueCatalog::new(cfg.queues.clone()));
        let costs = CostEstimator::new(cfg.sizing.clone());
        let performance = Arc::new(PerformancePredictor::new(history.clone(), cfg.sizing.clone()));

        let scorer = AllocationScorer::new(
            catalog.clone(),
            history.clone(),
            costs.clone(),
            cfg.cost.clone(),
        );
        let sizing = ChunkSizingEngine::new(
            telemetry.clone(),
            catalog.clone(),
            performance.clone(),
            cfg.strategies.clone(),
            cfg.sizing.clone(),
        );

        Self {
            telemetry,
            history,
            catalog,
            costs,
            exhaustion: Arc::new(ExhaustionPredictor::default()),
            performance,
            scorer,
            sizing,
            health: HealthRegistry::new(),
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::new(cfg.cluster_name),
            config,
        }
    }

    /// Register components and mark the engine ready
    pub async fn start(&self) {
        for component in [
            components::TELEMETRY,
            components::HISTORY,
            components::CATALOG,
        ] {
            self.health.register(component).await;
        }
        let stats = self.history.stats().await;
        self.metrics.set_history_size(stats.snapshots, stats.allocations);
        self.health.set_ready(true).await;
    }

    pub fn config(&self) -> &PlannerConfig {
        self.config.config()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn catalog(&self) -> &Arc<QueueCatalog> {
        &self.catalog
    }

    pub async fn compute_chunk_size(&self, total_items: usize, strategy: &str) -> Result<usize> {
        Ok(self.decide_chunk_size(total_items, strategy).await?.chunk_size)
    }

    /// Chunk size with the limits it was derived from
    pub async fn decide_chunk_size(&self, total_items: usize, strategy: &str) -> Result<SizingDecision> {
        let decision = self.sizing.decide(total_items, strategy).await?;
        self.metrics.set_last_chunk_size(decision.chunk_size);
        self.logger.log_chunk_size(total_items, strategy, decision.chunk_size);
        Ok(decision)
    }

    pub async fn allocate(&self, requirement: &JobRequirement) -> Result<ResourceAllocation> {
        match self.scorer.allocate(requirement).await {
            Ok(allocation) => {
                self.metrics.inc_allocations(&allocation.queue);
                self.logger.log_allocation(&allocation);
                Ok(allocation)
            }
            Err(e) => {
                if matches!(e, PlannerError::NoFeasibleQueue { .. }) {
                    self.metrics.inc_allocation_failures();
                }
                Err(e)
            }
        }
    }

    /// Pending jobs in the order they should be allocated
    pub fn order_pending(&self, jobs: Vec<JobRequirement>) -> Vec<JobRequirement> {
        order_pending(jobs)
    }

    /// Exhaustion forecast from a fresh sample
    ///
    /// Falls back to the latest recorded snapshot when sampling fails, and
    /// to an all-UNKNOWN report when there is none.
    pub async fn predict_exhaustion(&self) -> ExhaustionReport {
        let growth = self.growth_rates().await;
        let io_errors = self.telemetry.io_errors_per_hour().await;

        match self.current_snapshot().await {
            Some(snapshot) => self.exhaustion.predict(&snapshot, &growth, io_errors),
            None => self
                .exhaustion
                .predict_value(&serde_json::Value::Null, &growth, io_errors),
        }
    }

    /// Storage failure forecast from a fresh sample
    pub async fn predict_storage_failure(&self) -> StorageFailureForecast {
        let growth = self.growth_rates().await;
        let io_errors = self.telemetry.io_errors_per_hour().await;
        let usage = match self.current_snapshot().await {
            Some(s) if !s.is_degraded(SubReading::Storage) => {
                Reading::Number(s.storage.usage_percent / 100.0)
            }
            _ => Reading::Null,
        };
        self.exhaustion
            .storage_predictor()
            .predict(usage, growth.storage, io_errors)
    }

    /// Structured report over the latest recorded telemetry
    ///
    /// Reads history only, so repeated calls see the same numbers. When no
    /// snapshot has been recorded yet, one is sampled and recorded first.
    pub async fn report(&self) -> Result<PlannerReport> {
        let snapshot = match self.history.latest_snapshot().await {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self.telemetry.sample().await?;
                self.history.record_snapshot(snapshot.clone()).await;
                snapshot
            }
        };

        let catalog = self.catalog.snapshot();
        let queues: Vec<QueueAnalysis> = snapshot
            .queues
            .iter()
            .map(|(name, occupancy)| {
                let profile = catalog.iter().find(|q| &q.name == name);
                let max_jobs = profile.map(|q| q.max_jobs).or(occupancy.max_jobs);
                QueueAnalysis {
                    name: name.clone(),
                    running: occupancy.running,
                    pending: occupancy.pending,
                    max_jobs,
                    utilization_percent: occupancy.running as f64
                        / max_jobs.unwrap_or(1).max(1) as f64
                        * 100.0,
                    cost_per_cpu_hour: profile.map_or(0.0, |q| q.cost_per_cpu_hour),
                }
            })
            .collect();

        let growth = self.growth_rates().await;
        let io_errors = self.telemetry.io_errors_per_hour().await;
        let exhaustion = self.exhaustion.predict(&snapshot, &growth, io_errors);
        self.metrics.set_overall_risk(exhaustion.overall_risk);

        Ok(PlannerReport {
            generated_at: Utc::now(),
            recommendations: self.recommendations(&snapshot).await,
            queues,
            cost_analysis: self.costs.analyze_costs(&catalog),
            insights: self.performance.insights().await,
            exhaustion,
            history: self.history.stats().await,
            snapshot,
        })
    }

    async fn recommendations(&self, snapshot: &ResourceSnapshot) -> Vec<String> {
        let mut recommendations = Vec::new();

        if !snapshot.is_degraded(SubReading::Storage)
            && snapshot.storage.usage_percent / 100.0 > REPORT_STORAGE_CRITICAL
        {
            recommendations.push("Storage usage critical - consider cleanup or expansion".to_string());
        }

        for (name, occupancy) in &snapshot.queues {
            if occupancy.pending > REPORT_QUEUE_OVERLOADED {
                recommendations.push(format!(
                    "Queue {name} overloaded - consider using alternative queues"
                ));
            }
        }

        if self.history.stats().await.allocations > REPORT_COST_WINDOW {
            let recent = self.history.recent_allocations(REPORT_COST_WINDOW).await;
            let average = recent.iter().map(|r| r.allocation.estimated_cost).sum::<f64>()
                / recent.len() as f64;
            if average > REPORT_AVERAGE_COST_HIGH {
                recommendations.push(
                    "Average job cost high - consider optimizing resource allocation".to_string(),
                );
            }
        }

        recommendations
    }

    /// Re-read queue profiles from the configuration file
    ///
    /// Returns the number of queues now in the catalog. Without a backing
    /// file the current set is kept.
    pub async fn reload_catalog(&self) -> Result<usize> {
        let Some(path) = self.config.path() else {
            return Ok(self.catalog.len());
        };
        match ConfigDocument::load(path) {
            Ok(document) => {
                let queues = document.config().queues.clone();
                let count = queues.len();
                self.catalog.reload(queues);
                self.health.set_healthy(components::CATALOG).await;
                self.logger.log_catalog_reload(count);
                Ok(count)
            }
            Err(e) => {
                self.health
                    .set_degraded(components::CATALOG, format!("reload failed: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn persist(&self) -> Result<()> {
        match self.history.persist().await {
            Ok(()) => {
                self.health.set_healthy(components::HISTORY).await;
                Ok(())
            }
            Err(e) => {
                self.health
                    .set_degraded(components::HISTORY, format!("persist failed: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    /// Monitor loop builder wired to this engine's components
    pub fn monitor_loop(&self) -> MonitorLoopBuilder {
        let cfg = self.config.config();
        MonitorLoopBuilder::new()
            .telemetry(self.telemetry.clone())
            .history(self.history.clone())
            .predictor(self.exhaustion.clone())
            .health(self.health.clone())
            .settings(cfg.monitoring.clone())
            .cluster(cfg.cluster_name.clone())
    }

    async fn growth_rates(&self) -> GrowthRates {
        GrowthRates::from_snapshots(&self.history.recent_snapshots(GROWTH_WINDOW).await)
    }

    async fn current_snapshot(&self) -> Option<ResourceSnapshot> {
        match self.telemetry.sample().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Sampling failed, using latest recorded snapshot");
                self.history.latest_snapshot().await
            }
        }
    }
}
