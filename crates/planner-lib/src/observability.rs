//! Metrics and structured event logging for the planner
//!
//! Prometheus metrics live in the default registry and are registered once
//! per process. Every handle shares them.

use crate::models::{ResourceAllocation, RiskLevel};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for telemetry sampling latency, in seconds
const SAMPLE_LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    sample_latency_seconds: Histogram,
    allocations: IntCounterVec,
    allocation_failures: IntCounter,
    alerts: IntCounterVec,
    sensing_errors: IntCounter,
    monitor_cycles: IntCounter,
    history_snapshots: IntGauge,
    history_allocations: IntGauge,
    overall_risk: IntGauge,
    last_chunk_size: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "chunk_planner_sample_latency_seconds",
                "Time spent sampling host and queue telemetry",
                SAMPLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            allocations: register_int_counter_vec!(
                "chunk_planner_allocations_total",
                "Allocation decisions by chosen queue",
                &["queue"]
            )
            .expect("Failed to register allocations_total"),

            allocation_failures: register_int_counter!(
                "chunk_planner_allocation_failures_total",
                "Requests no queue could satisfy"
            )
            .expect("Failed to register allocation_failures_total"),

            alerts: register_int_counter_vec!(
                "chunk_planner_alerts_total",
                "Alerts raised by the monitor loop",
                &["kind"]
            )
            .expect("Failed to register alerts_total"),

            sensing_errors: register_int_counter!(
                "chunk_planner_sensing_errors_total",
                "Telemetry samples that failed or came back degraded"
            )
            .expect("Failed to register sensing_errors_total"),

            monitor_cycles: register_int_counter!(
                "chunk_planner_monitor_cycles_total",
                "Completed monitor loop cycles"
            )
            .expect("Failed to register monitor_cycles_total"),

            history_snapshots: register_int_gauge!(
                "chunk_planner_history_snapshots",
                "Telemetry snapshots held in history"
            )
            .expect("Failed to register history_snapshots"),

            history_allocations: register_int_gauge!(
                "chunk_planner_history_allocations",
                "Allocation records held in history"
            )
            .expect("Failed to register history_allocations"),

            overall_risk: register_int_gauge!(
                "chunk_planner_overall_risk",
                "Overall exhaustion risk (0 unknown, 1 low .. 4 critical)"
            )
            .expect("Failed to register overall_risk"),

            last_chunk_size: register_int_gauge!(
                "chunk_planner_last_chunk_size",
                "Most recently computed chunk size"
            )
            .expect("Failed to register last_chunk_size"),
        }
    }
}

/// Handle to the process-wide planner metrics
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn inc_allocations(&self, queue: &str) {
        self.inner().allocations.with_label_values(&[queue]).inc();
    }

    pub fn inc_allocation_failures(&self) {
        self.inner().allocation_failures.inc();
    }

    pub fn inc_alerts(&self, kind: &str) {
        self.inner().alerts.with_label_values(&[kind]).inc();
    }

    pub fn inc_sensing_errors(&self) {
        self.inner().sensing_errors.inc();
    }

    pub fn inc_monitor_cycles(&self) {
        self.inner().monitor_cycles.inc();
    }

    pub fn set_history_size(&self, snapshots: usize, allocations: usize) {
        self.inner().history_snapshots.set(snapshots as i64);
        self.inner().history_allocations.set(allocations as i64);
    }

    pub fn set_overall_risk(&self, risk: RiskLevel) {
        let value = match risk {
            RiskLevel::Unknown => 0,
            RiskLevel::Low => 1,
            RiskLevel::Moderate => 2,
            RiskLevel::High => 3,
            RiskLevel::Critical => 4,
        };
        self.inner().overall_risk.set(value);
    }

    pub fn set_last_chunk_size(&self, chunk_size: usize) {
        self.inner().last_chunk_size.set(chunk_size as i64);
    }
}

/// Event-tagged log records for significant planner actions
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, queues: usize, history_snapshots: usize) {
        info!(
            event = "planner_started",
            cluster = %self.cluster,
            version = %version,
            queues = queues,
            history_snapshots = history_snapshots,
            "Chunk planner started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "planner_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Chunk planner shutting down"
        );
    }

    pub fn log_allocation(&self, allocation: &ResourceAllocation) {
        info!(
            event = "allocation_decided",
            cluster = %self.cluster,
            queue = %allocation.queue,
            cpus = allocation.cpus,
            memory_gb = allocation.memory_gb,
            walltime_hours = allocation.walltime_hours,
            estimated_cost = allocation.estimated_cost,
            success_probability = allocation.success_probability,
            "Allocation decided"
        );
    }

    pub fn log_chunk_size(&self, total_items: usize, strategy: &str, chunk_size: usize) {
        info!(
            event = "chunk_size_computed",
            cluster = %self.cluster,
            total_items = total_items,
            strategy = %strategy,
            chunk_size = chunk_size,
            "Chunk size computed"
        );
    }

    pub fn log_alert(&self, kind: &str, subject: &str, value: f64, threshold: f64, message: &str) {
        warn!(
            event = "alert_raised",
            cluster = %self.cluster,
            kind = %kind,
            subject = %subject,
            value = value,
            threshold = threshold,
            "{}",
            message
        );
    }

    pub fn log_catalog_reload(&self, queues: usize) {
        info!(
            event = "catalog_reloaded",
            cluster = %self.cluster,
            queues = queues,
            "Queue catalog reloaded"
        );
    }
}
