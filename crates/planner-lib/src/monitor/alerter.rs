//! Threshold alerts raised by the monitor loop
//!
//! Alerts are deduplicated per (kind, subject) within a window, logged at
//! warn level and forwarded to an optional channel without blocking.

use crate::config::AlertThresholds;
use crate::models::{AllocationRecord, ResourceSnapshot, RiskLevel, SubReading};
use crate::observability::StructuredLogger;
use crate::predictor::ExhaustionReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Default deduplication window (15 minutes)
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Allocations averaged for the job failure rate
const FAILURE_RATE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StorageUsage,
    QueuePending,
    JobFailureRate,
    ExhaustionRisk,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::StorageUsage => write!(f, "storage_usage"),
            AlertKind::QueuePending => write!(f, "queue_pending"),
            AlertKind::JobFailureRate => write!(f, "job_failure_rate"),
            AlertKind::ExhaustionRisk => write!(f, "exhaustion_risk"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Resource or queue the alert is about
    pub subject: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    fn new(kind: AlertKind, subject: impl Into<String>, message: String, value: f64, threshold: f64) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message,
            value,
            threshold,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    kind: AlertKind,
    subject: String,
}

impl From<&Alert> for DedupKey {
    fn from(alert: &Alert) -> Self {
        Self {
            kind: alert.kind,
            subject: alert.subject.clone(),
        }
    }
}

pub struct Alerter {
    thresholds: AlertThresholds,
    dedup_window: Duration,
    /// Last emission time per alert key
    recent_alerts: RwLock<HashMap<DedupKey, Instant>>,
    sender: Option<mpsc::Sender<Alert>>,
    logger: StructuredLogger,
}

impl Alerter {
    pub fn new(thresholds: AlertThresholds, logger: StructuredLogger) -> Self {
        Self {
            thresholds,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            recent_alerts: RwLock::new(HashMap::new()),
            sender: None,
            logger,
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Forward emitted alerts to `sender`
    pub fn with_sender(mut self, sender: mpsc::Sender<Alert>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Alerts for every threshold crossed, before deduplication
    pub fn evaluate(
        &self,
        snapshot: &ResourceSnapshot,
        report: &ExhaustionReport,
        recent_allocations: &[AllocationRecord],
    ) -> Vec<Alert> {
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        if !snapshot.is_degraded(SubReading::Storage) {
            let usage = snapshot.storage.usage_percent / 100.0;
            if usage > t.storage_usage {
                alerts.push(Alert::new(
                    AlertKind::StorageUsage,
                    "storage",
                    format!("Storage usage at {:.1}%", usage * 100.0),
                    usage,
                    t.storage_usage,
                ));
            }
        }

        if !snapshot.is_degraded(SubReading::Queues) {
            for (name, occupancy) in &snapshot.queues {
                if occupancy.pending > t.queue_pending_jobs {
                    alerts.push(Alert::new(
                        AlertKind::QueuePending,
                        name.clone(),
                        format!("Queue {name} has {} pending jobs", occupancy.pending),
                        occupancy.pending as f64,
                        t.queue_pending_jobs as f64,
                    ));
                }
            }
        }

        let window: Vec<&AllocationRecord> =
            recent_allocations.iter().take(FAILURE_RATE_WINDOW).collect();
        if !window.is_empty() {
            let mean_success = window
                .iter()
                .map(|r| r.allocation.success_probability)
                .sum::<f64>()
                / window.len() as f64;
            let failure_rate = 1.0 - mean_success;
            if failure_rate > t.job_failure_rate {
                alerts.push(Alert::new(
                    AlertKind::JobFailureRate,
                    "allocations",
                    format!("Expected job failure rate at {:.1}%", failure_rate * 100.0),
                    failure_rate,
                    t.job_failure_rate,
                ));
            }
        }

        for (resource, forecast) in &report.forecasts {
            if forecast.risk_level != RiskLevel::Unknown
                && forecast.exhaustion_probability > t.exhaustion_probability
            {
                alerts.push(Alert::new(
                    AlertKind::ExhaustionRisk,
                    resource.clone(),
                    format!(
                        "{resource} exhaustion risk {} (p={:.2})",
                        forecast.risk_level, forecast.exhaustion_probability
                    ),
                    forecast.exhaustion_probability,
                    t.exhaustion_probability,
                ));
            }
        }

        alerts
    }

    pub fn should_suppress(&self, alert: &Alert) -> bool {
        let alerts = self.recent_alerts.read().unwrap_or_else(|e| e.into_inner());
        alerts
            .get(&DedupKey::from(alert))
            .is_some_and(|last| last.elapsed() < self.dedup_window)
    }

    pub fn record_alert(&self, alert: &Alert) {
        let mut alerts = self.recent_alerts.write().unwrap_or_else(|e| e.into_inner());
        alerts.insert(DedupKey::from(alert), Instant::now());
        alerts.retain(|_, time| time.elapsed() < self.dedup_window);
    }

    /// Emit alerts not seen within the window and return them
    pub fn emit(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        let mut emitted = Vec::new();
        for alert in alerts {
            if self.should_suppress(&alert) {
                debug!(kind = %alert.kind, subject = %alert.subject, "Alert suppressed");
                continue;
            }
            self.record_alert(&alert);
            self.logger.log_alert(
                &alert.kind.to_string(),
                &alert.subject,
                alert.value,
                alert.threshold,
                &alert.message,
            );
            if let Some(sender) = &self.sender {
                if let Err(e) = sender.try_send(alert.clone()) {
                    debug!(error = %e, "Alert channel full or closed");
                }
            }
            emitted.push(alert);
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CpuReading, JobRequirement, MemoryReading, QueueOccupancy, ResourceAllocation,
        StorageReading,
    };
    use crate::predictor::{ExhaustionPredictor, GrowthRates};
    use std::collections::BTreeMap;
    use std::thread::sleep;

    fn snapshot(storage_usage: f64, pending: u32) -> ResourceSnapshot {
        let mut queues = BTreeMap::new();
        queues.insert(
            "normal".to_string(),
            QueueOccupancy {
                pending,
                running: 10,
                suspended: 0,
                max_jobs: Some(100),
            },
        );
        ResourceSnapshot {
            timestamp: Utc::now(),
            cpu: CpuReading::new(16, 20.0),
            memory: MemoryReading {
                total_gb: 64.0,
                available_gb: 48.0,
                usage_percent: 25.0,
            },
            storage: StorageReading {
                total_gb: 1000.0,
                used_gb: storage_usage * 10.0,
                free_gb: 1000.0 - storage_usage * 10.0,
                usage_percent: storage_usage,
            },
            queues,
            degraded: Vec::new(),
        }
    }

    fn record(success: f64) -> AllocationRecord {
        AllocationRecord {
            timestamp: Utc::now(),
            requirements: JobRequirement::new(4, 16, 1.0, 1.0),
            allocation: ResourceAllocation {
                cpus: 4,
                memory_gb: 16,
                walltime_hours: 1.0,
                queue: "normal".to_string(),
                estimated_cost: 0.4,
                estimated_duration_hours: 1.0,
                success_probability: success,
            },
        }
    }

    fn alerter() -> Alerter {
        Alerter::new(AlertThresholds::default(), StructuredLogger::new("test"))
    }

    fn report_for(snapshot: &ResourceSnapshot) -> ExhaustionReport {
        ExhaustionPredictor::default().predict(snapshot, &GrowthRates::default(), 0.0)
    }

    #[test]
    fn test_quiet_system_raises_nothing() {
        let snap = snapshot(40.0, 3);
        let alerts = alerter().evaluate(&snap, &report_for(&snap), &[record(0.95)]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_thresholds_crossed() {
        let snap = snapshot(97.0, 30);
        let alerts = alerter().evaluate(&snap, &report_for(&snap), &[record(0.5), record(0.9)]);

        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AlertKind::StorageUsage));
        assert!(kinds.contains(&AlertKind::JobFailureRate));
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::QueuePending && a.subject == "normal"));
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::ExhaustionRisk && a.subject == "storage"));
    }

    #[test]
    fn test_degraded_readings_raise_nothing() {
        let mut snap = snapshot(99.0, 50);
        snap.degraded = vec![SubReading::Storage, SubReading::Queues];
        let alerts = alerter().evaluate(&snap, &report_for(&snap), &[]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_deduplication() {
        let alerter = alerter().with_dedup_window(Duration::from_millis(100));
        let snap = snapshot(97.0, 0);
        let candidates = || {
            alerter
                .evaluate(&snap, &report_for(&snap), &[])
                .into_iter()
                .filter(|a| a.kind == AlertKind::StorageUsage)
                .collect::<Vec<_>>()
        };

        assert_eq!(alerter.emit(candidates()).len(), 1);
        assert!(alerter.emit(candidates()).is_empty());

        sleep(Duration::from_millis(150));
        assert_eq!(alerter.emit(candidates()).len(), 1);
    }

    #[test]
    fn test_same_kind_different_subject_not_deduplicated() {
        let alerter = alerter();
        let a = Alert::new(AlertKind::QueuePending, "normal", String::new(), 30.0, 24.0);
        let b = Alert::new(AlertKind::QueuePending, "long", String::new(), 30.0, 24.0);
        assert_eq!(alerter.emit(vec![a.clone(), b]).len(), 2);
        assert!(alerter.should_suppress(&a));
    }

    #[tokio::test]
    async fn test_emitted_alerts_reach_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let alerter = alerter().with_sender(tx);

        let first = Alert::new(AlertKind::StorageUsage, "storage", "full".into(), 0.97, 0.95);
        let second = Alert::new(AlertKind::JobFailureRate, "allocations", "bad".into(), 0.3, 0.1);
        // Channel holds one alert, the second is dropped without blocking
        assert_eq!(alerter.emit(vec![first.clone(), second]).len(), 2);
        assert_eq!(rx.recv().await.unwrap(), first);
        assert!(rx.try_recv().is_err());
    }
}
