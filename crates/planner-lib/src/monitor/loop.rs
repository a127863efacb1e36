//! Background monitoring loop
//!
//! Each cycle samples telemetry, appends it to history, forecasts exhaustion
//! and raises threshold alerts. A failed cycle is logged and the next one is
//! delayed by the back-off interval. Shutdown is only observed between
//! cycles.

use super::alerter::{Alert, Alerter};
use crate::config::MonitoringSettings;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::history::HistoryStore;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::predictor::{ExhaustionPredictor, GrowthRates, GROWTH_WINDOW};
use crate::telemetry::TelemetryCollector;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Allocations inspected for the job failure rate alert
const ALERT_ALLOCATION_WINDOW: usize = 10;

pub struct MonitorLoop {
    telemetry: Arc<TelemetryCollector>,
    history: Arc<HistoryStore>,
    predictor: Arc<ExhaustionPredictor>,
    alerter: Alerter,
    health: HealthRegistry,
    metrics: EngineMetrics,
    settings: MonitoringSettings,
    cycles: u64,
}

impl MonitorLoop {
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.settings.update_interval_seconds,
            backoff_secs = self.settings.error_backoff_seconds,
            "Starting monitor loop"
        );
        self.health.set_healthy(components::MONITOR).await;

        let mut next = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(next) => {}
                _ = shutdown.recv() => {
                    info!(cycles = self.cycles, "Shutting down monitor loop");
                    break;
                }
            }

            next = match self.run_cycle().await {
                Ok(alerts) => {
                    debug!(cycle = self.cycles, alerts = alerts.len(), "Monitor cycle complete");
                    self.health.set_healthy(components::MONITOR).await;
                    self.settings.interval()
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.settings.error_backoff_seconds,
                        "Monitor cycle failed, backing off"
                    );
                    self.health
                        .set_degraded(components::MONITOR, format!("last cycle failed: {e}"))
                        .await;
                    self.settings.backoff_interval()
                }
            };
        }

        self.health.set_unhealthy(components::MONITOR, "monitor loop stopped").await;
    }

    /// One full monitoring pass, returning the alerts emitted
    pub async fn run_cycle(&mut self) -> Result<Vec<Alert>> {
        let start = Instant::now();
        let snapshot = match self.telemetry.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.inc_sensing_errors();
                self.health
                    .set_unhealthy(components::TELEMETRY, e.to_string())
                    .await;
                return Err(e).context("telemetry sample failed");
            }
        };
        self.metrics.observe_sample_latency(start.elapsed().as_secs_f64());
        if !snapshot.degraded.is_empty() {
            self.metrics.inc_sensing_errors();
        }
        self.health
            .update(
                components::TELEMETRY,
                ComponentHealth::from_degraded_readings(&snapshot.degraded),
            )
            .await;

        self.history.record_snapshot(snapshot.clone()).await;

        let recent = self.history.recent_snapshots(GROWTH_WINDOW).await;
        let growth = GrowthRates::from_snapshots(&recent);
        let io_errors = self.telemetry.io_errors_per_hour().await;
        let report = self.predictor.predict(&snapshot, &growth, io_errors);
        self.metrics.set_overall_risk(report.overall_risk);

        let allocations = self.history.recent_allocations(ALERT_ALLOCATION_WINDOW).await;
        let alerts = self
            .alerter
            .emit(self.alerter.evaluate(&snapshot, &report, &allocations));
        for alert in &alerts {
            self.metrics.inc_alerts(&alert.kind.to_string());
        }

        let stats = self.history.stats().await;
        self.metrics.set_history_size(stats.snapshots, stats.allocations);

        self.cycles += 1;
        self.metrics.inc_monitor_cycles();
        self.persist_if_due().await;

        Ok(alerts)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    async fn persist_if_due(&self) {
        let every = self.settings.persist_every_cycles;
        if every == 0 || self.cycles % every != 0 {
            return;
        }
        match self.history.persist().await {
            Ok(()) => self.health.set_healthy(components::HISTORY).await,
            Err(e) => {
                warn!(error = %e, "Failed to persist history");
                self.health
                    .set_degraded(components::HISTORY, format!("persist failed: {e}"))
                    .await;
            }
        }
    }
}

pub struct MonitorLoopBuilder {
    telemetry: Option<Arc<TelemetryCollector>>,
    history: Option<Arc<HistoryStore>>,
    predictor: Arc<ExhaustionPredictor>,
    health: HealthRegistry,
    settings: MonitoringSettings,
    cluster: String,
    alert_sender: Option<mpsc::Sender<Alert>>,
}

impl MonitorLoopBuilder {
    pub fn new() -> Self {
        Self {
            telemetry: None,
            history: None,
            predictor: Arc::new(ExhaustionPredictor::default()),
            health: HealthRegistry::new(),
            settings: MonitoringSettings::default(),
            cluster: "default".to_string(),
            alert_sender: None,
        }
    }

    pub fn telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn predictor(mut self, predictor: Arc<ExhaustionPredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Intervals, thresholds and persistence cadence
    pub fn settings(mut self, settings: MonitoringSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    pub fn alert_sender(mut self, sender: mpsc::Sender<Alert>) -> Self {
        self.alert_sender = Some(sender);
        self
    }

    pub fn build(self) -> Result<MonitorLoop> {
        let telemetry = self
            .telemetry
            .ok_or_else(|| anyhow::anyhow!("Telemetry collector is required"))?;
        let history = self
            .history
            .ok_or_else(|| anyhow::anyhow!("History store is required"))?;

        let mut alerter = Alerter::new(
            self.settings.alert_thresholds.clone(),
            StructuredLogger::new(self.cluster),
        )
        .with_dedup_window(self.settings.alert_dedup_window());
        if let Some(sender) = self.alert_sender {
            alerter = alerter.with_sender(sender);
        }

        Ok(MonitorLoop {
            telemetry,
            history,
            predictor: self.predictor,
            alerter,
            health: self.health,
            metrics: EngineMetrics::new(),
            settings: self.settings,
            cycles: 0,
        })
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::history::HistoryConfig;
    use crate::models::StorageReading;
    use crate::monitor::AlertKind;
    use crate::telemetry::{FixedHostProbe, FixedQueueStatus};

    fn collector(host: FixedHostProbe, queues: FixedQueueStatus) -> Arc<TelemetryCollector> {
        Arc::new(TelemetryCollector::new(Arc::new(host), Arc::new(queues)))
    }

    fn full_disk() -> FixedHostProbe {
        FixedHostProbe::default().with_storage(Some(StorageReading {
            total_gb: 1000.0,
            used_gb: 970.0,
            free_gb: 30.0,
            usage_percent: 97.0,
        }))
    }

    #[test]
    fn test_builder_requires_telemetry() {
        let result = MonitorLoopBuilder::new()
            .history(Arc::new(HistoryStore::with_capacity(10)))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cycle_records_snapshot_and_alerts() {
        let history = Arc::new(HistoryStore::with_capacity(10));
        let health = HealthRegistry::new();
        let mut monitor = MonitorLoopBuilder::new()
            .telemetry(collector(full_disk(), FixedQueueStatus::new().with_queue("normal", 40, 5, 0)))
            .history(history.clone())
            .health(health.clone())
            .build()
            .unwrap();

        let alerts = monitor.run_cycle().await.unwrap();
        assert_eq!(history.stats().await.snapshots, 1);
        assert_eq!(monitor.cycles(), 1);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::StorageUsage));
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::QueuePending && a.subject == "normal"));
        assert_eq!(
            health.status_of(components::TELEMETRY).await,
            Some(ComponentStatus::Healthy)
        );

        // Same conditions inside the dedup window raise nothing new
        assert!(monitor.run_cycle().await.unwrap().is_empty());
        assert_eq!(history.stats().await.snapshots, 2);
    }

    #[tokio::test]
    async fn test_failed_sample_is_an_error() {
        let history = Arc::new(HistoryStore::with_capacity(10));
        let health = HealthRegistry::new();
        let mut monitor = MonitorLoopBuilder::new()
            .telemetry(collector(FixedHostProbe::failing(), FixedQueueStatus::failing()))
            .history(history.clone())
            .health(health.clone())
            .build()
            .unwrap();

        assert!(monitor.run_cycle().await.is_err());
        assert_eq!(history.stats().await.snapshots, 0);
        assert_eq!(
            health.status_of(components::TELEMETRY).await,
            Some(ComponentStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn test_degraded_queue_reading_marks_telemetry_degraded() {
        let health = HealthRegistry::new();
        let mut monitor = MonitorLoopBuilder::new()
            .telemetry(collector(FixedHostProbe::default(), FixedQueueStatus::failing()))
            .history(Arc::new(HistoryStore::with_capacity(10)))
            .health(health.clone())
            .build()
            .unwrap();

        monitor.run_cycle().await.unwrap();
        assert_eq!(
            health.status_of(components::TELEMETRY).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_history_persisted_on_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let history = Arc::new(HistoryStore::new(HistoryConfig {
            max_entries: 10,
            persistence_path: Some(path.clone()),
        }));
        let settings = MonitoringSettings {
            persist_every_cycles: 2,
            ..Default::default()
        };
        let mut monitor = MonitorLoopBuilder::new()
            .telemetry(collector(FixedHostProbe::default(), FixedQueueStatus::new()))
            .history(history)
            .settings(settings)
            .build()
            .unwrap();

        monitor.run_cycle().await.unwrap();
        assert!(!path.exists());
        monitor.run_cycle().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let history = Arc::new(HistoryStore::with_capacity(100));
        let health = HealthRegistry::new();
        let settings = MonitoringSettings {
            update_interval_seconds: 3600,
            ..Default::default()
        };
        let monitor = MonitorLoopBuilder::new()
            .telemetry(collector(FixedHostProbe::default(), FixedQueueStatus::new()))
            .history(history.clone())
            .health(health.clone())
            .settings(settings)
            .build()
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.run(rx));

        // First cycle runs immediately, then the loop waits an hour
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor loop did not stop")
            .unwrap();

        assert_eq!(history.stats().await.snapshots, 1);
        assert_eq!(
            health.status_of(components::MONITOR).await,
            Some(ComponentStatus::Unhealthy)
        );
    }
}
