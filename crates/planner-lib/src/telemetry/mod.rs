//! Telemetry collection from the host and the queueing system
//!
//! A sample combines host CPU/memory/storage counters with per-queue job
//! counts. Each sub-reading can fail on its own; a failed sub-reading is
//! zero-filled and listed in `ResourceSnapshot::degraded` instead of failing
//! the whole sample.

mod fixed;
mod host;
mod lsf;

pub use fixed::{FixedHostProbe, FixedQueueStatus};
pub use host::PsutilHostProbe;
pub use lsf::{parse_bqueues, LsfQueueStatus, DEFAULT_QUERY_TIMEOUT};

use crate::error::{PlannerError, Result};
use crate::models::{
    CpuReading, MemoryReading, QueueOccupancy, ResourceSnapshot, StorageReading, SubReading,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use async_trait::async_trait;

/// Host resource counters
pub trait HostProbe: Send + Sync {
    fn cpu(&self) -> Result<CpuReading>;

    fn memory(&self) -> Result<MemoryReading>;

    /// Usage of the volume work items are written to
    fn storage(&self) -> Result<StorageReading>;

    /// Recent I/O errors per hour on the storage volume
    fn io_errors_per_hour(&self) -> Result<f64> {
        Ok(0.0)
    }
}

/// Per-queue job counts from the external queueing system
#[async_trait]
pub trait QueueStatusSource: Send + Sync {
    async fn queue_status(&self) -> Result<BTreeMap<String, QueueOccupancy>>;
}

/// Takes consistent resource snapshots
pub struct TelemetryCollector {
    host: Arc<dyn HostProbe>,
    queues: Arc<dyn QueueStatusSource>,
    query_timeout: Duration,
}

impl TelemetryCollector {
    pub fn new(host: Arc<dyn HostProbe>, queues: Arc<dyn QueueStatusSource>) -> Self {
        Self {
            host,
            queues,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Upper bound on the queue-status query and on each host read
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Sample host and queue state
    ///
    /// Fails only when every sub-reading failed.
    pub async fn sample(&self) -> Result<ResourceSnapshot> {
        let cpu_host = self.host.clone();
        let storage_host = self.host.clone();

        // Storage sits on its own blocking task so a hung mount only
        // degrades the storage reading
        let (cpu_memory, storage, queues) = tokio::join!(
            self.blocking_read(SubReading::Cpu, move || (cpu_host.cpu(), cpu_host.memory())),
            self.blocking_read(SubReading::Storage, move || storage_host.storage()),
            tokio::time::timeout(self.query_timeout, self.queues.queue_status()),
        );

        let (cpu, memory) = match cpu_memory {
            Ok(readings) => readings,
            Err(e) => {
                let message = e.to_string();
                (
                    Err(PlannerError::sensing(SubReading::Cpu, &message)),
                    Err(PlannerError::sensing(SubReading::Memory, &message)),
                )
            }
        };
        let storage = storage.and_then(|reading| reading);
        let queues = match queues {
            Ok(result) => result,
            Err(_) => Err(PlannerError::sensing(
                SubReading::Queues,
                format!("query timed out after {:?}", self.query_timeout),
            )),
        };

        let mut degraded = Vec::new();
        let cpu = settle(cpu, SubReading::Cpu, &mut degraded);
        let memory = settle(memory, SubReading::Memory, &mut degraded);
        let storage = settle(storage, SubReading::Storage, &mut degraded);
        let queues = settle(queues, SubReading::Queues, &mut degraded);

        if degraded.len() == 4 {
            return Err(PlannerError::TelemetryUnavailable(
                "every sub-reading failed".to_string(),
            ));
        }

        debug!(
            cpu_usage = cpu.usage_percent,
            storage_usage = storage.usage_percent,
            queues = queues.len(),
            degraded = degraded.len(),
            "Telemetry sampled"
        );

        Ok(ResourceSnapshot {
            timestamp: chrono::Utc::now(),
            cpu,
            memory,
            storage,
            queues,
            degraded,
        })
    }

    /// Run a host read on the blocking pool, bounded by the query timeout
    async fn blocking_read<T, F>(&self, which: SubReading, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match tokio::time::timeout(self.query_timeout, tokio::task::spawn_blocking(read)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PlannerError::sensing(which, format!("host probe task failed: {e}"))),
            Err(_) => Err(PlannerError::sensing(
                which,
                format!("host read timed out after {:?}", self.query_timeout),
            )),
        }
    }

    /// I/O error rate, zero when it cannot be read
    pub async fn io_errors_per_hour(&self) -> f64 {
        let host = self.host.clone();
        match self
            .blocking_read(SubReading::Storage, move || host.io_errors_per_hour())
            .await
        {
            Ok(Ok(rate)) if rate.is_finite() => rate.max(0.0),
            Ok(Ok(_)) => 0.0,
            Ok(Err(e)) | Err(e) => {
                debug!(error = %e, "I/O error rate unavailable");
                0.0
            }
        }
    }
}

fn settle<T: Default>(reading: Result<T>, which: SubReading, degraded: &mut Vec<SubReading>) -> T {
    match reading {
        Ok(value) => value,
        Err(e) => {
            warn!(reading = %which, error = %e, "Telemetry sub-reading failed, using empty value");
            degraded.push(which);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowQueues;

    #[async_trait]
    impl QueueStatusSource for SlowQueues {
        async fn queue_status(&self) -> Result<BTreeMap<String, QueueOccupancy>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(BTreeMap::new())
        }
    }

    #[tokio::test]
    async fn test_sample_combines_readings() {
        let host = FixedHostProbe::new(
            CpuReading::new(64, 10.0),
            MemoryReading {
                total_gb: 256.0,
                available_gb: 128.0,
                usage_percent: 50.0,
            },
            StorageReading {
                total_gb: 1000.0,
                used_gb: 400.0,
                free_gb: 600.0,
                usage_percent: 40.0,
            },
        );
        let queues = FixedQueueStatus::new().with_queue("normal", 5, 20, 0);
        let collector = TelemetryCollector::new(Arc::new(host), Arc::new(queues));

        let snapshot = collector.sample().await.unwrap();
        assert_eq!(snapshot.cpu.available, 58);
        assert_eq!(snapshot.storage.free_gb, 600.0);
        assert_eq!(snapshot.queues["normal"].running, 20);
        assert!(snapshot.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_failed_queue_query_degrades_field() {
        let collector = TelemetryCollector::new(
            Arc::new(FixedHostProbe::default()),
            Arc::new(FixedQueueStatus::failing()),
        );

        let snapshot = collector.sample().await.unwrap();
        assert!(snapshot.queues.is_empty());
        assert_eq!(snapshot.degraded, vec![SubReading::Queues]);
    }

    #[tokio::test]
    async fn test_queue_query_times_out() {
        let collector = TelemetryCollector::new(Arc::new(FixedHostProbe::default()), Arc::new(SlowQueues))
            .with_query_timeout(Duration::from_millis(50));

        let snapshot = collector.sample().await.unwrap();
        assert!(snapshot.is_degraded(SubReading::Queues));
        assert!(!snapshot.is_degraded(SubReading::Cpu));
    }

    struct HungStorage(FixedHostProbe);

    impl HostProbe for HungStorage {
        fn cpu(&self) -> Result<CpuReading> {
            self.0.cpu()
        }

        fn memory(&self) -> Result<MemoryReading> {
            self.0.memory()
        }

        fn storage(&self) -> Result<StorageReading> {
            std::thread::sleep(Duration::from_millis(500));
            self.0.storage()
        }
    }

    #[tokio::test]
    async fn test_hung_storage_read_times_out() {
        let collector = TelemetryCollector::new(
            Arc::new(HungStorage(FixedHostProbe::default())),
            Arc::new(FixedQueueStatus::new()),
        )
        .with_query_timeout(Duration::from_millis(50));

        let snapshot = collector.sample().await.unwrap();
        assert_eq!(snapshot.degraded, vec![SubReading::Storage]);
        assert_eq!(snapshot.storage, StorageReading::default());
    }

    #[tokio::test]
    async fn test_all_readings_failing_is_an_error() {
        let collector = TelemetryCollector::new(
            Arc::new(FixedHostProbe::failing()),
            Arc::new(FixedQueueStatus::failing()),
        );

        assert!(matches!(
            collector.sample().await,
            Err(PlannerError::TelemetryUnavailable(_))
        ));
    }
}
