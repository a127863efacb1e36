//! Fixed telemetry sources
//!
//! Return preset readings. Used for offline planning and in tests.

use super::{async_trait, HostProbe, QueueStatusSource};
use crate::error::{PlannerError, Result};
use crate::models::{CpuReading, MemoryReading, QueueOccupancy, StorageReading, SubReading};
use std::collections::BTreeMap;

/// Host probe returning preset readings; `None` makes that reading fail
#[derive(Debug, Clone)]
pub struct FixedHostProbe {
    pub cpu: Option<CpuReading>,
    pub memory: Option<MemoryReading>,
    pub storage: Option<StorageReading>,
    pub io_errors_per_hour: f64,
}

impl FixedHostProbe {
    pub fn new(cpu: CpuReading, memory: MemoryReading, storage: StorageReading) -> Self {
        Self {
            cpu: Some(cpu),
            memory: Some(memory),
            storage: Some(storage),
            io_errors_per_hour: 0.0,
        }
    }

    /// Probe whose every reading fails
    pub fn failing() -> Self {
        Self {
            cpu: None,
            memory: None,
            storage: None,
            io_errors_per_hour: 0.0,
        }
    }

    pub fn with_cpu(mut self, cpu: Option<CpuReading>) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn with_memory(mut self, memory: Option<MemoryReading>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_storage(mut self, storage: Option<StorageReading>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_io_errors(mut self, per_hour: f64) -> Self {
        self.io_errors_per_hour = per_hour;
        self
    }
}

impl Default for FixedHostProbe {
    fn default() -> Self {
        Self::new(
            CpuReading::new(16, 25.0),
            MemoryReading {
                total_gb: 64.0,
                available_gb: 32.0,
                usage_percent: 50.0,
            },
            StorageReading {
                total_gb: 1000.0,
                used_gb: 500.0,
                free_gb: 500.0,
                usage_percent: 50.0,
            },
        )
    }
}

fn unavailable<T>(reading: Option<&T>, which: SubReading) -> Result<T>
where
    T: Clone,
{
    reading
        .cloned()
        .ok_or_else(|| PlannerError::sensing(which, "reading not available"))
}

impl HostProbe for FixedHostProbe {
    fn cpu(&self) -> Result<CpuReading> {
        unavailable(self.cpu.as_ref(), SubReading::Cpu)
    }

    fn memory(&self) -> Result<MemoryReading> {
        unavailable(self.memory.as_ref(), SubReading::Memory)
    }

    fn storage(&self) -> Result<StorageReading> {
        unavailable(self.storage.as_ref(), SubReading::Storage)
    }

    fn io_errors_per_hour(&self) -> Result<f64> {
        Ok(self.io_errors_per_hour)
    }
}

/// Queue-status source returning a preset map; `None` makes the query fail
#[derive(Debug, Clone, Default)]
pub struct FixedQueueStatus {
    queues: Option<BTreeMap<String, QueueOccupancy>>,
}

impl FixedQueueStatus {
    pub fn new() -> Self {
        Self {
            queues: Some(BTreeMap::new()),
        }
    }

    pub fn failing() -> Self {
        Self { queues: None }
    }

    pub fn with_queue(mut self, name: &str, pending: u32, running: u32, suspended: u32) -> Self {
        self.queues.get_or_insert_with(BTreeMap::new).insert(
            name.to_string(),
            QueueOccupancy {
                pending,
                running,
                suspended,
                max_jobs: None,
            },
        );
        self
    }

    pub fn with_occupancy(mut self, name: &str, occupancy: QueueOccupancy) -> Self {
        self.queues
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), occupancy);
        self
    }
}

#[async_trait]
impl QueueStatusSource for FixedQueueStatus {
    async fn queue_status(&self) -> Result<BTreeMap<String, QueueOccupancy>> {
        self.queues
            .clone()
            .ok_or_else(|| PlannerError::sensing(SubReading::Queues, "queueing system unreachable"))
    }
}
