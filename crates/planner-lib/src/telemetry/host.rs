//! Host counters via psutil

use super::HostProbe;
use crate::error::{PlannerError, Result};
use crate::models::{CpuReading, MemoryReading, StorageReading, SubReading};
use psutil::cpu::CpuPercentCollector;
use std::path::PathBuf;
use std::sync::Mutex;

/// Reads CPU, memory and disk counters of the local host
///
/// CPU usage is measured between consecutive calls, so the first sample
/// covers the time since the probe was created.
pub struct PsutilHostProbe {
    storage_path: PathBuf,
    cpu_percent: Mutex<CpuPercentCollector>,
}

impl PsutilHostProbe {
    /// Probe reporting disk usage of the volume holding `storage_path`
    pub fn new(storage_path: impl Into<PathBuf>) -> Result<Self> {
        let collector = CpuPercentCollector::new()
            .map_err(|e| PlannerError::sensing(SubReading::Cpu, e))?;
        Ok(Self {
            storage_path: storage_path.into(),
            cpu_percent: Mutex::new(collector),
        })
    }
}

impl HostProbe for PsutilHostProbe {
    fn cpu(&self) -> Result<CpuReading> {
        let count = psutil::cpu::cpu_count() as u32;
        let usage = {
            let mut collector = self
                .cpu_percent
                .lock()
                .map_err(|_| PlannerError::sensing(SubReading::Cpu, "cpu collector lock poisoned"))?;
            collector
                .cpu_percent()
                .map_err(|e| PlannerError::sensing(SubReading::Cpu, e))?
        };
        Ok(CpuReading::new(count, usage as f64))
    }

    fn memory(&self) -> Result<MemoryReading> {
        let memory = psutil::memory::virtual_memory()
            .map_err(|e| PlannerError::sensing(SubReading::Memory, e))?;
        Ok(MemoryReading::from_bytes(
            memory.total(),
            memory.available(),
            memory.percent() as f64,
        ))
    }

    fn storage(&self) -> Result<StorageReading> {
        let disk = psutil::disk::disk_usage(&self.storage_path)
            .map_err(|e| PlannerError::sensing(SubReading::Storage, e))?;
        Ok(StorageReading::from_bytes(disk.total(), disk.used(), disk.free()))
    }
}
