//! History store for telemetry snapshots and allocation decisions
//!
//! Two independent ring buffers share one lock:
//! - many concurrent readers, a single writer at a time
//! - FIFO eviction once a list reaches its cap
//! - JSON persistence with atomic replace

use crate::config::write_atomically;
use crate::error::{PlannerError, Result};
use crate::models::{AllocationRecord, ResourceSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default cap for each history list
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum entries kept per list
    pub max_entries: usize,
    pub persistence_path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            persistence_path: None,
        }
    }
}

/// Persisted layout, both lists oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub resource_usage: Vec<ResourceSnapshot>,
    #[serde(default)]
    pub job_history: Vec<AllocationRecord>,
}

#[derive(Debug, Default)]
struct HistoryLists {
    snapshots: VecDeque<ResourceSnapshot>,
    allocations: VecDeque<AllocationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub snapshots: usize,
    pub allocations: usize,
    pub capacity: usize,
}

/// Bounded, persisted log of past telemetry and allocation decisions
#[derive(Debug)]
pub struct HistoryStore {
    lists: RwLock<HistoryLists>,
    config: HistoryConfig,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            lists: RwLock::new(HistoryLists::default()),
            config,
        }
    }

    /// In-memory store with the given cap
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::new(HistoryConfig {
            max_entries,
            persistence_path: None,
        })
    }

    /// Load the persisted document from `config.persistence_path`
    ///
    /// A missing file yields an empty store. An unreadable one is an error.
    pub fn load(config: HistoryConfig) -> Result<Self> {
        let store = Self::new(config);
        let Some(path) = store.config.persistence_path.clone() else {
            return Ok(store);
        };
        if !path.exists() {
            return Ok(store);
        }

        let document = read_document(&path)?;
        let cap = store.config.max_entries;
        let lists = HistoryLists {
            snapshots: newest(document.resource_usage, cap),
            allocations: newest(document.job_history, cap),
        };
        info!(
            path = %path.display(),
            snapshots = lists.snapshots.len(),
            allocations = lists.allocations.len(),
            "Loaded history from disk"
        );

        Ok(Self {
            lists: RwLock::new(lists),
            config: store.config,
        })
    }

    /// Load persisted history, starting empty when it cannot be read
    pub fn open(config: HistoryConfig) -> Self {
        match Self::load(config.clone()) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted history, starting fresh");
                Self::new(config)
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.max_entries
    }

    pub async fn record_snapshot(&self, snapshot: ResourceSnapshot) {
        let cap = self.config.max_entries;
        let mut lists = self.lists.write().await;
        push_bounded(&mut lists.snapshots, snapshot, cap);
    }

    pub async fn record_allocation(&self, record: AllocationRecord) {
        let cap = self.config.max_entries;
        let mut lists = self.lists.write().await;
        push_bounded(&mut lists.allocations, record, cap);
    }

    /// Up to `n` allocation records, most recent first
    pub async fn recent_allocations(&self, n: usize) -> Vec<AllocationRecord> {
        let lists = self.lists.read().await;
        lists.allocations.iter().rev().take(n).cloned().collect()
    }

    /// Up to `n` telemetry snapshots, most recent first
    pub async fn recent_snapshots(&self, n: usize) -> Vec<ResourceSnapshot> {
        let lists = self.lists.read().await;
        lists.snapshots.iter().rev().take(n).cloned().collect()
    }

    pub async fn latest_snapshot(&self) -> Option<ResourceSnapshot> {
        self.lists.read().await.snapshots.back().cloned()
    }

    pub async fn stats(&self) -> HistoryStats {
        let lists = self.lists.read().await;
        HistoryStats {
            snapshots: lists.snapshots.len(),
            allocations: lists.allocations.len(),
            capacity: self.config.max_entries,
        }
    }

    /// Copy of both lists in chronological order
    pub async fn document(&self) -> HistoryDocument {
        let lists = self.lists.read().await;
        HistoryDocument {
            resource_usage: lists.snapshots.iter().cloned().collect(),
            job_history: lists.allocations.iter().cloned().collect(),
        }
    }

    /// Write both lists to the persistence path, if one is configured
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = self.config.persistence_path.as_deref() else {
            return Ok(());
        };

        let document = self.document().await;
        let json = serde_json::to_vec_pretty(&document)?;
        write_atomically(path, &json)?;

        debug!(
            path = %path.display(),
            snapshots = document.resource_usage.len(),
            allocations = document.job_history.len(),
            "History persisted"
        );
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<HistoryDocument> {
    let load_error = |message: String| PlannerError::HistoryLoad {
        path: path.to_path_buf(),
        message,
    };
    let data = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
    serde_json::from_slice(&data).map_err(|e| load_error(e.to_string()))
}

fn push_bounded<T>(list: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while list.len() >= cap {
        list.pop_front();
    }
    list.push_back(item);
}

fn newest<T>(items: Vec<T>, cap: usize) -> VecDeque<T> {
    let skip = items.len().saturating_sub(cap);
    items.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CpuReading, JobRequirement, MemoryReading, ResourceAllocation, StorageReading};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn snapshot(i: i64) -> ResourceSnapshot {
        ResourceSnapshot {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::minutes(i),
            cpu: CpuReading::new(16, 25.0),
            memory: MemoryReading::default(),
            storage: StorageReading::default(),
            queues: Default::default(),
            degraded: vec![],
        }
    }

    fn record(cpus: u32) -> AllocationRecord {
        AllocationRecord {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            requirements: JobRequirement::new(cpus, 16, 4.0, 1.5),
            allocation: ResourceAllocation {
                cpus,
                memory_gb: 16,
                walltime_hours: 4.0,
                queue: "normal".to_string(),
                estimated_cost: 0.5,
                estimated_duration_hours: 2.25,
                success_probability: 0.95,
            },
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest_first() {
        let store = HistoryStore::with_capacity(3);
        for cpus in 1..=5 {
            store.record_allocation(record(cpus)).await;
        }

        let recent: Vec<u32> = store
            .recent_allocations(10)
            .await
            .iter()
            .map(|r| r.allocation.cpus)
            .collect();
        assert_eq!(recent, [5, 4, 3]);
        assert_eq!(store.stats().await.allocations, 3);
    }

    #[tokio::test]
    async fn test_lists_capped_independently() {
        let store = HistoryStore::with_capacity(2);
        for i in 0..4 {
            store.record_snapshot(snapshot(i)).await;
        }
        store.record_allocation(record(1)).await;

        let stats = store.stats().await;
        assert_eq!(stats.snapshots, 2);
        assert_eq!(stats.allocations, 1);
        assert_eq!(store.latest_snapshot().await, Some(snapshot(3)));
    }

    #[tokio::test]
    async fn test_round_trip_below_and_above_cap() {
        let dir = TempDir::new().unwrap();

        for (n, expected) in [(3usize, 3usize), (7, 5)] {
            let path = dir.path().join(format!("history-{n}.json"));
            let config = HistoryConfig {
                max_entries: 5,
                persistence_path: Some(path.clone()),
            };

            let store = HistoryStore::new(config.clone());
            for i in 0..n {
                store.record_snapshot(snapshot(i as i64)).await;
                store.record_allocation(record(i as u32 + 1)).await;
            }
            store.persist().await.unwrap();

            let reloaded = HistoryStore::load(config).unwrap();
            let original = store.document().await;
            let restored = reloaded.document().await;

            assert_eq!(restored.resource_usage.len(), expected);
            assert_eq!(restored, original);
            // Oldest surviving entry is the (n - cap)th written
            assert_eq!(restored.job_history[0].allocation.cpus, (n - expected) as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_load_truncates_oversized_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let document = HistoryDocument {
            resource_usage: (0..10).map(snapshot).collect(),
            job_history: vec![],
        };
        std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let store = HistoryStore::load(HistoryConfig {
            max_entries: 4,
            persistence_path: Some(path),
        })
        .unwrap();

        let recent = store.recent_snapshots(10).await;
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0], snapshot(9));
        assert_eq!(recent[3], snapshot(6));
    }

    #[tokio::test]
    async fn test_unreadable_history_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"[not a document").unwrap();
        let config = HistoryConfig {
            max_entries: 10,
            persistence_path: Some(path),
        };

        assert!(matches!(
            HistoryStore::load(config.clone()),
            Err(PlannerError::HistoryLoad { .. })
        ));

        let store = HistoryStore::open(config);
        assert_eq!(store.stats().await.snapshots, 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_respect_cap() {
        let store = Arc::new(HistoryStore::with_capacity(50));
        let mut handles = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..40 {
                    store.record_snapshot(snapshot(task * 100 + i)).await;
                    store.record_allocation(record(1)).await;
                    let _ = store.recent_allocations(5).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = store.stats().await;
        assert_eq!(stats.snapshots, 50);
        assert_eq!(stats.allocations, 50);
    }
}
