//! Queue catalog
//!
//! Holds the set of queue profiles behind a lock that only ever swaps the
//! whole set. Readers take an `Arc` of the current set, so a computation
//! that started before a reload keeps seeing one consistent catalog.

use crate::models::{JobRequirement, QueueProfile};
use std::sync::{Arc, RwLock};
use tracing::info;

pub type CatalogSnapshot = Arc<Vec<QueueProfile>>;

#[derive(Debug)]
pub struct QueueCatalog {
    profiles: RwLock<CatalogSnapshot>,
}

impl QueueCatalog {
    pub fn new(profiles: Vec<QueueProfile>) -> Self {
        Self {
            profiles: RwLock::new(Arc::new(profiles)),
        }
    }

    /// Current profile set, in configured order
    pub fn snapshot(&self) -> CatalogSnapshot {
        match self.profiles.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the whole profile set
    pub fn reload(&self, profiles: Vec<QueueProfile>) {
        let next = Arc::new(profiles);
        let count = next.len();
        match self.profiles.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!(queues = count, "Queue catalog reloaded");
    }

    pub fn get(&self, name: &str) -> Option<QueueProfile> {
        self.snapshot().iter().find(|q| q.name == name).cloned()
    }

    /// Queues whose per-job caps all cover the requirement
    pub fn feasible(&self, requirement: &JobRequirement) -> Vec<QueueProfile> {
        feasible_in(&self.snapshot(), requirement)
    }

    /// Sum of concurrent job slots across all queues
    pub fn total_capacity(&self) -> u64 {
        total_capacity_of(&self.snapshot())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Feasible queues within an already-taken snapshot, in catalog order
pub fn feasible_in(profiles: &[QueueProfile], requirement: &JobRequirement) -> Vec<QueueProfile> {
    profiles
        .iter()
        .filter(|q| {
            requirement.cpus <= q.max_cpu_per_job
                && requirement.memory_gb <= q.max_memory_per_job
                && requirement.walltime_hours <= q.max_walltime_hours
        })
        .cloned()
        .collect()
}

pub fn total_capacity_of(profiles: &[QueueProfile]) -> u64 {
    profiles.iter().map(|q| q.max_jobs as u64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;

    fn catalog() -> QueueCatalog {
        QueueCatalog::new(PlannerConfig::default().queues)
    }

    #[test]
    fn test_total_capacity() {
        assert_eq!(catalog().total_capacity(), 180);
    }

    #[test]
    fn test_feasible_filters_on_every_cap() {
        let catalog = catalog();
        let req = JobRequirement::new(8, 128, 72.0, 5.0);

        let names: Vec<_> = catalog.feasible(&req).into_iter().map(|q| q.name).collect();
        // gpu is excluded by walltime
        assert_eq!(names, ["normal", "hiprio", "long"]);

        let huge = JobRequirement::new(64, 1024, 1.0, 1.0);
        assert!(catalog.feasible(&huge).is_empty());
    }

    #[test]
    fn test_reload_swaps_whole_set() {
        let catalog = catalog();
        let before = catalog.snapshot();

        let mut only = before[0].clone();
        only.name = "solo".to_string();
        catalog.reload(vec![only]);

        // Earlier snapshot is untouched
        assert_eq!(before.len(), 4);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("solo").is_some());
        assert!(catalog.get("normal").is_none());
    }

    #[test]
    fn test_profiles_keep_configured_order() {
        let mut profiles = PlannerConfig::default().queues;
        profiles.reverse();
        let catalog = QueueCatalog::new(profiles);
        let names: Vec<_> = catalog.snapshot().iter().map(|q| q.name.clone()).collect();
        assert_eq!(names, ["gpu", "long", "hiprio", "normal"]);

        catalog.reload(PlannerConfig::default().queues);
        let names: Vec<_> = catalog.snapshot().iter().map(|q| q.name.clone()).collect();
        assert_eq!(names, ["normal", "hiprio", "long", "gpu"]);
    }
}
