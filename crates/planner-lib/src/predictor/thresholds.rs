//! Threshold tables and the risk staircase

use crate::models::RiskLevel;

/// Ordered `(threshold, probability)` steps
///
/// The first step whose threshold is strictly exceeded wins. Steps are listed
/// from the highest threshold down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdTable {
    steps: &'static [(f64, f64)],
}

impl ThresholdTable {
    pub const fn new(steps: &'static [(f64, f64)]) -> Self {
        Self { steps }
    }

    pub fn probability(&self, usage: f64) -> f64 {
        self.steps
            .iter()
            .find(|(threshold, _)| usage > *threshold)
            .map_or(0.0, |(_, probability)| *probability)
    }

    pub fn steps(&self) -> &'static [(f64, f64)] {
        self.steps
    }
}

pub const CPU_TABLE: ThresholdTable = ThresholdTable::new(&[(0.95, 0.8), (0.80, 0.4), (0.60, 0.1)]);

pub const MEMORY_TABLE: ThresholdTable =
    ThresholdTable::new(&[(0.95, 0.9), (0.80, 0.5), (0.60, 0.2)]);

pub const STORAGE_TABLE: ThresholdTable =
    ThresholdTable::new(&[(0.95, 0.95), (0.90, 0.7), (0.80, 0.3)]);

/// Applied to `(running + pending) / max_jobs`
pub const QUEUE_TABLE: ThresholdTable =
    ThresholdTable::new(&[(0.90, 0.8), (0.80, 0.4), (0.60, 0.1)]);

/// Usage fraction at or above which a resource counts as already exhausted
pub const CRITICAL_USAGE: f64 = 0.95;

/// Shortest horizon ever reported, in hours
pub const MIN_HORIZON_HOURS: f64 = 0.1;

pub fn risk_level(probability: f64) -> RiskLevel {
    if probability > 0.8 {
        RiskLevel::Critical
    } else if probability > 0.5 {
        RiskLevel::High
    } else if probability > 0.2 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    }
}

/// Hours until usage reaches `limit` at `growth_per_hour`
///
/// `None` when usage is not growing. Never below [`MIN_HORIZON_HOURS`].
pub fn time_to_exhaustion(usage: f64, growth_per_hour: f64, limit: f64) -> Option<f64> {
    if usage >= CRITICAL_USAGE {
        Some(MIN_HORIZON_HOURS)
    } else if growth_per_hour > 0.0 {
        Some(((limit - usage) / growth_per_hour).max(MIN_HORIZON_HOURS))
    } else {
        None
    }
}

/// Operator guidance for a risk level
pub fn recommendations(level: RiskLevel) -> Vec<String> {
    let lines: &[&str] = match level {
        RiskLevel::Critical => &[
            "CRITICAL: Immediate resource management required",
            "CRITICAL: Reduce job concurrency",
            "CRITICAL: Implement emergency resource allocation",
            "CRITICAL: Contact system administrators",
        ],
        RiskLevel::High => &[
            "HIGH RISK: Optimize resource allocation",
            "HIGH RISK: Reduce job queue size",
            "HIGH RISK: Monitor resource usage closely",
            "HIGH RISK: Plan resource expansion",
        ],
        RiskLevel::Moderate => &[
            "MODERATE RISK: Continue monitoring",
            "MODERATE RISK: Optimize job scheduling",
            "MODERATE RISK: Plan resource management",
        ],
        RiskLevel::Unknown => &[
            "UNKNOWN RISK: Check system status",
            "UNKNOWN RISK: Verify resource data",
        ],
        RiskLevel::Low => &[
            "LOW RISK: Normal operations",
            "LOW RISK: Regular monitoring sufficient",
        ],
    };
    lines.iter().map(|s| s.to_string()).collect()
}
