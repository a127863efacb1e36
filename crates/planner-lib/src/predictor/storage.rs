//! Storage failure prediction

use super::coerce::{coerce, join_errors, Reading};
use super::thresholds::{risk_level, time_to_exhaustion};
use crate::models::RiskLevel;
use serde::{Deserialize, Serialize};

/// Usage fraction treated as full, leaving a safety margin below 100%
pub const STORAGE_FAILURE_LIMIT: f64 = 1.0 - 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureThresholds {
    pub usage_critical: f64,
    pub usage_warning: f64,
    /// Usage fraction per hour
    pub growth_rate_critical: f64,
    /// I/O errors per hour
    pub io_error_threshold: f64,
}

impl Default for FailureThresholds {
    fn default() -> Self {
        Self {
            usage_critical: 0.95,
            usage_warning: 0.90,
            growth_rate_critical: 0.10,
            io_error_threshold: 5.0,
        }
    }
}

/// Storage failure estimate with operator guidance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageFailureForecast {
    pub failure_probability: f64,
    pub time_to_failure_hours: Option<f64>,
    pub risk_level: RiskLevel,
    pub current_usage: f64,
    pub growth_rate_per_hour: f64,
    pub preventive_measures: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageFailurePredictor {
    thresholds: FailureThresholds,
}

impl StorageFailurePredictor {
    pub fn new(thresholds: FailureThresholds) -> Self {
        Self { thresholds }
    }

    /// Additive failure score, clamped to [0, 1]
    pub fn failure_score(&self, usage: f64, growth_per_hour: f64, io_errors_per_hour: f64) -> f64 {
        let t = &self.thresholds;
        let mut score: f64 = 0.0;
        if usage > t.usage_critical {
            score += 0.7;
        } else if usage > t.usage_warning {
            score += 0.3;
        }
        if growth_per_hour > t.growth_rate_critical {
            score += 0.4;
        }
        if io_errors_per_hour > t.io_error_threshold {
            score += 0.2;
        }
        score.clamp(0.0, 1.0)
    }

    /// Standalone forecast from a usage fraction and a growth rate
    pub fn predict(
        &self,
        usage: impl Into<Reading>,
        growth_per_hour: impl Into<Reading>,
        io_errors_per_hour: f64,
    ) -> StorageFailureForecast {
        let usage = coerce("storage usage", usage, 0.0, 0.0, 1.0);
        let growth = coerce("storage growth rate", growth_per_hour, 0.0, 0.0, f64::MAX);
        let io_errors = if io_errors_per_hour.is_finite() {
            io_errors_per_hour.max(0.0)
        } else {
            0.0
        };

        let probability = self.failure_score(usage.value, growth.value, io_errors);
        let time_to_failure = time_to_exhaustion(usage.value, growth.value, STORAGE_FAILURE_LIMIT);

        StorageFailureForecast {
            failure_probability: probability,
            time_to_failure_hours: time_to_failure,
            risk_level: risk_level(probability),
            current_usage: usage.value,
            growth_rate_per_hour: growth.value,
            preventive_measures: preventive_measures(probability),
            recommendations: horizon_recommendations(time_to_failure),
            error: join_errors([&usage.error, &growth.error]),
        }
    }
}

pub fn preventive_measures(failure_probability: f64) -> Vec<String> {
    let lines: &[&str] = if failure_probability > 0.8 {
        &[
            "CRITICAL: Immediate storage cleanup required",
            "CRITICAL: Request storage expansion immediately",
            "CRITICAL: Stop new job submissions",
            "CRITICAL: Archive old data to external storage",
        ]
    } else if failure_probability > 0.5 {
        &[
            "HIGH RISK: Clean up temporary files",
            "HIGH RISK: Compress old output files",
            "HIGH RISK: Request additional storage",
            "HIGH RISK: Monitor storage usage closely",
        ]
    } else if failure_probability > 0.2 {
        &[
            "MODERATE RISK: Regular cleanup schedule",
            "MODERATE RISK: Monitor growth rate",
            "MODERATE RISK: Plan storage expansion",
        ]
    } else {
        &[
            "LOW RISK: Continue normal operations",
            "LOW RISK: Regular monitoring sufficient",
        ]
    };
    lines.iter().map(|s| s.to_string()).collect()
}

/// Guidance keyed on how soon storage fills up
pub fn horizon_recommendations(time_to_failure_hours: Option<f64>) -> Vec<String> {
    let lines: &[&str] = match time_to_failure_hours {
        Some(t) if t < 24.0 => &[
            "URGENT: Storage will fail within 24 hours",
            "URGENT: Implement emergency cleanup procedures",
        ],
        Some(t) if t < 168.0 => &[
            "WARNING: Storage will fail within 1 week",
            "WARNING: Plan storage expansion immediately",
        ],
        Some(t) if t < 720.0 => &[
            "NOTICE: Storage will fail within 1 month",
            "NOTICE: Schedule storage maintenance",
        ],
        _ => &["OK: Storage stable for extended period"],
    };
    lines.iter().map(|s| s.to_string()).collect()
}
