//! Closed-form predictors
//!
//! Every estimate here is a fixed heuristic over current readings and recent
//! history. Bad input data never makes a predictor fail.

pub mod coerce;
pub mod exhaustion;
pub mod performance;
pub mod storage;
pub mod thresholds;

pub use coerce::{coerce, Coerced, Reading};
pub use exhaustion::{ExhaustionPredictor, ExhaustionReport, GrowthRates, GROWTH_WINDOW};
pub use performance::{
    predict_duration, predict_success_probability, PerformanceInsights, PerformancePredictor,
};
pub use storage::{FailureThresholds, StorageFailureForecast, StorageFailurePredictor};
pub use thresholds::{risk_level, ThresholdTable};
