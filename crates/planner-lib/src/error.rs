//! Error taxonomy for the planner
//!
//! Heuristic computations never return these for bad input data; they
//! annotate their result instead. Only structural failures surface here.

use crate::models::SubReading;
use std::path::PathBuf;

pub type Result<T, E = PlannerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// A telemetry sub-reading could not be taken
    #[error("failed to read {reading}: {message}")]
    Sensing { reading: SubReading, message: String },

    /// Every telemetry sub-reading failed
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("no queue can satisfy {cpus} cpus / {memory_gb} GB / {walltime_hours} h")]
    NoFeasibleQueue {
        cpus: u32,
        memory_gb: u32,
        walltime_hours: f64,
    },

    #[error("unknown chunk strategy '{0}'")]
    UnknownStrategy(String),

    #[error("failed to load configuration from {path}: {message}")]
    ConfigLoad { path: PathBuf, message: String },

    #[error("failed to load history from {path}: {message}")]
    HistoryLoad { path: PathBuf, message: String },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlannerError {
    pub fn sensing(reading: SubReading, message: impl ToString) -> Self {
        PlannerError::Sensing {
            reading,
            message: message.to_string(),
        }
    }
}

/// Malformed numeric input to a predictor
///
/// Carried as a value on the degraded result, never raised.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
