//! Chunk planner library for batch workloads on shared clusters
//!
//! This crate provides the core functionality for:
//! - Host and queue telemetry collection
//! - Resource exhaustion and storage failure prediction
//! - Queue selection and chunk sizing
//! - Background monitoring with threshold alerts
//! - Health checks and observability

pub mod catalog;
pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod health;
pub mod history;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod planning;
pub mod predictor;
pub mod telemetry;

pub use config::{ConfigDocument, PlannerConfig};
pub use engine::{PlannerEngine, PlannerReport, QueueAnalysis};
pub use error::{PlannerError, Result, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use history::{HistoryConfig, HistoryStore};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
