//! Periodic monitoring and threshold alerting

mod alerter;
mod r#loop;

pub use alerter::{Alert, AlertKind, Alerter, DEFAULT_DEDUP_WINDOW};
pub use r#loop::{MonitorLoop, MonitorLoopBuilder};
