//! Component health for the planner
//!
//! The monitor loop and the engine report the state of each component here.
//! The daemon serves it on its liveness and readiness endpoints.
//!
//! Liveness reflects every component. Readiness only looks at the components
//! a planning query cannot do without: the queue catalog and telemetry. A
//! failing history file or a stopped monitor loop shows up as unhealthy on
//! the liveness side while queries keep being served.

use crate::models::SubReading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working with reduced inputs
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn at_now(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::at_now(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::at_now(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::at_now(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Telemetry health after a sample that degraded `readings`
    pub fn from_degraded_readings(readings: &[SubReading]) -> Self {
        if readings.is_empty() {
            return Self::healthy();
        }
        let names: Vec<String> = readings.iter().map(|r| r.to_string()).collect();
        Self::degraded(format!("unavailable readings: {}", names.join(", ")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components, healthy when none are registered
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const TELEMETRY: &str = "telemetry";
    pub const HISTORY: &str = "history";
    pub const MONITOR: &str = "monitor";
    pub const CATALOG: &str = "catalog";

    /// Components a planning query depends on
    pub const CRITICAL: &[&str] = &[CATALOG, TELEMETRY];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    initialized: bool,
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
    critical: Arc<[&'static str]>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Registry gated on the planner's critical components
    pub fn new() -> Self {
        Self::with_critical(components::CRITICAL)
    }

    /// Registry whose readiness depends on `critical` only
    pub fn with_critical(critical: &[&'static str]) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            critical: critical.into(),
        }
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.initialized = ready;
    }

    pub async fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.state
            .read()
            .await
            .components
            .get(name)
            .map(|h| h.status)
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialised, while every critical component is registered
    /// and not unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.initialized {
            Some("Planner not yet initialized".to_string())
        } else {
            self.critical
                .iter()
                .find_map(|name| match state.components.get(*name) {
                    None => Some(format!("Component {name} not registered")),
                    Some(h) if h.status == ComponentStatus::Unhealthy => {
                        Some(format!("Component {name} unhealthy"))
                    }
                    Some(_) => None,
                })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started() -> HealthRegistry {
        let registry = HealthRegistry::new();
        for name in [
            components::TELEMETRY,
            components::HISTORY,
            components::CATALOG,
            components::MONITOR,
        ] {
            registry.register(name).await;
        }
        registry.set_ready(true).await;
        registry
    }

    #[tokio::test]
    async fn test_registry_starts_empty_and_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::TELEMETRY).await;
        registry.register(components::HISTORY).await;

        registry.set_degraded(components::TELEMETRY, "queue status unavailable").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::HISTORY, "persist failed").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(components::HISTORY).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_not_ready_until_initialized() {
        let registry = HealthRegistry::new();
        registry.register(components::CATALOG).await;
        registry.register(components::TELEMETRY).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Planner not yet initialized"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unhealthy_critical_component_blocks_readiness() {
        let registry = started().await;

        registry.set_unhealthy(components::TELEMETRY, "every sub-reading failed").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Component telemetry unhealthy"));

        // Degraded telemetry still serves queries
        registry.set_degraded(components::TELEMETRY, "unavailable readings: queues").await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_auxiliary_components_do_not_block_readiness() {
        let registry = started().await;

        registry.set_unhealthy(components::MONITOR, "monitor loop stopped").await;
        registry.set_unhealthy(components::HISTORY, "persist failed").await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_missing_critical_component_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::TELEMETRY).await;
        registry.set_ready(true).await;

        assert_eq!(
            registry.readiness().await.reason.as_deref(),
            Some("Component catalog not registered")
        );
    }

    #[tokio::test]
    async fn test_custom_critical_set() {
        let registry = HealthRegistry::with_critical(&[components::HISTORY]);
        registry.register(components::HISTORY).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::HISTORY, "persist failed").await;
        assert_eq!(
            registry.readiness().await.reason.as_deref(),
            Some("Component history unhealthy")
        );
    }

    #[test]
    fn test_health_from_degraded_readings() {
        assert_eq!(
            ComponentHealth::from_degraded_readings(&[]).status,
            ComponentStatus::Healthy
        );
        let health = ComponentHealth::from_degraded_readings(&[SubReading::Queues, SubReading::Cpu]);
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.message.as_deref(), Some("unavailable readings: queues, cpu"));
    }
}
