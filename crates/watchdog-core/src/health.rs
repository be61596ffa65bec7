//! Health of the watchdog's own machinery
//!
//! Four components report here:
//! - `scheduler`: degraded while some keys stop ticking, unhealthy when none tick
//! - `storage`: degraded while writes to the backing store fail
//! - `detection`: degraded while enhanced keys lack the history to score
//! - `retention`: degraded when a sweep fails for any key
//!
//! Traffic alarms never change component health.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Scheduler,
    Storage,
    Detection,
    Retention,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Scheduler,
        Component::Storage,
        Component::Detection,
        Component::Retention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Scheduler => "scheduler",
            Component::Storage => "storage",
            Component::Detection => "detection",
            Component::Retention => "retention",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status over all components
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    started: bool,
}

/// Shared, cloneable view of component health and scheduler readiness
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every component healthy
    pub async fn register_all(&self) {
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state.write().await;
        for component in Component::ALL {
            state.components.insert(
                component,
                ComponentHealth {
                    status: ComponentStatus::Healthy,
                    message: None,
                    since: now,
                },
            );
        }
    }

    /// Record a component's status, returning whether it changed
    ///
    /// A repeated report with the same status only refreshes the message.
    pub async fn report(
        &self,
        component: Component,
        status: ComponentStatus,
        message: Option<String>,
    ) -> bool {
        let mut state = self.state.write().await;
        let previous = state.components.get(&component).map(|h| h.status);
        if previous == Some(status) {
            if let Some(health) = state.components.get_mut(&component) {
                health.message = message;
            }
            return false;
        }

        match status {
            ComponentStatus::Healthy => {
                info!(component = %component, ?previous, "Component recovered")
            }
            _ => warn!(
                component = %component,
                status = ?status,
                message = message.as_deref().unwrap_or(""),
                "Component health changed"
            ),
        }
        state.components.insert(
            component,
            ComponentHealth {
                status,
                message,
                since: chrono::Utc::now().timestamp(),
            },
        );
        true
    }

    pub async fn set_healthy(&self, component: Component) -> bool {
        self.report(component, ComponentStatus::Healthy, None).await
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) -> bool {
        self.report(component, ComponentStatus::Degraded, Some(message.into()))
            .await
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) -> bool {
        self.report(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await
    }

    pub async fn status(&self, component: Component) -> Option<ComponentStatus> {
        self.state
            .read()
            .await
            .components
            .get(&component)
            .map(|h| h.status)
    }

    /// Set once the scheduler has spawned its tasks, cleared on shutdown
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready while the scheduler runs and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("Watchdog not yet started".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(c, _)| c.as_str())
            .collect();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worst_component_sets_overall_status() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);

        registry.register_all().await;
        registry
            .set_degraded(Component::Storage, "Append retries exhausted")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(Component::Scheduler, "No sampling task is ticking")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(health.components.len(), 4);
    }

    #[tokio::test]
    async fn test_repeated_report_keeps_transition_time() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        assert!(registry.set_degraded(Component::Retention, "sweep failed for 1 keys").await);
        let since = registry.health().await.components[&Component::Retention].since;
        assert!(!registry.set_degraded(Component::Retention, "sweep failed for 2 keys").await);

        let health = registry.health().await;
        let retention = &health.components[&Component::Retention];
        assert_eq!(retention.since, since);
        assert_eq!(retention.message.as_deref(), Some("sweep failed for 2 keys"));

        assert!(registry.set_healthy(Component::Retention).await);
        assert_eq!(
            registry.status(Component::Retention).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_components_serialize_by_name() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_degraded(Component::Detection, "warming up").await;

        let json = serde_json::to_value(registry.health().await).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["detection"]["message"], "warming up");
        assert!(json["components"]["storage"]["message"].is_null());
    }

    #[tokio::test]
    async fn test_readiness_follows_start_and_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Watchdog not yet started"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_degraded(Component::Storage, "Failed").await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(Component::Scheduler, "Failed").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("unhealthy: scheduler"));
    }
}
