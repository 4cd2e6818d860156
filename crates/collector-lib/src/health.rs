//! Component health and readiness as served on `/healthz` and `/readyz`
//!
//! Each stage of the collection loop reports into a shared
//! [`HealthRegistry`]. Liveness follows the worst component status; readiness
//! additionally waits for the Kubernetes caches to finish their first list.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, e.g. one source failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessResponse {
    fn not_ready(reason: &str) -> Self {
        Self {
            ready: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Names the collection loop and binary report under
pub mod components {
    pub const SCRAPER: &str = "scraper";
    pub const PROCESSORS: &str = "processors";
    pub const EXPORTER: &str = "exporter";
    pub const KUBE_CACHE: &str = "kube_cache";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    caches_synced: bool,
}

/// Cloneable handle shared by the loop, the cache-sync task and the API
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.set_healthy(name).await;
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into())).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into())).await;
    }

    /// Readiness flips once the Kubernetes caches have synced
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.caches_synced = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.state.read().await.components.clone())
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.caches_synced {
            return ReadinessResponse::not_ready("Kubernetes caches not yet synced");
        }
        let unhealthy = state
            .components
            .values()
            .any(|health| !health.status.is_operational());
        if unhealthy {
            return ReadinessResponse::not_ready("Critical component unhealthy");
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
