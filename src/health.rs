use crate::connection::ConnectionHandle;
use crate::error::ERROR_METRICS;
use crate::store::ContainerRef;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const STORE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SLOW_PROBE_MS: u128 = 1_000;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but slow or partially failing
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Combines two health statuses, returning the worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy_with_details(component: impl Into<String>, details: serde_json::Value) -> Self {
        Self::build(component, HealthStatus::Healthy, None, Some(details))
    }

    pub fn degraded_with_details(
        component: impl Into<String>,
        error: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::build(component, HealthStatus::Degraded, Some(error.into()), Some(details))
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::build(component, HealthStatus::Unhealthy, Some(error.into()), None)
    }

    fn build(
        component: impl Into<String>,
        status: HealthStatus,
        error: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            error,
            timestamp: now(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Components that are not ready
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Liveness and readiness probes for the HTTP surface.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    handle: ConnectionHandle,
    target: ContainerRef,
}

impl HealthChecker {
    pub fn new(handle: ConnectionHandle, target: ContainerRef) -> Self {
        Self { handle, target }
    }

    /// The process is up; says nothing about the store.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ready when the store connection is open and the container can be read.
    pub async fn readiness(&self) -> ReadinessResponse {
        let mut components = HashMap::new();
        components.insert("store".to_string(), self.check_store().await);
        components.insert("errors".to_string(), check_error_counters());

        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();
        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        not_ready.sort();

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
            components,
        }
    }

    async fn check_store(&self) -> ComponentHealth {
        let store = match self.handle.store() {
            Ok(store) => store,
            Err(err) => return ComponentHealth::unhealthy("store", err.to_string()),
        };

        let started = Instant::now();
        let probe = timeout(STORE_PROBE_TIMEOUT, store.read_container(&self.target)).await;
        let elapsed = started.elapsed();

        match probe {
            Ok(Ok(properties)) => {
                let details = serde_json::json!({
                    "backend": store.backend_name(),
                    "container": self.target.to_string(),
                    "partition_key": properties.partition_key_path(),
                    "latency_ms": elapsed.as_millis() as u64,
                });
                if elapsed.as_millis() > SLOW_PROBE_MS {
                    ComponentHealth::degraded_with_details(
                        "store",
                        format!("container read took {}ms", elapsed.as_millis()),
                        details,
                    )
                } else {
                    ComponentHealth::healthy_with_details("store", details)
                }
            }
            Ok(Err(err)) => ComponentHealth::unhealthy(
                "store",
                format!("cannot read container {}: {}", self.target, err),
            ),
            Err(_) => ComponentHealth::unhealthy(
                "store",
                format!(
                    "container read timed out after {}s",
                    STORE_PROBE_TIMEOUT.as_secs()
                ),
            ),
        }
    }
}

// Error counters never fail readiness; they are reported for operators.
fn check_error_counters() -> ComponentHealth {
    let stats = ERROR_METRICS.get_stats();
    let total: u64 = stats.kind_counts.values().sum();
    let details = serde_json::json!({
        "total": total,
        "by_operation": stats.operation_errors,
    });
    ComponentHealth::healthy_with_details("errors", details)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness().await
}
