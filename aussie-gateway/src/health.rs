//! Health check handlers
//!
//! Liveness is a bare "the process is up" probe. Readiness reports on the
//! gateway's actual dependencies: the signing-key registry (must have
//! completed its initial refresh before the gateway can validate tokens)
//! and the service registry (the repository backing it must be reachable).

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::gateway::GatewayAppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response with dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Dependency statuses
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency is healthy
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Simple health check (liveness probe)
///
/// Always returns 200 OK if the service is running. Used by orchestrators
/// to decide whether the process should be restarted.
pub async fn health(State(_state): State<GatewayAppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check with dependency validation (readiness probe)
///
/// Returns 200 OK once the signing-key registry has completed at least one
/// refresh and the service registry repository answers. Returns 503
/// otherwise, so the gateway is taken out of rotation until it can actually
/// validate tokens and route requests.
pub async fn readiness(State(state): State<GatewayAppState>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();
    let mut all_ready = true;

    let signing_ready = state.admin.signing_keys.is_ready();
    if !signing_ready {
        all_ready = false;
    }
    let message = match state.admin.signing_keys.last_refresh_time() {
        Some(ts) => format!("last refresh {}", ts.to_rfc3339()),
        None => "no refresh yet".to_string(),
    };
    dependencies.insert(
        "signing_keys".to_string(),
        DependencyStatus { healthy: signing_ready, message: Some(message) },
    );

    match state.admin.registry.get_all().await {
        Ok(services) => {
            dependencies.insert(
                "service_registry".to_string(),
                DependencyStatus {
                    healthy: true,
                    message: Some(format!("{} service(s) registered", services.len())),
                },
            );
        }
        Err(e) => {
            all_ready = false;
            dependencies.insert(
                "service_registry".to_string(),
                DependencyStatus { healthy: false, message: Some(format!("repository error: {e}")) },
            );
        }
    }

    let response = ReadinessResponse { ready: all_ready, dependencies };

    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: Some("1.0.0".to_string()),
        };

        assert_eq!(response.status, "healthy");
    }

    #[test]
    fn test_dependency_status() {
        let status = DependencyStatus {
            healthy: true,
            message: Some("OK".to_string()),
        };

        assert!(status.healthy);
        assert_eq!(status.message, Some("OK".to_string()));
    }
}
