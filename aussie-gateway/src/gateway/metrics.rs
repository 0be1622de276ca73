//! Local counters for gateway pipeline outcomes.
//!
//! These are plain atomics, not a wired OpenTelemetry meter — attaching a
//! real exporter under the `otel-metrics` feature is future work, the same
//! stub/full split `observability::init_tracing` already uses. A snapshot
//! is exposed over the admin plane so an operator can poll it without one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use super::orchestrator::GatewayResult;

fn outcome_kind(result: &GatewayResult) -> &'static str {
    match result {
        GatewayResult::Success(_) => "success",
        GatewayResult::RouteNotFound => "route_not_found",
        GatewayResult::ServiceNotFound => "service_not_found",
        GatewayResult::ReservedPath => "reserved_path",
        GatewayResult::Unauthorized { .. } => "unauthorized",
        GatewayResult::Forbidden { .. } => "forbidden",
        GatewayResult::BadRequest { .. } => "bad_request",
        GatewayResult::Error { .. } => "error",
    }
}

/// Counters for every [`GatewayResult`] variant plus storage-provider
/// timeouts keyed by provider name (e.g. `"redis"`). Cheap to share: wrap
/// in an `Arc` once and hand clones to the pipeline and the admin plane.
#[derive(Default)]
pub struct GatewayMetrics {
    success: AtomicU64,
    route_not_found: AtomicU64,
    service_not_found: AtomicU64,
    reserved_path: AtomicU64,
    unauthorized: AtomicU64,
    forbidden: AtomicU64,
    bad_request: AtomicU64,
    error: AtomicU64,
    storage_timeouts: Mutex<HashMap<String, u64>>,
}

impl GatewayMetrics {
    pub fn record(&self, result: &GatewayResult) {
        let counter = match outcome_kind(result) {
            "success" => &self.success,
            "route_not_found" => &self.route_not_found,
            "service_not_found" => &self.service_not_found,
            "reserved_path" => &self.reserved_path,
            "unauthorized" => &self.unauthorized,
            "forbidden" => &self.forbidden,
            "bad_request" => &self.bad_request,
            _ => &self.error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a timeout/fail-open event from a named storage provider.
    pub fn record_storage_timeout(&self, provider: &str) {
        let mut timeouts = self.storage_timeouts.lock().expect("storage timeout counters poisoned");
        *timeouts.entry(provider.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            route_not_found: self.route_not_found.load(Ordering::Relaxed),
            service_not_found: self.service_not_found.load(Ordering::Relaxed),
            reserved_path: self.reserved_path.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            forbidden: self.forbidden.load(Ordering::Relaxed),
            bad_request: self.bad_request.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            storage_timeouts: self.storage_timeouts.lock().expect("storage timeout counters poisoned").clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayMetricsSnapshot {
    pub success: u64,
    pub route_not_found: u64,
    pub service_not_found: u64,
    pub reserved_path: u64,
    pub unauthorized: u64,
    pub forbidden: u64,
    pub bad_request: u64,
    pub error: u64,
    pub storage_timeouts: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::response::Response;

    #[test]
    fn counts_outcomes_by_kind() {
        let metrics = GatewayMetrics::default();
        metrics.record(&GatewayResult::RouteNotFound);
        metrics.record(&GatewayResult::RouteNotFound);
        metrics.record(&GatewayResult::Success(Response::new(Body::empty())));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.route_not_found, 2);
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.error, 0);
    }

    #[test]
    fn storage_timeouts_keyed_by_provider() {
        let metrics = GatewayMetrics::default();
        metrics.record_storage_timeout("redis");
        metrics.record_storage_timeout("redis");
        metrics.record_storage_timeout("memory");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.storage_timeouts.get("redis"), Some(&2));
        assert_eq!(snapshot.storage_timeouts.get("memory"), Some(&1));
    }
}
