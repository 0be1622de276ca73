//! Gateway pipeline orchestrator.
//!
//! Composes the registry, router, rate limiter, identity resolver,
//! authorization engine, and proxy transport into the nine explicit
//! stages: extract, reserved-path check, service resolution, route
//! match, rate limit, identity resolution, authorization, forward,
//! response mapping. Every stage either continues or returns a
//! [`GatewayResult`] terminator; stage 9 (response mapping) is
//! [`GatewayResult`]'s `IntoResponse` impl.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use super::authz::{authorize, AuthzDecision};
use super::identity::IdentityResolver;
use super::metrics::{GatewayMetrics, GatewayMetricsSnapshot};
use super::model::Visibility;
use super::proxy::ProxyTransport;
use super::ratelimit::{AuthRateLimiter, LockoutSubject};
use super::registry::ServiceRegistry;
use super::router::Router;

/// RFC 7807 Problem Details body. This is the gateway surface's error
/// shape; the admin/internal surfaces keep the framework's existing
/// `{error, code, status}` response.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

fn problem(status: StatusCode, title: &str, detail: &str) -> Response {
    let body = ProblemDetails {
        type_: "about:blank".to_string(),
        title: title.to_string(),
        status: status.as_u16(),
        detail: detail.to_string(),
        instance: None,
    };
    (status, [(axum::http::header::CONTENT_TYPE, "application/problem+json")], Json(body)).into_response()
}

/// The pipeline's closed result type.
pub enum GatewayResult {
    Success(Response<Body>),
    RouteNotFound,
    ServiceNotFound,
    ReservedPath,
    Unauthorized { reason: String },
    /// `reason == "rate-limited"` maps to 429 with `Retry-After` plus
    /// `X-RateLimit-Limit`/`X-RateLimit-Remaining`/`X-RateLimit-Reset`; any
    /// other reason maps to plain 403. `limit` is the configured
    /// failed-attempt threshold; `remaining` is always 0 here since this
    /// variant only fires once a lockout has actually engaged.
    Forbidden { reason: String, retry_after: Option<Duration>, limit: Option<u32> },
    BadRequest { reason: String },
    Error { message: String },
}

impl IntoResponse for GatewayResult {
    fn into_response(self) -> Response {
        match self {
            Self::Success(response) => response.into_response(),
            Self::RouteNotFound => problem(StatusCode::NOT_FOUND, "Not Found", "no route matches this path and method"),
            Self::ServiceNotFound => problem(StatusCode::NOT_FOUND, "Not Found", "no service is registered for this route"),
            Self::ReservedPath => problem(StatusCode::NOT_FOUND, "Not Found", "this path is reserved for the gateway itself"),
            Self::Unauthorized { reason } => problem(StatusCode::UNAUTHORIZED, "Unauthorized", &reason),
            Self::Forbidden { reason, retry_after, limit } => {
                if reason == "rate-limited" {
                    let mut response = problem(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests", &reason);
                    let headers = response.headers_mut();
                    if let Some(duration) = retry_after {
                        let secs = duration.as_secs().max(1);
                        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                            headers.insert(axum::http::header::RETRY_AFTER, value.clone());
                            headers.insert(HeaderName::from_static("x-ratelimit-reset"), value);
                        }
                    }
                    if let Some(limit) = limit {
                        if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
                            headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
                        }
                    }
                    headers.insert(HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from_static("0"));
                    response
                } else {
                    problem(StatusCode::FORBIDDEN, "Forbidden", &reason)
                }
            }
            Self::BadRequest { reason } => problem(StatusCode::BAD_REQUEST, "Bad Request", &reason),
            Self::Error { message } => {
                let lower = message.to_lowercase();
                let status = if lower.contains("timeout") || lower.contains("deadline") {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                };
                problem(status, "Upstream Error", &message)
            }
        }
    }
}

/// Everything the pipeline needs to process one request. Built by the
/// HTTP handler from the incoming `axum` request; kept separate from
/// `axum::extract::Request` so the pipeline itself has no framework
/// extraction logic to test around.
pub struct GatewayRequestCtx {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
    pub client_ip: String,
    pub host: Option<String>,
    pub scheme: String,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub session_id: Option<String>,
}

fn operation_kind(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" | "HEAD" | "OPTIONS" => "read",
        "POST" | "PUT" | "PATCH" => "write",
        "DELETE" => "delete",
        _ => "read",
    }
}

pub struct GatewayPipeline {
    registry: Arc<ServiceRegistry>,
    router: RwLock<Arc<Router>>,
    rate_limiter: Arc<AuthRateLimiter>,
    identity_resolver: Arc<IdentityResolver>,
    proxy: Arc<ProxyTransport>,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayPipeline {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        rate_limiter: Arc<AuthRateLimiter>,
        identity_resolver: Arc<IdentityResolver>,
        proxy: Arc<ProxyTransport>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            registry,
            router: RwLock::new(Arc::new(Router::default())),
            rate_limiter,
            identity_resolver,
            proxy,
            metrics,
        }
    }

    pub fn metrics_snapshot(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Rebuilds the route match table from the registry's current
    /// snapshot. Call after any admin mutation (register/update/
    /// deregister).
    pub async fn refresh_router(&self) -> crate::error::Result<()> {
        let services = self.registry.get_all().await?;
        *self.router.write().await = Arc::new(Router::new(services));
        Ok(())
    }

    pub async fn handle(&self, ctx: GatewayRequestCtx) -> GatewayResult {
        let (matched, registration) = match self
            .authorize_request(&ctx.path, ctx.method.as_str(), &ctx.client_ip, ctx.api_key.as_deref(), ctx.bearer_token.as_deref(), ctx.session_id.as_deref())
            .await
        {
            Ok(resolved) => resolved,
            Err(result) => {
                self.metrics.record(&result);
                return result;
            }
        };

        let target_url = format!(
            "{}{}{}",
            registration.base_url.trim_end_matches('/'),
            matched.target_path,
            ctx.query.map(|q| format!("?{q}")).unwrap_or_default(),
        );

        let result = match self
            .proxy
            .forward(ctx.method, &target_url, ctx.headers, ctx.body, &ctx.client_ip, ctx.host.as_deref(), &ctx.scheme)
            .await
        {
            Ok(response) => GatewayResult::Success(response),
            Err(e) => GatewayResult::Error { message: e.to_string() },
        };
        self.metrics.record(&result);
        result
    }

    /// Runs stages 2 through 7 (reserved-path check through authorization)
    /// without forwarding. Shared by [`Self::handle`] (which forwards over
    /// HTTP) and the WebSocket upgrade path (which instead dials the
    /// matched upstream's own WebSocket endpoint once this succeeds).
    pub async fn authorize_request(
        &self,
        path: &str,
        method: &str,
        client_ip: &str,
        api_key: Option<&str>,
        bearer_token: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<(super::router::RouteMatch, crate::gateway::model::ServiceRegistration), GatewayResult> {
        if Router::is_reserved(path) {
            return Err(GatewayResult::ReservedPath);
        }

        let matched = {
            let router = self.router.read().await;
            router.resolve(method, path)
        };
        // The router matches endpoint patterns across every registered
        // service in one pass (no dedicated "resolve service, then
        // resolve route" split); a miss is always reported as
        // `RouteNotFound`. `ServiceNotFound` stays in the closed sum for
        // a future per-serviceId addressing mode (see DESIGN.md) and is
        // produced here only if the matched service vanished between
        // the route match and the registry lookup below.
        let Some(matched) = matched else {
            return Err(GatewayResult::RouteNotFound);
        };

        let registration = match self.registry.get(&matched.service_id).await {
            Ok(Some(registration)) => registration,
            Ok(None) => return Err(GatewayResult::ServiceNotFound),
            Err(e) => return Err(GatewayResult::Error { message: e.to_string() }),
        };

        if let Some(lockout) = self.rate_limiter.check_locked(LockoutSubject::Ip(client_ip)).await {
            let retry_after = (lockout.expires_at - Utc::now()).to_std().unwrap_or_default();
            return Err(GatewayResult::Forbidden {
                reason: "rate-limited".to_string(),
                retry_after: Some(retry_after),
                limit: Some(self.rate_limiter.max_failed_attempts()),
            });
        }

        let identity = match self.identity_resolver.resolve(api_key, bearer_token, session_id).await {
            Ok(identity) => {
                if let Err(e) = self.rate_limiter.record_success(LockoutSubject::Ip(client_ip)).await {
                    warn!(error = %e, "failed to clear rate-limit attempt counter");
                }
                identity
            }
            Err(e) => {
                if let Err(record_err) = self.rate_limiter.record_failure(LockoutSubject::Ip(client_ip)).await {
                    warn!(error = %record_err, "failed to record auth failure for rate limiting");
                }
                return Err(GatewayResult::Unauthorized { reason: e.to_string() });
            }
        };

        if identity.is_none() && matched.endpoint.visibility != Visibility::Public {
            return Err(GatewayResult::Unauthorized { reason: "authentication required".to_string() });
        }

        let decision = authorize(
            &matched.endpoint,
            identity.as_ref(),
            registration.permission_policy.as_ref(),
            operation_kind(&Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET)),
        );
        if decision == AuthzDecision::Deny {
            return Err(GatewayResult::Forbidden { reason: "authorization denied".to_string(), retry_after: None, limit: None });
        }

        Ok((matched, registration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthRateLimitConfig, JwksCacheConfig, ProxyConfig, ResiliencyConfig, TranslationConfig};
    use crate::gateway::identity::derive_pepper;
    use crate::gateway::jwks::{JwksCache, OidcValidator};
    use crate::gateway::model::{EndpointConfig, ServiceRegistration};
    use crate::gateway::revocation::{InProcessRevocationPublisher, RevocationEngine};
    use crate::gateway::storage::{
        MemoryApiKeyRepository, MemoryCacheRepository, MemoryFailedAttemptRepository, MemorySessionRepository,
        MemoryTokenRevocationRepository,
    };
    use crate::gateway::translation::{DefaultTranslationProvider, TranslationEngine};
    use crate::config::RevocationConfig;

    fn pipeline() -> GatewayPipeline {
        let cache: Arc<MemoryCacheRepository> = Arc::new(MemoryCacheRepository::default());
        let registry = Arc::new(ServiceRegistry::new(
            Arc::new(crate::gateway::storage::MemoryServiceRegistrationRepository::default()),
            cache.clone(),
            Duration::from_secs(30),
        ));
        let rate_limiter = Arc::new(AuthRateLimiter::new(
            Arc::new(MemoryFailedAttemptRepository::default()),
            AuthRateLimitConfig::default(),
            ResiliencyConfig::default(),
        ));
        let jwks = Arc::new(JwksCache::new(JwksCacheConfig::default()));
        let oidc = Arc::new(OidcValidator::new(jwks));
        let translation = Arc::new(TranslationEngine::new(
            Arc::new(DefaultTranslationProvider),
            cache.clone(),
            TranslationConfig::default(),
        ));
        let revocation = Arc::new(RevocationEngine::new(
            Arc::new(MemoryTokenRevocationRepository::default()),
            cache.clone(),
            Arc::new(InProcessRevocationPublisher::new(16)),
            RevocationConfig::default(),
        ));
        let identity_resolver = Arc::new(IdentityResolver::new(
            Arc::new(MemoryApiKeyRepository::default()),
            Arc::new(MemorySessionRepository::default()),
            oidc,
            translation,
            revocation,
            Vec::new(),
            derive_pepper("test-pepper"),
        ));
        let proxy = Arc::new(ProxyTransport::new(&ProxyConfig::default()).unwrap());
        GatewayPipeline::new(registry, rate_limiter, identity_resolver, proxy, Arc::new(GatewayMetrics::default()))
    }

    fn ctx(method: &str, path: &str) -> GatewayRequestCtx {
        GatewayRequestCtx {
            method: Method::from_bytes(method.as_bytes()).unwrap(),
            path: path.to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: Body::empty(),
            client_ip: "127.0.0.1".to_string(),
            host: Some("gateway.local".to_string()),
            scheme: "http".to_string(),
            api_key: None,
            bearer_token: None,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn reserved_path_short_circuits_before_routing() {
        let pipeline = pipeline();
        let result = pipeline.handle(ctx("GET", "/admin/services")).await;
        assert!(matches!(result, GatewayResult::ReservedPath));
    }

    #[tokio::test]
    async fn unmatched_path_is_route_not_found() {
        let pipeline = pipeline();
        pipeline.refresh_router().await.unwrap();
        let result = pipeline.handle(ctx("GET", "/unknown")).await;
        assert!(matches!(result, GatewayResult::RouteNotFound));
    }

    #[tokio::test]
    async fn public_endpoint_skips_identity_resolution() {
        let pipeline = pipeline();
        let mut reg = ServiceRegistration::new("users", "http://users.internal");
        reg.endpoints.push(EndpointConfig::new("/users/ping", &["GET"], Visibility::Public));
        pipeline.registry.register(reg).await.unwrap();
        pipeline.refresh_router().await.unwrap();

        let result = pipeline.handle(ctx("GET", "/users/ping")).await;
        // No upstream is actually listening, so this reaches the proxy stage
        // and fails there — the point of this test is that it gets past
        // authorization without a credential, not that the upstream call
        // succeeds.
        assert!(matches!(result, GatewayResult::Error { .. }));
    }

    #[tokio::test]
    async fn protected_endpoint_without_credentials_is_unauthorized() {
        let pipeline = pipeline();
        let mut reg = ServiceRegistration::new("users", "http://users.internal");
        reg.endpoints.push(EndpointConfig::new("/users/me", &["GET"], Visibility::Protected));
        pipeline.registry.register(reg).await.unwrap();
        pipeline.refresh_router().await.unwrap();

        let result = pipeline.handle(ctx("GET", "/users/me")).await;
        assert!(matches!(result, GatewayResult::Unauthorized { .. }));
    }
}
