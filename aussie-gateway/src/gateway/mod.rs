//! Aussie: the API gateway terminating HTTP/WebSocket traffic in front of
//! a fleet of backend services — identity resolution, token translation,
//! routing, authorization, and proxying to upstreams.

pub mod admin;
pub mod app;
pub mod authz;
pub mod bloom;
pub mod identity;
pub mod jwks;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod proxy;
pub mod ratelimit;
pub mod registry;
pub mod revocation;
pub mod router;
pub mod signing_keys;
pub mod storage;
pub mod translation;
pub mod websocket;

pub use admin::{admin_router, AdminState};
pub use app::{build_app, GatewayAppState};
pub use authz::{authorize, AuthzDecision};
pub use identity::IdentityResolver;
pub use jwks::{JwksCache, OidcValidator};
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use model::{
    EndpointConfig, Identity, PermissionPolicy, ServiceRegistration, TokenProviderConfig, Visibility,
};
pub use orchestrator::{GatewayPipeline, GatewayRequestCtx, GatewayResult, ProblemDetails};
pub use proxy::ProxyTransport;
pub use ratelimit::{AuthRateLimiter, LockoutSubject};
pub use registry::ServiceRegistry;
pub use revocation::{InProcessRevocationPublisher, RevocationEngine, RevocationPublisher};
pub use router::{RouteMatch, Router};
pub use signing_keys::SigningKeyRegistry;
pub use translation::{TranslationEngine, TranslationProvider, TranslationResult};
pub use websocket::WebSocketGateway;
