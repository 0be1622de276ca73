//! # aussie-gateway
//!
//! API gateway terminating HTTP and WebSocket traffic in front of a fleet of
//! backend services: identity resolution, token translation, routing,
//! authorization, and proxying to upstreams, with an immutable audit trail
//! for every administrative and security-relevant decision.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aussie_gateway::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::<()>::load()?;
//!     init_tracing(&config)?;
//!
//!     // ... construct GatewayPipeline, AdminState, WebSocketGateway and
//!     // build_app(), then serve with Server::new(config).serve(app).await?
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod responses;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, RateLimitConfig};

    pub use crate::error::{Error, Result};
    pub use crate::health::{health, readiness};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};

    pub use crate::middleware::{
        Claims, TokenValidator, RequestTrackingConfig,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS,
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    };

    pub use crate::server::Server;

    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };

    pub use crate::observability::init_tracing;

    pub use crate::gateway::{
        authorize, build_app, AdminState, AuthRateLimiter, AuthzDecision, EndpointConfig, GatewayAppState,
        GatewayMetrics, GatewayMetricsSnapshot, GatewayPipeline, GatewayRequestCtx, GatewayResult, Identity,
        IdentityResolver, JwksCache, LockoutSubject, OidcValidator, PermissionPolicy, ProblemDetails, ProxyTransport,
        RevocationEngine, RouteMatch, Router, ServiceRegistration, ServiceRegistry, SigningKeyRegistry,
        TokenProviderConfig, TranslationEngine, Visibility, WebSocketGateway,
    };

    pub use crate::audit::{AuditAgent, AuditEvent, AuditStorage, InMemoryAuditStorage};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router as AxumRouter,
    };

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    // Re-export error handling utilities
    pub use thiserror::Error as ThisError;
    pub use anyhow::{self, Context as AnyhowContext};

    // Re-export time utilities
    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    // Re-export UUID
    pub use uuid::Uuid;

    // Re-export futures utilities
    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    // Re-export HTTP types
    pub use http::{Method, Uri};

    // Re-export acton-reactive prelude for actor system
    pub use acton_reactive::prelude::*;
}
