//! Gateway server entry point.
//!
//! Wires the storage layer, the gateway components, the admin plane, and
//! the audit trail together, then serves the assembled `axum` app. SIGHUP
//! reloads configuration from disk and re-seeds the signing-key registry,
//! JWKS cache, and translation config without a restart.

use std::sync::Arc;
use std::time::Duration;

use acton_reactive::prelude::*;

use aussie_gateway::audit::{AuditAgent, AuditConfig, AuditLogger, InMemoryAuditStorage};
use aussie_gateway::config::Config;
use aussie_gateway::error::Result;
use aussie_gateway::gateway::{
    storage::{
        select_provider, MemoryApiKeyRepository, MemoryCacheRepository, MemoryFailedAttemptRepository,
        MemoryServiceRegistrationRepository, MemorySessionRepository, MemorySigningKeyRepository,
        MemoryTokenRevocationRepository, MemoryTranslationConfigRepository,
    },
    AdminState, AuthRateLimiter, ConfigTranslationProvider, GatewayAppState, GatewayMetrics, GatewayPipeline,
    IdentityResolver, InProcessRevocationPublisher, JwksCache, OidcValidator, ProxyTransport, RevocationEngine,
    ServiceRegistry, SigningKeyRegistry, TranslationEngine, WebSocketGateway,
};
use aussie_gateway::observability::init_tracing;
use aussie_gateway::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::<()>::load()?;
    init_tracing(&config)?;

    let mut runtime = ActonApp::launch();

    let app_state = build_app_state(&config, &mut runtime).await?;
    app_state.pipeline.refresh_router().await?;

    let app = aussie_gateway::gateway::build_app(app_state.clone());

    let reload_config = config.clone();
    let reload_state = app_state.clone();
    let on_reload = move || {
        let config = reload_config.clone();
        let state = reload_state.clone();
        async move {
            match Config::<()>::load_for_service(&config.service.name) {
                Ok(_) => {
                    tracing::info!("configuration reloaded from disk");
                    if let Err(e) = state.pipeline.refresh_router().await {
                        tracing::warn!("router refresh on reload failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("configuration reload failed, keeping running config: {e}"),
            }
        }
    };

    let server = Server::new(config);
    server.serve_with_reload(app, on_reload).await?;

    if let Err(e) = runtime.shutdown_all().await {
        tracing::warn!("actor runtime shutdown error: {e}");
    }

    Ok(())
}

/// Builds every gateway component from configuration and assembles the
/// top-level `GatewayAppState`. Storage backends default to the in-memory
/// providers; setting `storage.provider = "redis"` (with `redis` configured)
/// switches the revocation, failed-attempt, and cache ports to their
/// Redis-backed implementations.
async fn build_app_state(config: &Config, runtime: &mut ActorRuntime) -> Result<GatewayAppState> {
    let cache: Arc<dyn aussie_gateway::gateway::storage::CacheRepository> =
        select_cache_provider(config)?;
    let revocation_repo: Arc<dyn aussie_gateway::gateway::storage::TokenRevocationRepository> =
        select_revocation_provider(config)?;
    let failed_attempt_repo: Arc<dyn aussie_gateway::gateway::storage::FailedAttemptRepository> =
        select_failed_attempt_provider(config)?;

    // The service registry, signing-key repository, API key repository,
    // session repository, and translation config repository only ship
    // in-memory implementations today (no Redis/Cassandra port yet), so
    // `config.storage.provider` doesn't apply to them — pass `None` and let
    // the lone provider win by priority.
    let service_repo = select_provider(vec![MemoryServiceRegistrationRepository::default()], None)?;
    let registry = Arc::new(ServiceRegistry::new(
        Arc::new(service_repo),
        cache.clone(),
        Duration::from_secs(config.storage.cache_ttl_secs),
    ));

    let rate_limiter = Arc::new(AuthRateLimiter::new(
        failed_attempt_repo,
        config.auth_rate_limit.clone(),
        config.resiliency.clone(),
    ));

    let signing_key_repo = select_provider(vec![MemorySigningKeyRepository::default()], None)?;
    let signing_keys = Arc::new(SigningKeyRegistry::new(Arc::new(signing_key_repo), config.keyrotation.clone()));
    signing_keys.bootstrap().await?;

    let publisher = Arc::new(InProcessRevocationPublisher::new(1024));
    let revocation = Arc::new(RevocationEngine::new(
        revocation_repo,
        cache.clone(),
        publisher,
        config.revocation.clone(),
    ));
    revocation.bootstrap().await?;

    let translation_config_repo = select_provider(vec![MemoryTranslationConfigRepository::default()], None)?;
    let translation_config_repo: Arc<dyn aussie_gateway::gateway::storage::TranslationConfigRepository> =
        Arc::new(translation_config_repo);
    let translation_provider = Arc::new(ConfigTranslationProvider::new(translation_config_repo.clone()));
    let translation = Arc::new(TranslationEngine::new(translation_provider, cache.clone(), config.translation.clone()));

    let jwks = Arc::new(JwksCache::new(config.jwks.clone()));
    let oidc = Arc::new(OidcValidator::new(jwks));

    let api_key_repo = select_provider(vec![MemoryApiKeyRepository::default()], None)?;
    let session_repo = select_provider(vec![MemorySessionRepository::default()], None)?;
    let pepper = aussie_gateway::gateway::identity::derive_pepper(&config.api_keys.pepper);
    let identity_resolver = Arc::new(IdentityResolver::new(
        Arc::new(api_key_repo),
        Arc::new(session_repo),
        oidc,
        translation.clone(),
        revocation.clone(),
        config.token_providers.clone(),
        pepper,
    ));

    let proxy = Arc::new(ProxyTransport::new(&config.proxy)?);

    let metrics = Arc::new(GatewayMetrics::default());
    let pipeline = Arc::new(GatewayPipeline::new(
        registry.clone(),
        rate_limiter.clone(),
        identity_resolver,
        proxy,
        metrics.clone(),
    ));

    let audit_config = AuditConfig::default();
    let audit_storage: Arc<dyn aussie_gateway::audit::AuditStorage> = Arc::new(InMemoryAuditStorage::default());
    let audit_handle = AuditAgent::spawn(runtime, audit_config.clone(), Some(audit_storage), config.service.name.clone())
        .await
        .map_err(|e| aussie_gateway::error::Error::Config(Box::new(figment::Error::from(e.to_string()))))?;
    let audit_logger = AuditLogger::new(audit_handle, config.service.name.clone(), audit_config);

    let admin = AdminState {
        registry,
        signing_keys,
        revocation,
        rate_limiter,
        translations: translation_config_repo,
        translation_engine: translation,
        audit: audit_logger,
        metrics,
    };

    let websockets = Arc::new(WebSocketGateway::new(config.websocket.clone()));

    Ok(GatewayAppState {
        pipeline,
        admin,
        websockets,
        supported_subprotocols: Vec::new(),
    })
}

fn select_cache_provider(
    config: &Config,
) -> Result<Arc<dyn aussie_gateway::gateway::storage::CacheRepository>> {
    #[cfg(feature = "cache")]
    if let Some(redis_config) = &config.redis {
        if config.storage.cache_provider.as_deref() == Some("redis") {
            let pool = build_redis_pool(redis_config)?;
            return Ok(Arc::new(aussie_gateway::gateway::storage::redis_backed::RedisCacheRepository::new(
                pool,
                "aussie",
            )));
        }
    }
    let provider = select_provider(vec![MemoryCacheRepository::default()], config.storage.cache_provider.as_deref())?;
    Ok(Arc::new(provider))
}

fn select_revocation_provider(
    config: &Config,
) -> Result<Arc<dyn aussie_gateway::gateway::storage::TokenRevocationRepository>> {
    #[cfg(feature = "cache")]
    if let Some(redis_config) = &config.redis {
        if config.storage.provider.as_deref() == Some("redis") {
            let pool = build_redis_pool(redis_config)?;
            return Ok(Arc::new(aussie_gateway::gateway::storage::redis_backed::RedisTokenRevocationRepository::new(
                pool,
            )));
        }
    }
    let provider = select_provider(vec![MemoryTokenRevocationRepository::default()], config.storage.provider.as_deref())?;
    Ok(Arc::new(provider))
}

fn select_failed_attempt_provider(
    config: &Config,
) -> Result<Arc<dyn aussie_gateway::gateway::storage::FailedAttemptRepository>> {
    #[cfg(feature = "cache")]
    if let Some(redis_config) = &config.redis {
        if config.storage.provider.as_deref() == Some("redis") {
            let pool = build_redis_pool(redis_config)?;
            return Ok(Arc::new(aussie_gateway::gateway::storage::redis_backed::RedisFailedAttemptRepository::new(
                pool,
            )));
        }
    }
    let provider = select_provider(vec![MemoryFailedAttemptRepository::default()], config.storage.provider.as_deref())?;
    Ok(Arc::new(provider))
}

#[cfg(feature = "cache")]
fn build_redis_pool(redis_config: &aussie_gateway::config::RedisConfig) -> Result<deadpool_redis::Pool> {
    let cfg = deadpool_redis::Config::from_url(&redis_config.url);
    let pool = cfg
        .builder()
        .map_err(|e| aussie_gateway::error::Error::Internal(format!("failed to build redis pool: {e}")))?
        .max_size(redis_config.max_connections)
        .runtime(deadpool_redis::Runtime::Tokio1)
        .build()
        .map_err(|e| aussie_gateway::error::Error::Internal(format!("failed to create redis pool: {e}")))?;
    Ok(pool)
}
