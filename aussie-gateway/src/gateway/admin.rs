//! Admin-plane HTTP routes for service registration, key rotation,
//! revocations, translation config versions, and lockout management.
//!
//! These are thin `axum` handlers over the library's service functions;
//! unlike the gateway surface (`orchestrator.rs`), errors here use the
//! framework's existing [`crate::error::Error`] response shape rather
//! than Problem Details, since this surface is internal/operator-facing.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router as AxumRouter};
use chrono::Utc;
use serde::Deserialize;

use crate::audit::{AuditEventKind, AuditLogger, AuditSeverity, AuditSource};
use crate::error::{Error, Result};
use crate::responses::{Created, NoContent, Success};

use super::metrics::{GatewayMetrics, GatewayMetricsSnapshot};
use super::model::{ServiceRegistration, TranslationConfigVersion, TranslationSchema};
use super::ratelimit::AuthRateLimiter;
use super::registry::ServiceRegistry;
use super::revocation::RevocationEngine;
use super::signing_keys::SigningKeyRegistry;
use super::storage::TranslationConfigRepository;
use super::translation::TranslationEngine;

/// Dependencies the admin routes need. Cheap to clone — every field is
/// an `Arc`.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ServiceRegistry>,
    pub signing_keys: Arc<SigningKeyRegistry>,
    pub revocation: Arc<RevocationEngine>,
    pub rate_limiter: Arc<AuthRateLimiter>,
    pub translations: Arc<dyn TranslationConfigRepository>,
    pub translation_engine: Arc<TranslationEngine>,
    pub audit: AuditLogger,
    pub metrics: Arc<GatewayMetrics>,
}

pub fn admin_router(state: AdminState) -> AxumRouter {
    AxumRouter::new()
        .route("/admin/services", post(register_service).get(list_services))
        .route("/admin/services/{id}", put(update_service).delete(deregister_service))
        .route("/admin/services/{id}/keys/rotate", post(rotate_keys))
        .route("/admin/revocations/jti/{jti}", post(revoke_jti))
        .route("/admin/revocations/user/{id}", post(revoke_user))
        .route("/admin/translations", post(create_translation).get(list_translations))
        .route("/admin/translations/{id}/activate", post(activate_translation))
        .route("/admin/lockouts/{key}", get(get_lockout).delete(clear_lockout))
        .route("/admin/metrics", get(gateway_metrics))
        .with_state(state)
}

async fn gateway_metrics(State(state): State<AdminState>) -> Success<GatewayMetricsSnapshot> {
    Success::new(state.metrics.snapshot())
}

async fn register_service(
    State(state): State<AdminState>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<Created<ServiceRegistration>> {
    let stored = state.registry.register(registration).await?;
    state
        .audit
        .log_custom(
            "service.registered",
            AuditSeverity::Notice,
            Some(serde_json::json!({ "serviceId": stored.service_id, "version": stored.version })),
        )
        .await;
    let location = format!("/admin/services/{}", stored.service_id);
    Ok(Created::new(stored).with_location(location))
}

async fn list_services(State(state): State<AdminState>) -> Result<Success<Vec<ServiceRegistration>>> {
    Ok(Success::new(state.registry.get_all().await?))
}

#[derive(Debug, Deserialize)]
struct UpdateServiceRequest {
    registration: ServiceRegistration,
    expected_version: u64,
}

async fn update_service(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Success<ServiceRegistration>> {
    if body.registration.service_id != id {
        return Err(Error::BadRequest("path id and body serviceId must match".to_string()));
    }
    let updated = state.registry.update(body.registration, body.expected_version).await?;
    state
        .audit
        .log_custom(
            "service.updated",
            AuditSeverity::Notice,
            Some(serde_json::json!({ "serviceId": updated.service_id, "version": updated.version })),
        )
        .await;
    Ok(Success::new(updated))
}

async fn deregister_service(State(state): State<AdminState>, Path(id): Path<String>) -> Result<NoContent> {
    if !state.registry.deregister(&id).await? {
        return Err(Error::NotFound(format!("service '{id}' not found")));
    }
    state
        .audit
        .log_custom("service.deregistered", AuditSeverity::Notice, Some(serde_json::json!({ "serviceId": id })))
        .await;
    Ok(NoContent)
}

async fn rotate_keys(State(state): State<AdminState>, Path(id): Path<String>) -> Result<Success<super::model::SigningKeyRecord>> {
    let key = state.signing_keys.rotate().await?;
    state
        .audit
        .log_custom(
            "signingkey.rotated",
            AuditSeverity::Notice,
            Some(serde_json::json!({ "serviceId": id, "keyId": key.key_id })),
        )
        .await;
    Ok(Success::new(key))
}

async fn revoke_jti(State(state): State<AdminState>, Path(jti): Path<String>) -> Result<NoContent> {
    // Revocation has no natural expiry from this surface alone; retain
    // the record for the cache's default window and let the bloom
    // filter's periodic rebuild prune it once it is actually expired.
    state.revocation.revoke_jti(&jti, Utc::now() + chrono::Duration::days(365)).await?;
    state
        .audit
        .log_auth(
            AuditEventKind::AuthTokenRevoked,
            AuditSeverity::Warning,
            AuditSource { subject: Some(jti), ..Default::default() },
        )
        .await;
    Ok(NoContent)
}

async fn revoke_user(State(state): State<AdminState>, Path(id): Path<String>) -> Result<NoContent> {
    // Same retention rationale as `revoke_jti` above: no natural expiry from
    // this surface, so carry the record for a year and let the bloom
    // filter's rebuild prune it once every token issued before now has
    // actually expired.
    state.revocation.revoke_user(&id, Utc::now(), Utc::now() + chrono::Duration::days(365)).await?;
    state
        .audit
        .log_auth(
            AuditEventKind::AuthTokenRevoked,
            AuditSeverity::Warning,
            AuditSource { subject: Some(id), ..Default::default() },
        )
        .await;
    Ok(NoContent)
}

#[derive(Debug, Deserialize)]
struct CreateTranslationRequest {
    schema: TranslationSchema,
    created_by: String,
    comment: Option<String>,
}

async fn create_translation(
    State(state): State<AdminState>,
    Json(body): Json<CreateTranslationRequest>,
) -> Result<Created<TranslationConfigVersion>> {
    let versions = state.translations.list().await?;
    let next_version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
    let version = TranslationConfigVersion {
        id: uuid::Uuid::new_v4().to_string(),
        version: next_version,
        schema: body.schema,
        active: false,
        created_by: body.created_by,
        created_at: Utc::now(),
        comment: body.comment,
    };
    Ok(Created::new(state.translations.create(version).await?))
}

async fn list_translations(State(state): State<AdminState>) -> Result<Success<Vec<TranslationConfigVersion>>> {
    Ok(Success::new(state.translations.list().await?))
}

async fn activate_translation(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Success<TranslationConfigVersion>> {
    let activated = state.translations.activate(&id).await?;
    state.translation_engine.invalidate_all();
    state
        .audit
        .log_custom(
            "translation.activated",
            AuditSeverity::Notice,
            Some(serde_json::json!({ "translationId": activated.id, "version": activated.version })),
        )
        .await;
    Ok(Success::new(activated))
}

async fn get_lockout(State(state): State<AdminState>, Path(key): Path<String>) -> Result<Success<LockoutView>> {
    let status = state.rate_limiter.lockout_status_by_key(&key).await?;
    match status {
        Some(status) => Ok(Success::new(LockoutView {
            key,
            expires_at: status.expires_at,
            lockout_count: status.lockout_count,
            reason: status.reason,
        })),
        None => Err(Error::NotFound(format!("no active lockout for '{key}'"))),
    }
}

async fn clear_lockout(State(state): State<AdminState>, Path(key): Path<String>) -> Result<NoContent> {
    state.rate_limiter.clear_lockout_by_key(&key).await?;
    state
        .audit
        .log_auth(
            AuditEventKind::AuthAccountUnlocked,
            AuditSeverity::Notice,
            AuditSource { subject: Some(key), ..Default::default() },
        )
        .await;
    Ok(NoContent)
}

#[derive(Debug, serde::Serialize)]
struct LockoutView {
    key: String,
    expires_at: chrono::DateTime<Utc>,
    lockout_count: u32,
    reason: Option<String>,
}
