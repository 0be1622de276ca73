//! Storage ports and the provider loader.
//!
//! Every storage concern the gateway needs is expressed as a narrow
//! repository trait, so this module ships in-memory implementations
//! for every port plus Redis-backed implementations for the ports that
//! are most latency/fail-open sensitive (revocation, failed
//! attempts, and the generic cache-through layer).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{Error, Result};

use super::model::{
    ApiKeyRecord, PkceChallenge, Role, ServiceRegistration, SessionRecord,
    SigningKeyRecord, TranslationConfigVersion,
};

type RoleRecordAlias = Role;

/// Anything a storage backend registers itself as, for priority-based
/// selection: memory backends use priority 0,
/// Redis uses 10, Cassandra would use 100.
pub trait Provider {
    fn provider_name(&self) -> &'static str;
    fn priority(&self) -> i32;
    /// Whether the backend can currently serve requests (e.g. a Redis
    /// pool that failed to connect at startup reports `false`).
    fn is_available(&self) -> bool {
        true
    }
}

/// Picks exactly one provider per interface: explicit config name wins
/// (fail hard if absent), else the highest-priority available provider.
pub fn select_provider<P: Provider>(
    providers: Vec<P>,
    configured_name: Option<&str>,
) -> Result<P> {
    if let Some(name) = configured_name {
        return providers
            .into_iter()
            .find(|p| p.provider_name() == name)
            .ok_or_else(|| Error::Config(Box::new(figment::Error::from(format!(
                "no storage provider registered under the name '{name}'"
            )))));
    }
    providers
        .into_iter()
        .filter(Provider::is_available)
        .max_by_key(Provider::priority)
        .ok_or_else(|| Error::Config(Box::new(figment::Error::from(
            "no available storage provider found".to_string(),
        ))))
}

// ---------------------------------------------------------------------
// Fail-open / fail-closed timeout policies
// ---------------------------------------------------------------------

/// Runs `fut` under `timeout`; on timeout or backend error, propagates the
/// failure to the caller. Used for operations that must fail closed, e.g.
/// revocation writes.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::External("storage operation timed out".to_string())),
    }
}

/// Runs `fut` under `timeout`; on timeout or backend error, returns `None`
/// rather than propagating. Used for best-effort cache reads.
pub async fn with_timeout_graceful<T, F>(timeout: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(_)) | Err(_) => None,
    }
}

/// Runs `fut` under `timeout`; on timeout or backend error, returns the
/// fail-open value produced by `fallback`. Used for counters and lockout
/// checks: a sick store must never lock out a legitimate user.
pub async fn with_timeout_fallback<T, F>(timeout: Duration, fut: F, fallback: impl FnOnce() -> T) -> T
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "storage operation failed, failing open");
            fallback()
        }
        Err(_) => {
            tracing::warn!("storage operation timed out, failing open");
            fallback()
        }
    }
}

// ---------------------------------------------------------------------
// Repository ports
// ---------------------------------------------------------------------

#[async_trait]
pub trait ServiceRegistrationRepository: Send + Sync {
    async fn get(&self, service_id: &str) -> Result<Option<ServiceRegistration>>;
    async fn get_all(&self) -> Result<Vec<ServiceRegistration>>;
    /// Unconditional upsert, bumping `version`. Returns the stored record.
    async fn upsert(&self, registration: ServiceRegistration) -> Result<ServiceRegistration>;
    /// Conditional write: succeeds only if the stored version equals
    /// `expected_version`. Returns `Ok(None)` on a version mismatch so the
    /// caller can surface 409 without losing the stored value to compare.
    async fn compare_and_swap(
        &self,
        registration: ServiceRegistration,
        expected_version: u64,
    ) -> Result<Option<ServiceRegistration>>;
    async fn delete(&self, service_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_by_hash_lookup(&self, lookup_prefix: &str) -> Result<Vec<ApiKeyRecord>>;
    async fn get(&self, id: &str) -> Result<Option<ApiKeyRecord>>;
    async fn create(&self, record: ApiKeyRecord) -> Result<ApiKeyRecord>;
    async fn revoke(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<ApiKeyRecord>>;
}

#[async_trait]
pub trait SigningKeyRepository: Send + Sync {
    async fn get(&self, key_id: &str) -> Result<Option<SigningKeyRecord>>;
    async fn find_active(&self) -> Result<Option<SigningKeyRecord>>;
    /// ACTIVE ∪ DEPRECATED, ordered newest first.
    async fn find_all_for_verification(&self) -> Result<Vec<SigningKeyRecord>>;
    async fn save(&self, record: SigningKeyRecord) -> Result<SigningKeyRecord>;
    async fn list(&self) -> Result<Vec<SigningKeyRecord>>;
}

#[async_trait]
pub trait TranslationConfigRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<TranslationConfigVersion>>;
    async fn find_active(&self) -> Result<Option<TranslationConfigVersion>>;
    async fn create(&self, version: TranslationConfigVersion) -> Result<TranslationConfigVersion>;
    /// Activates `id` and deactivates every other version atomically.
    async fn activate(&self, id: &str) -> Result<TranslationConfigVersion>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<TranslationConfigVersion>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert-if-absent; returns `false` if the id already exists.
    async fn insert_if_absent(&self, session: SessionRecord) -> Result<bool>;
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;
    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait PkceChallengeRepository: Send + Sync {
    async fn put(&self, challenge: PkceChallenge) -> Result<()>;
    async fn take(&self, state: &str) -> Result<Option<PkceChallenge>>;
}

/// Backs the auth rate limiter / lockout engine. All calls
/// are expected to be wrapped in [`with_timeout_fallback`] by the caller.
#[async_trait]
pub trait FailedAttemptRepository: Send + Sync {
    async fn increment(&self, key: &str, window: Duration) -> Result<u32>;
    async fn get_failed_attempt_count(&self, key: &str) -> Result<u32>;
    async fn clear_attempts(&self, key: &str) -> Result<()>;
    async fn set_lockout(&self, key: &str, duration: Duration, lockout_count: u32, reason: Option<String>) -> Result<()>;
    async fn get_lockout(&self, key: &str) -> Result<Option<(DateTime<Utc>, u32, Option<String>)>>;
    async fn clear_lockout(&self, key: &str) -> Result<()>;
    async fn get_lockout_count(&self, key: &str) -> Result<u32>;
    async fn list_lockout_keys(&self) -> Result<Vec<String>>;
}

/// Authoritative revocation store.
#[async_trait]
pub trait TokenRevocationRepository: Send + Sync {
    async fn revoke_jti(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()>;
    async fn is_revoked(&self, jti: &str) -> Result<bool>;
    async fn revoke_user(&self, user_id: &str, issued_before: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<()>;
    async fn is_user_revoked(&self, user_id: &str, issued_at: DateTime<Utc>) -> Result<bool>;
    /// Every currently-tracked revocation, for bloom filter rebuilds.
    async fn all_active_jtis(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<RoleRecordAlias>>;
    async fn upsert(&self, role: RoleRecordAlias) -> Result<RoleRecordAlias>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<RoleRecordAlias>>;
}

/// Same shape as [`RoleRepository`], over group records.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<RoleRecordAlias>>;
    async fn upsert(&self, group: RoleRecordAlias) -> Result<RoleRecordAlias>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<RoleRecordAlias>>;
}

/// Generic string cache used by the registry and translation cache-through
/// layers. A thin interface so memory and Redis backends share call sites.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn invalidate(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------
// In-memory implementations (priority 0 — always available, always last
// picked when a real backend is configured)
// ---------------------------------------------------------------------

#[derive(Default, Clone)]
pub struct MemoryServiceRegistrationRepository {
    inner: Arc<DashMap<String, ServiceRegistration>>,
}

impl Provider for MemoryServiceRegistrationRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl ServiceRegistrationRepository for MemoryServiceRegistrationRepository {
    async fn get(&self, service_id: &str) -> Result<Option<ServiceRegistration>> {
        Ok(self.inner.get(service_id).map(|r| r.clone()))
    }

    async fn get_all(&self) -> Result<Vec<ServiceRegistration>> {
        Ok(self.inner.iter().map(|r| r.clone()).collect())
    }

    async fn upsert(&self, mut registration: ServiceRegistration) -> Result<ServiceRegistration> {
        if let Some(existing) = self.inner.get(&registration.service_id) {
            registration.version = existing.version + 1;
        }
        self.inner.insert(registration.service_id.clone(), registration.clone());
        Ok(registration)
    }

    async fn compare_and_swap(
        &self,
        mut registration: ServiceRegistration,
        expected_version: u64,
    ) -> Result<Option<ServiceRegistration>> {
        let current = self.inner.get(&registration.service_id).map(|r| r.version);
        if current != Some(expected_version) {
            return Ok(None);
        }
        registration.version = expected_version + 1;
        self.inner.insert(registration.service_id.clone(), registration.clone());
        Ok(Some(registration))
    }

    async fn delete(&self, service_id: &str) -> Result<bool> {
        Ok(self.inner.remove(service_id).is_some())
    }
}

#[derive(Default, Clone)]
pub struct MemoryApiKeyRepository {
    inner: Arc<DashMap<String, ApiKeyRecord>>,
}

impl Provider for MemoryApiKeyRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryApiKeyRepository {
    async fn find_by_hash_lookup(&self, lookup_prefix: &str) -> Result<Vec<ApiKeyRecord>> {
        Ok(self
            .inner
            .iter()
            .filter(|r| r.key_hash.starts_with(lookup_prefix))
            .map(|r| r.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(self.inner.get(id).map(|r| r.clone()))
    }

    async fn create(&self, record: ApiKeyRecord) -> Result<ApiKeyRecord> {
        self.inner.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn revoke(&self, id: &str) -> Result<bool> {
        if let Some(mut entry) = self.inner.get_mut(id) {
            entry.revoked = true;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list(&self) -> Result<Vec<ApiKeyRecord>> {
        Ok(self.inner.iter().map(|r| r.clone()).collect())
    }
}

#[derive(Default, Clone)]
pub struct MemorySigningKeyRepository {
    inner: Arc<DashMap<String, SigningKeyRecord>>,
}

impl Provider for MemorySigningKeyRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl SigningKeyRepository for MemorySigningKeyRepository {
    async fn get(&self, key_id: &str) -> Result<Option<SigningKeyRecord>> {
        Ok(self.inner.get(key_id).map(|r| r.clone()))
    }

    async fn find_active(&self) -> Result<Option<SigningKeyRecord>> {
        use super::model::KeyStatus;
        Ok(self.inner.iter().find(|r| r.status == KeyStatus::Active).map(|r| r.clone()))
    }

    async fn find_all_for_verification(&self) -> Result<Vec<SigningKeyRecord>> {
        use super::model::KeyStatus;
        Ok(self
            .inner
            .iter()
            .filter(|r| matches!(r.status, KeyStatus::Active | KeyStatus::Deprecated))
            .map(|r| r.clone())
            .collect())
    }

    async fn save(&self, record: SigningKeyRecord) -> Result<SigningKeyRecord> {
        self.inner.insert(record.key_id.clone(), record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<SigningKeyRecord>> {
        Ok(self.inner.iter().map(|r| r.clone()).collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryTranslationConfigRepository {
    inner: Arc<DashMap<String, TranslationConfigVersion>>,
}

impl Provider for MemoryTranslationConfigRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl TranslationConfigRepository for MemoryTranslationConfigRepository {
    async fn get(&self, id: &str) -> Result<Option<TranslationConfigVersion>> {
        Ok(self.inner.get(id).map(|r| r.clone()))
    }

    async fn find_active(&self) -> Result<Option<TranslationConfigVersion>> {
        Ok(self.inner.iter().find(|r| r.active).map(|r| r.clone()))
    }

    async fn create(&self, version: TranslationConfigVersion) -> Result<TranslationConfigVersion> {
        self.inner.insert(version.id.clone(), version.clone());
        Ok(version)
    }

    async fn activate(&self, id: &str) -> Result<TranslationConfigVersion> {
        if !self.inner.contains_key(id) {
            return Err(Error::NotFound(format!("translation config '{id}'")));
        }
        for mut entry in self.inner.iter_mut() {
            entry.active = entry.key() == id;
        }
        Ok(self.inner.get(id).unwrap().clone())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if self.inner.get(id).map(|r| r.active).unwrap_or(false) {
            return Err(Error::Conflict("cannot delete the active translation config version".to_string()));
        }
        Ok(self.inner.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<TranslationConfigVersion>> {
        Ok(self.inner.iter().map(|r| r.clone()).collect())
    }
}

#[derive(Default, Clone)]
pub struct MemorySessionRepository {
    inner: Arc<DashMap<String, SessionRecord>>,
}

impl Provider for MemorySessionRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert_if_absent(&self, session: SessionRecord) -> Result<bool> {
        match self.inner.entry(session.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(session);
                Ok(true)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.inner.get(id).map(|r| r.clone()))
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut entry) = self.inner.get_mut(id) {
            entry.last_accessed_at = Some(at);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.inner.remove(id).is_some())
    }
}

#[derive(Default, Clone)]
pub struct MemoryPkceChallengeRepository {
    inner: Arc<DashMap<String, PkceChallenge>>,
}

#[async_trait]
impl PkceChallengeRepository for MemoryPkceChallengeRepository {
    async fn put(&self, challenge: PkceChallenge) -> Result<()> {
        self.inner.insert(challenge.state.clone(), challenge);
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<PkceChallenge>> {
        Ok(self.inner.remove(state).map(|(_, v)| v))
    }
}

#[derive(Default, Clone)]
pub struct MemoryFailedAttemptRepository {
    attempts: Arc<DashMap<String, (u32, DateTime<Utc>)>>,
    lockouts: Arc<DashMap<String, (DateTime<Utc>, DateTime<Utc>, Option<String>)>>,
    lockout_counts: Arc<DashMap<String, u32>>,
}

impl Provider for MemoryFailedAttemptRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl FailedAttemptRepository for MemoryFailedAttemptRepository {
    async fn increment(&self, key: &str, window: Duration) -> Result<u32> {
        let now = Utc::now();
        let mut entry = self.attempts.entry(key.to_string()).or_insert((0, now));
        let window_expired = now.signed_duration_since(entry.1).to_std().unwrap_or_default() > window;
        if window_expired {
            *entry = (1, now);
        } else {
            entry.0 += 1;
        }
        Ok(entry.0)
    }

    async fn get_failed_attempt_count(&self, key: &str) -> Result<u32> {
        Ok(self.attempts.get(key).map(|e| e.0).unwrap_or(0))
    }

    async fn clear_attempts(&self, key: &str) -> Result<()> {
        self.attempts.remove(key);
        Ok(())
    }

    async fn set_lockout(&self, key: &str, duration: Duration, lockout_count: u32, reason: Option<String>) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(duration).unwrap_or_default();
        self.lockouts.insert(key.to_string(), (now, expires_at, reason));
        self.lockout_counts.insert(key.to_string(), lockout_count);
        Ok(())
    }

    async fn get_lockout(&self, key: &str) -> Result<Option<(DateTime<Utc>, u32, Option<String>)>> {
        if let Some(entry) = self.lockouts.get(key) {
            if entry.1 > Utc::now() {
                let count = self.lockout_counts.get(key).map(|c| *c).unwrap_or(0);
                return Ok(Some((entry.1, count, entry.2.clone())));
            }
        }
        Ok(None)
    }

    async fn clear_lockout(&self, key: &str) -> Result<()> {
        // lockout_count is preserved for the progressive multiplier.
        self.lockouts.remove(key);
        Ok(())
    }

    async fn get_lockout_count(&self, key: &str) -> Result<u32> {
        Ok(self.lockout_counts.get(key).map(|c| *c).unwrap_or(0))
    }

    async fn list_lockout_keys(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        Ok(self
            .lockouts
            .iter()
            .filter(|e| e.value().1 > now)
            .map(|e| e.key().clone())
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryTokenRevocationRepository {
    jtis: Arc<DashMap<String, DateTime<Utc>>>,
    users: Arc<DashMap<String, DateTime<Utc>>>,
}

impl Provider for MemoryTokenRevocationRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl TokenRevocationRepository for MemoryTokenRevocationRepository {
    async fn revoke_jti(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.jtis.insert(jti.to_string(), expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool> {
        Ok(self.jtis.contains_key(jti))
    }

    async fn revoke_user(&self, user_id: &str, issued_before: DateTime<Utc>, _expires_at: DateTime<Utc>) -> Result<()> {
        self.users.insert(user_id.to_string(), issued_before);
        Ok(())
    }

    async fn is_user_revoked(&self, user_id: &str, issued_at: DateTime<Utc>) -> Result<bool> {
        Ok(self.users.get(user_id).map(|cutoff| *cutoff >= issued_at).unwrap_or(false))
    }

    async fn all_active_jtis(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        Ok(self.jtis.iter().filter(|e| *e.value() > now).map(|e| e.key().clone()).collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryRoleRepository {
    inner: Arc<DashMap<String, RoleRecordAlias>>,
}

#[async_trait]
impl RoleRepository for MemoryRoleRepository {
    async fn get(&self, id: &str) -> Result<Option<RoleRecordAlias>> {
        Ok(self.inner.get(id).map(|r| r.clone()))
    }
    async fn upsert(&self, role: RoleRecordAlias) -> Result<RoleRecordAlias> {
        self.inner.insert(role.id.clone(), role.clone());
        Ok(role)
    }
    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.inner.remove(id).is_some())
    }
    async fn list(&self) -> Result<Vec<RoleRecordAlias>> {
        Ok(self.inner.iter().map(|r| r.clone()).collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryGroupRepository {
    inner: Arc<DashMap<String, RoleRecordAlias>>,
}

#[async_trait]
impl GroupRepository for MemoryGroupRepository {
    async fn get(&self, id: &str) -> Result<Option<RoleRecordAlias>> {
        Ok(self.inner.get(id).map(|r| r.clone()))
    }
    async fn upsert(&self, group: RoleRecordAlias) -> Result<RoleRecordAlias> {
        self.inner.insert(group.id.clone(), group.clone());
        Ok(group)
    }
    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.inner.remove(id).is_some())
    }
    async fn list(&self) -> Result<Vec<RoleRecordAlias>> {
        Ok(self.inner.iter().map(|r| r.clone()).collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryCacheRepository {
    inner: Arc<DashMap<String, (String, DateTime<Utc>)>>,
}

impl Provider for MemoryCacheRepository {
    fn provider_name(&self) -> &'static str {
        "memory"
    }
    fn priority(&self) -> i32 {
        0
    }
}

#[async_trait]
impl CacheRepository for MemoryCacheRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.inner.get(key) {
            Some(entry) if entry.1 > Utc::now() => Ok(Some(entry.0.clone())),
            Some(_) => {
                self.inner.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        self.inner.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.inner.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Redis-backed implementations for the fail-open-sensitive ports
// ---------------------------------------------------------------------

#[cfg(feature = "cache")]
pub mod redis_backed {
    use super::*;
    use deadpool_redis::Pool as RedisPool;
    use redis::AsyncCommands;

    #[derive(Clone)]
    pub struct RedisCacheRepository {
        pool: RedisPool,
        key_prefix: String,
    }

    impl RedisCacheRepository {
        pub fn new(pool: RedisPool, key_prefix: impl Into<String>) -> Self {
            Self { pool, key_prefix: key_prefix.into() }
        }

        fn key(&self, k: &str) -> String {
            format!("{}:{}", self.key_prefix, k)
        }

        async fn conn(&self) -> Result<deadpool_redis::Connection> {
            self.pool.get().await.map_err(|e| Error::External(format!("redis pool: {e}")))
        }
    }

    impl Provider for RedisCacheRepository {
        fn provider_name(&self) -> &'static str {
            "redis"
        }
        fn priority(&self) -> i32 {
            10
        }
    }

    #[async_trait]
    impl CacheRepository for RedisCacheRepository {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let mut conn = self.conn().await?;
            let value: Option<String> = conn
                .get(self.key(key))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(value)
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
            let mut conn = self.conn().await?;
            let _: () = conn
                .set_ex(self.key(key), value, ttl.as_secs().max(1))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }

        async fn invalidate(&self, key: &str) -> Result<()> {
            let mut conn = self.conn().await?;
            let _: () = conn.del(self.key(key)).await.map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }
    }

    #[derive(Clone)]
    pub struct RedisTokenRevocationRepository {
        pool: RedisPool,
    }

    impl RedisTokenRevocationRepository {
        pub fn new(pool: RedisPool) -> Self {
            Self { pool }
        }

        async fn conn(&self) -> Result<deadpool_redis::Connection> {
            self.pool.get().await.map_err(|e| Error::External(format!("redis pool: {e}")))
        }
    }

    impl Provider for RedisTokenRevocationRepository {
        fn provider_name(&self) -> &'static str {
            "redis"
        }
        fn priority(&self) -> i32 {
            10
        }
    }

    #[async_trait]
    impl TokenRevocationRepository for RedisTokenRevocationRepository {
        async fn revoke_jti(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()> {
            let mut conn = self.conn().await?;
            let ttl = (expires_at - Utc::now()).num_seconds().max(1) as u64;
            let _: () = conn
                .set_ex(format!("revoked:jti:{jti}"), "1", ttl)
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }

        async fn is_revoked(&self, jti: &str) -> Result<bool> {
            let mut conn = self.conn().await?;
            let exists: bool = conn
                .exists(format!("revoked:jti:{jti}"))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(exists)
        }

        async fn revoke_user(&self, user_id: &str, issued_before: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<()> {
            let mut conn = self.conn().await?;
            let ttl = (expires_at - Utc::now()).num_seconds().max(1) as u64;
            let _: () = conn
                .set_ex(format!("revoked:user:{user_id}"), issued_before.timestamp_millis(), ttl)
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }

        async fn is_user_revoked(&self, user_id: &str, issued_at: DateTime<Utc>) -> Result<bool> {
            let mut conn = self.conn().await?;
            let cutoff_ms: Option<i64> = conn
                .get(format!("revoked:user:{user_id}"))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(cutoff_ms
                .and_then(DateTime::from_timestamp_millis)
                .map(|cutoff| cutoff >= issued_at)
                .unwrap_or(false))
        }

        async fn all_active_jtis(&self) -> Result<Vec<String>> {
            let mut conn = self.conn().await?;
            let keys: Vec<String> = conn
                .keys("revoked:jti:*")
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(keys
                .into_iter()
                .filter_map(|k| k.strip_prefix("revoked:jti:").map(str::to_string))
                .collect())
        }
    }

    #[derive(Clone)]
    pub struct RedisFailedAttemptRepository {
        pool: RedisPool,
    }

    impl RedisFailedAttemptRepository {
        pub fn new(pool: RedisPool) -> Self {
            Self { pool }
        }

        async fn conn(&self) -> Result<deadpool_redis::Connection> {
            self.pool.get().await.map_err(|e| Error::External(format!("redis pool: {e}")))
        }
    }

    impl Provider for RedisFailedAttemptRepository {
        fn provider_name(&self) -> &'static str {
            "redis"
        }
        fn priority(&self) -> i32 {
            10
        }
    }

    #[async_trait]
    impl FailedAttemptRepository for RedisFailedAttemptRepository {
        async fn increment(&self, key: &str, window: Duration) -> Result<u32> {
            let mut conn = self.conn().await?;
            let redis_key = format!("failcount:{key}");
            let count: u32 = conn.incr(&redis_key, 1).await.map_err(|e| Error::Redis(Box::new(e)))?;
            if count == 1 {
                let _: () = conn
                    .expire(&redis_key, window.as_secs().max(1) as i64)
                    .await
                    .map_err(|e| Error::Redis(Box::new(e)))?;
            }
            Ok(count)
        }

        async fn get_failed_attempt_count(&self, key: &str) -> Result<u32> {
            let mut conn = self.conn().await?;
            let count: Option<u32> = conn
                .get(format!("failcount:{key}"))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(count.unwrap_or(0))
        }

        async fn clear_attempts(&self, key: &str) -> Result<()> {
            let mut conn = self.conn().await?;
            let _: () = conn.del(format!("failcount:{key}")).await.map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }

        async fn set_lockout(&self, key: &str, duration: Duration, lockout_count: u32, reason: Option<String>) -> Result<()> {
            let mut conn = self.conn().await?;
            let secs = duration.as_secs().max(1) as i64;
            let expires_at = Utc::now() + chrono::Duration::seconds(secs);
            let payload = format!("{}|{}|{}", expires_at.timestamp_millis(), lockout_count, reason.unwrap_or_default());
            let _: () = conn
                .set_ex(format!("lockout:{key}"), payload, secs as u64)
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            // lockout_count survives the lockout window itself (30-day TTL).
            let _: () = conn
                .set_ex(format!("lockoutcount:{key}"), lockout_count, 30 * 24 * 3600)
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }

        async fn get_lockout(&self, key: &str) -> Result<Option<(DateTime<Utc>, u32, Option<String>)>> {
            let mut conn = self.conn().await?;
            let payload: Option<String> = conn
                .get(format!("lockout:{key}"))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            let Some(payload) = payload else { return Ok(None) };
            let parts: Vec<&str> = payload.splitn(3, '|').collect();
            if parts.len() != 3 {
                return Ok(None);
            }
            let expires_at = DateTime::from_timestamp_millis(parts[0].parse().unwrap_or(0))
                .unwrap_or_else(Utc::now);
            let count: u32 = parts[1].parse().unwrap_or(0);
            let reason = if parts[2].is_empty() { None } else { Some(parts[2].to_string()) };
            Ok(Some((expires_at, count, reason)))
        }

        async fn clear_lockout(&self, key: &str) -> Result<()> {
            let mut conn = self.conn().await?;
            let _: () = conn.del(format!("lockout:{key}")).await.map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(())
        }

        async fn get_lockout_count(&self, key: &str) -> Result<u32> {
            let mut conn = self.conn().await?;
            let count: Option<u32> = conn
                .get(format!("lockoutcount:{key}"))
                .await
                .map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(count.unwrap_or(0))
        }

        async fn list_lockout_keys(&self) -> Result<Vec<String>> {
            let mut conn = self.conn().await?;
            let keys: Vec<String> = conn.keys("lockout:*").await.map_err(|e| Error::Redis(Box::new(e)))?;
            Ok(keys.into_iter().filter_map(|k| k.strip_prefix("lockout:").map(str::to_string)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_cas_rejects_stale_version() {
        let repo = MemoryServiceRegistrationRepository::default();
        let reg = ServiceRegistration::new("svc", "http://upstream");
        let created = repo.upsert(reg).await.unwrap();
        assert_eq!(created.version, 1);

        let stale = created.clone();
        let result = repo.compare_and_swap(stale.clone(), 0).await.unwrap();
        assert!(result.is_none(), "stale version must be rejected");

        let result = repo.compare_and_swap(stale, 1).await.unwrap();
        assert_eq!(result.unwrap().version, 2);
    }

    #[tokio::test]
    async fn failed_attempt_counter_resets_outside_window() {
        let repo = MemoryFailedAttemptRepository::default();
        let count = repo.increment("ip:1.2.3.4", Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 1);
        let count = repo.increment("ip:1.2.3.4", Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn clear_lockout_preserves_lockout_count() {
        let repo = MemoryFailedAttemptRepository::default();
        repo.set_lockout("ip:1.2.3.4", Duration::from_secs(30), 3, None).await.unwrap();
        assert!(repo.get_lockout("ip:1.2.3.4").await.unwrap().is_some());
        repo.clear_lockout("ip:1.2.3.4").await.unwrap();
        assert!(repo.get_lockout("ip:1.2.3.4").await.unwrap().is_none());
        assert_eq!(repo.get_lockout_count("ip:1.2.3.4").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn translation_activate_is_exclusive() {
        let repo = MemoryTranslationConfigRepository::default();
        let v1 = TranslationConfigVersion {
            id: "v1".into(),
            version: 1,
            schema: Default::default(),
            active: false,
            created_by: "admin".into(),
            created_at: Utc::now(),
            comment: None,
        };
        let mut v2 = v1.clone();
        v2.id = "v2".into();
        v2.version = 2;
        repo.create(v1).await.unwrap();
        repo.create(v2).await.unwrap();
        repo.activate("v1").await.unwrap();
        assert!(repo.find_active().await.unwrap().unwrap().id == "v1");
        repo.activate("v2").await.unwrap();
        let active = repo.find_active().await.unwrap().unwrap();
        assert_eq!(active.id, "v2");
        assert!(!repo.get("v1").await.unwrap().unwrap().active);
    }
}
