//! Token revocation engine.
//!
//! Three layers, cheapest first: a bloom filter with no false negatives
//! short-circuits the common "definitely not revoked" case; a short-TTL
//! cache absorbs repeated checks for the same token; the repository is
//! authoritative. Revocations fan out to other gateway instances over a
//! [`RevocationPublisher`] so their bloom filters and caches stay warm
//! without each one hitting the repository on every check.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::RevocationConfig;
use crate::error::Result;

use super::bloom::BloomFilter;
use super::model::RevocationEvent;
use super::storage::{CacheRepository, TokenRevocationRepository};

/// Fans revocation events out to other gateway instances.
#[async_trait]
pub trait RevocationPublisher: Send + Sync {
    async fn publish(&self, event: &RevocationEvent) -> Result<()>;
}

/// Single-process publisher backed by a `tokio::sync::broadcast` channel.
/// Suitable when the gateway runs as one instance, or as the in-process
/// half of a wider fan-out (paired with a Redis/NATS-backed publisher for
/// cross-instance delivery).
pub struct InProcessRevocationPublisher {
    tx: broadcast::Sender<RevocationEvent>,
}

impl InProcessRevocationPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RevocationEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl RevocationPublisher for InProcessRevocationPublisher {
    async fn publish(&self, event: &RevocationEvent) -> Result<()> {
        // No subscribers is not an error: a single-instance deployment has
        // nothing to fan out to.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Checks and records revocations.
pub struct RevocationEngine {
    repo: Arc<dyn TokenRevocationRepository>,
    cache: Arc<dyn CacheRepository>,
    publisher: Arc<dyn RevocationPublisher>,
    bloom: BloomFilter,
    config: RevocationConfig,
    /// Unix timestamp (seconds) of the last bloom rebuild; drives
    /// `rebuild_interval_secs`-based rebuild cadence.
    last_rebuild: AtomicI64,
}

impl RevocationEngine {
    pub fn new(
        repo: Arc<dyn TokenRevocationRepository>,
        cache: Arc<dyn CacheRepository>,
        publisher: Arc<dyn RevocationPublisher>,
        config: RevocationConfig,
    ) -> Self {
        let bloom = BloomFilter::new(config.bloom_size, config.bloom_hashes);
        Self { repo, cache, publisher, bloom, config, last_rebuild: AtomicI64::new(0) }
    }

    /// Seeds the bloom filter from the repository. Call once at startup
    /// before serving traffic.
    pub async fn bootstrap(&self) -> Result<()> {
        self.rebuild_bloom().await
    }

    /// Revokes a single token by `jti`. `expires_at` bounds how long the
    /// repository needs to retain the record.
    pub async fn revoke_jti(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.repo.revoke_jti(jti, expires_at).await?;
        self.bloom.insert(jti);
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let _ = self.cache.set(&Self::jti_cache_key(jti), "1".to_string(), ttl).await;
        self.publisher.publish(&RevocationEvent::JtiRevoked { jti: jti.to_string(), expires_at }).await?;
        Ok(())
    }

    /// Revokes every token issued to `user_id` before `issued_before`
    /// (e.g. on password change or forced logout).
    pub async fn revoke_user(&self, user_id: &str, issued_before: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<()> {
        self.repo.revoke_user(user_id, issued_before, expires_at).await?;
        self.publisher
            .publish(&RevocationEvent::UserRevoked { user_id: user_id.to_string(), issued_before, expires_at })
            .await?;
        Ok(())
    }

    /// `true` if `jti` or `user_id`'s issued-before watermark revokes this
    /// token. `issued_at` is the token's `iat` claim; `expires_at` is its
    /// `exp` claim. A token whose remaining lifetime is under
    /// `check_threshold` skips both the bloom filter and the repository
    /// entirely — it expires before a revocation would matter.
    pub async fn is_revoked(&self, jti: &str, user_id: Option<&str>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<bool> {
        let remaining_secs = (expires_at - Utc::now()).num_seconds();
        if remaining_secs < self.config.check_threshold as i64 {
            return Ok(false);
        }
        if self.jti_revoked(jti).await? {
            return Ok(true);
        }
        if let Some(user_id) = user_id {
            if self.user_revoked(user_id, issued_at).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn jti_revoked(&self, jti: &str) -> Result<bool> {
        if self.bloom.definitely_not_present(jti) {
            return Ok(false);
        }
        let cache_key = Self::jti_cache_key(jti);
        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            return Ok(cached == "1");
        }
        let revoked = self.repo.is_revoked(jti).await?;
        self.maybe_rebuild_bloom().await;
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let _ = self.cache.set(&cache_key, if revoked { "1" } else { "0" }.to_string(), ttl).await;
        Ok(revoked)
    }

    async fn user_revoked(&self, user_id: &str, issued_at: DateTime<Utc>) -> Result<bool> {
        let cache_key = format!("revocation:user:{user_id}:{}", issued_at.timestamp_millis());
        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            return Ok(cached == "1");
        }
        let revoked = self.repo.is_user_revoked(user_id, issued_at).await?;
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let _ = self.cache.set(&cache_key, if revoked { "1" } else { "0" }.to_string(), ttl).await;
        Ok(revoked)
    }

    fn jti_cache_key(jti: &str) -> String {
        format!("revocation:jti:{jti}")
    }

    /// Once `rebuild_interval_secs` has elapsed since the last rebuild,
    /// rebuild the bloom filter from scratch so it keeps tracking entries
    /// that have aged out of the repository's retention window. Piggybacks
    /// on repository checks rather than running its own background task.
    async fn maybe_rebuild_bloom(&self) {
        let now = Utc::now().timestamp();
        let last = self.last_rebuild.load(Ordering::Relaxed);
        if now - last < self.config.rebuild_interval_secs as i64 {
            return;
        }
        if self.last_rebuild.compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
            if let Err(e) = self.rebuild_bloom().await {
                warn!(error = %e, "bloom filter rebuild failed");
            }
        }
    }

    pub async fn rebuild_bloom(&self) -> Result<()> {
        let jtis = self.repo.all_active_jtis().await?;
        self.bloom.rebuild_from(jtis);
        self.last_rebuild.store(Utc::now().timestamp(), Ordering::Relaxed);
        Ok(())
    }

    /// Applies an event received from another instance: updates the local
    /// bloom filter, cache, and repository without re-publishing (the
    /// originator already did that).
    pub async fn apply_remote_event(&self, event: RevocationEvent) -> Result<()> {
        match event {
            RevocationEvent::JtiRevoked { jti, expires_at } => {
                self.repo.revoke_jti(&jti, expires_at).await?;
                self.bloom.insert(&jti);
                let ttl = Duration::from_secs(self.config.cache_ttl_secs);
                let _ = self.cache.set(&Self::jti_cache_key(&jti), "1".to_string(), ttl).await;
            }
            RevocationEvent::UserRevoked { user_id, issued_before, expires_at } => {
                self.repo.revoke_user(&user_id, issued_before, expires_at).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::storage::{MemoryCacheRepository, MemoryTokenRevocationRepository};

    fn engine() -> RevocationEngine {
        RevocationEngine::new(
            Arc::new(MemoryTokenRevocationRepository::default()),
            Arc::new(MemoryCacheRepository::default()),
            Arc::new(InProcessRevocationPublisher::new(16)),
            RevocationConfig::default(),
        )
    }

    /// Comfortably outside any `check_threshold` bypass window used below.
    fn far_future() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(1)
    }

    #[tokio::test]
    async fn unknown_jti_is_not_revoked() {
        let engine = engine();
        engine.bootstrap().await.unwrap();
        assert!(!engine.is_revoked("unknown", None, Utc::now(), far_future()).await.unwrap());
    }

    #[tokio::test]
    async fn revoked_jti_is_detected_after_bloom_and_cache() {
        let engine = engine();
        engine.bootstrap().await.unwrap();
        let expires = Utc::now() + chrono::Duration::hours(1);
        engine.revoke_jti("abc", expires).await.unwrap();
        assert!(engine.is_revoked("abc", None, Utc::now(), far_future()).await.unwrap());
        // second check should hit the cache layer, not the repository
        assert!(engine.is_revoked("abc", None, Utc::now(), far_future()).await.unwrap());
    }

    #[tokio::test]
    async fn user_revocation_covers_tokens_issued_before_watermark() {
        let engine = engine();
        engine.bootstrap().await.unwrap();
        let now = Utc::now();
        engine.revoke_user("u1", now, now + chrono::Duration::days(1)).await.unwrap();
        assert!(engine.is_revoked("some-jti", Some("u1"), now - chrono::Duration::minutes(1), far_future()).await.unwrap());
        assert!(!engine.is_revoked("some-jti-2", Some("u1"), now + chrono::Duration::minutes(1), far_future()).await.unwrap());
    }

    #[tokio::test]
    async fn remote_event_application_updates_local_state_without_republishing() {
        let engine = engine();
        engine.bootstrap().await.unwrap();
        let expires = Utc::now() + chrono::Duration::hours(1);
        engine.apply_remote_event(RevocationEvent::JtiRevoked { jti: "remote-jti".to_string(), expires_at: expires }).await.unwrap();
        assert!(engine.is_revoked("remote-jti", None, Utc::now(), far_future()).await.unwrap());
    }

    #[tokio::test]
    async fn token_near_expiry_bypasses_revocation_check() {
        let engine = engine();
        engine.bootstrap().await.unwrap();
        let expires = Utc::now() + chrono::Duration::hours(1);
        engine.revoke_jti("soon-to-expire", expires).await.unwrap();
        // Remaining lifetime is under `check_threshold` seconds, so the
        // check short-circuits to "not revoked" without touching bloom or
        // cache — even though the jti was, in fact, revoked above.
        let almost_expired = Utc::now() + chrono::Duration::seconds(1);
        assert!(!engine.is_revoked("soon-to-expire", None, Utc::now(), almost_expired).await.unwrap());
    }
}
