//! Signing-key registry and rotation.
//!
//! States: `PENDING -> ACTIVE -> DEPRECATED -> RETIRED`. The registry keeps
//! a lock-free hot cache of verification keys (`ACTIVE ∪ DEPRECATED`) so the
//! request hot path never awaits the repository; writes go through the
//! repository first and refresh the cache afterward.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::RsaPrivateKey;

use crate::config::KeyRotationConfig;
use crate::error::{Error, Result};

use super::model::{KeyStatus, SigningKeyRecord};
use super::storage::SigningKeyRepository;

const RSA_KEY_BITS: usize = 2048;

/// Drives the rotation state machine and serves verification keys.
pub struct SigningKeyRegistry {
    repo: Arc<dyn SigningKeyRepository>,
    config: KeyRotationConfig,
    /// `key_id -> record`, ACTIVE ∪ DEPRECATED only; refreshed on every
    /// mutation and by the periodic scheduler.
    verification_cache: DashMap<String, SigningKeyRecord>,
    last_refresh_millis: AtomicI64,
    ready: AtomicBool,
}

impl SigningKeyRegistry {
    pub fn new(repo: Arc<dyn SigningKeyRepository>, config: KeyRotationConfig) -> Self {
        Self {
            repo,
            config,
            verification_cache: DashMap::new(),
            last_refresh_millis: AtomicI64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Ensures at least one ACTIVE key exists, generating and activating one
    /// if the repository is empty. Call once at startup.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.repo.find_active().await?.is_none() {
            let pending = self.generate_pending()?;
            let pending = self.repo.save(pending).await?;
            self.promote(pending.key_id).await?;
        }
        self.refresh_cache().await?;
        Ok(())
    }

    /// Generates a fresh RSA key pair in PENDING state. Does not persist it.
    pub fn generate_pending(&self) -> Result<SigningKeyRecord> {
        let mut rng = rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| Error::Internal(format!("RSA key generation failed: {e}")))?;
        let public_key = private_key.to_public_key();
        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::Internal(format!("failed to encode private key: {e}")))?
            .to_string();
        let public_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::Internal(format!("failed to encode public key: {e}")))?;

        Ok(SigningKeyRecord {
            key_id: uuid::Uuid::new_v4().to_string(),
            public_key_pem: public_pem,
            private_key_pem: Some(private_pem),
            status: KeyStatus::Pending,
            created_at: Utc::now(),
            activated_at: None,
            deprecated_at: None,
            retired_at: None,
        })
    }

    /// Promotes a PENDING key to ACTIVE, moving the prior ACTIVE key (if
    /// any) to DEPRECATED. Invariant: at most one ACTIVE key at a time.
    pub async fn promote(&self, key_id: String) -> Result<SigningKeyRecord> {
        let mut pending = self
            .repo
            .get(&key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("signing key '{key_id}'")))?;
        if pending.status != KeyStatus::Pending {
            return Err(Error::Conflict(format!(
                "signing key '{key_id}' is not PENDING (status={:?})",
                pending.status
            )));
        }

        if let Some(mut prior) = self.repo.find_active().await? {
            prior.status = KeyStatus::Deprecated;
            prior.deprecated_at = Some(Utc::now());
            self.repo.save(prior).await?;
        }

        pending.status = KeyStatus::Active;
        pending.activated_at = Some(Utc::now());
        let promoted = self.repo.save(pending).await?;
        self.refresh_cache().await?;
        Ok(promoted)
    }

    /// Runs one rotation cycle: generates a new PENDING key and immediately
    /// promotes it, per the scheduler cadence in `keyrotation.interval`.
    pub async fn rotate(&self) -> Result<SigningKeyRecord> {
        if !self.config.enabled {
            return Err(Error::ValidationError("key rotation is disabled".to_string()));
        }
        let pending = self.generate_pending()?;
        let pending = self.repo.save(pending).await?;
        self.promote(pending.key_id).await
    }

    /// Admin operation: force a key straight to DEPRECATED regardless of
    /// the scheduler cadence.
    pub async fn force_deprecate(&self, key_id: &str) -> Result<SigningKeyRecord> {
        let mut key = self
            .repo
            .get(key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("signing key '{key_id}'")))?;
        if key.status != KeyStatus::Active {
            return Err(Error::Conflict(format!(
                "signing key '{key_id}' is not ACTIVE (status={:?})",
                key.status
            )));
        }
        key.status = KeyStatus::Deprecated;
        key.deprecated_at = Some(Utc::now());
        let saved = self.repo.save(key).await?;
        self.refresh_cache().await?;
        Ok(saved)
    }

    /// Admin operation: retire a key immediately. Every token signed with
    /// it stops verifying from this point on.
    pub async fn force_retire(&self, key_id: &str) -> Result<SigningKeyRecord> {
        let mut key = self
            .repo
            .get(key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("signing key '{key_id}'")))?;
        if key.status != KeyStatus::Deprecated {
            return Err(Error::Conflict(format!(
                "signing key '{key_id}' is not DEPRECATED (status={:?})",
                key.status
            )));
        }
        key.status = KeyStatus::Retired;
        key.retired_at = Some(Utc::now());
        let saved = self.repo.save(key).await?;
        self.refresh_cache().await?;
        Ok(saved)
    }

    /// Moves every DEPRECATED key past its grace period to RETIRED. Called
    /// by the rotation scheduler alongside `rotate`.
    pub async fn retire_expired(&self) -> Result<Vec<String>> {
        let grace = chrono::Duration::seconds(self.config.grace_period_secs as i64);
        let mut retired = Vec::new();
        for key in self.repo.list().await? {
            if key.status == KeyStatus::Deprecated {
                if let Some(deprecated_at) = key.deprecated_at {
                    if Utc::now() - deprecated_at >= grace {
                        let key_id = key.key_id.clone();
                        let mut key = key;
                        key.status = KeyStatus::Retired;
                        key.retired_at = Some(Utc::now());
                        self.repo.save(key).await?;
                        retired.push(key_id);
                    }
                }
            }
        }
        if !retired.is_empty() {
            self.refresh_cache().await?;
        }
        Ok(retired)
    }

    /// The key the gateway should use to mint new tokens right now, or
    /// `None` if no ACTIVE key has been provisioned yet.
    pub async fn current_signing_key(&self) -> Result<Option<SigningKeyRecord>> {
        self.repo.find_active().await
    }

    /// Lock-free hot-path lookup: `ACTIVE ∪ DEPRECATED`, never RETIRED.
    pub fn find_for_verification(&self, key_id: &str) -> Option<SigningKeyRecord> {
        self.verification_cache.get(key_id).map(|r| r.clone())
    }

    /// Reloads the verification cache from the repository. Safe to call
    /// from the periodic scheduler; readers never observe a half-populated
    /// cache since `DashMap` mutations are per-entry.
    pub async fn refresh_cache(&self) -> Result<()> {
        let keys = self.repo.find_all_for_verification().await?;
        self.verification_cache.clear();
        for key in keys {
            self.verification_cache.insert(key.key_id.clone(), key);
        }
        self.last_refresh_millis.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// For the health endpoint.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn last_refresh_time(&self) -> Option<chrono::DateTime<Utc>> {
        let millis = self.last_refresh_millis.load(Ordering::SeqCst);
        if millis == 0 {
            None
        } else {
            chrono::DateTime::from_timestamp_millis(millis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::storage::MemorySigningKeyRepository;

    fn registry() -> SigningKeyRegistry {
        SigningKeyRegistry::new(Arc::new(MemorySigningKeyRepository::default()), KeyRotationConfig::default())
    }

    #[tokio::test]
    async fn bootstrap_creates_a_single_active_key() {
        let registry = registry();
        registry.bootstrap().await.unwrap();
        let active = registry.current_signing_key().await.unwrap().unwrap();
        assert_eq!(active.status, KeyStatus::Active);
        assert!(registry.is_ready());
    }

    #[tokio::test]
    async fn rotation_deprecates_the_prior_active_key() {
        let registry = registry();
        registry.bootstrap().await.unwrap();
        let k1 = registry.current_signing_key().await.unwrap().unwrap();

        let k2 = registry.rotate().await.unwrap();
        assert_eq!(k2.status, KeyStatus::Active);

        let verification_keys: Vec<_> = [&k1.key_id, &k2.key_id]
            .into_iter()
            .filter_map(|id| registry.find_for_verification(id))
            .collect();
        assert_eq!(verification_keys.len(), 2);
        let deprecated = verification_keys.iter().find(|k| k.key_id == k1.key_id).unwrap();
        assert_eq!(deprecated.status, KeyStatus::Deprecated);
    }

    #[tokio::test]
    async fn retired_keys_are_never_served_for_verification() {
        let registry = registry();
        registry.bootstrap().await.unwrap();
        let k1 = registry.current_signing_key().await.unwrap().unwrap();
        registry.rotate().await.unwrap();
        registry.force_retire(&k1.key_id).await.unwrap();
        assert!(registry.find_for_verification(&k1.key_id).is_none());
    }

    #[tokio::test]
    async fn promoting_a_non_pending_key_conflicts() {
        let registry = registry();
        registry.bootstrap().await.unwrap();
        let active = registry.current_signing_key().await.unwrap().unwrap();
        let result = registry.promote(active.key_id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }
}
