//! Service registry: the source of truth for which upstreams exist and
//! which endpoints they expose.
//!
//! Writes go through optimistic concurrency control so two admins racing
//! to update the same service never silently clobber each other: only
//! `updateVersion == currentStored + 1` succeeds. Reads are cached with
//! invalidate-on-write, mirroring the cache-through pattern a Redis pool
//! would use.

use std::sync::Arc;
use std::time::Duration;

use serde_json;

use crate::error::{Error, Result};

use super::model::ServiceRegistration;
use super::storage::{CacheRepository, ServiceRegistrationRepository};

const CACHE_KEY_PREFIX: &str = "registry:service";
const CACHE_ALL_KEY: &str = "registry:all";

/// Facade over the repository + cache pair, exposing the operations the
/// router and pipeline actually need.
pub struct ServiceRegistry {
    repo: Arc<dyn ServiceRegistrationRepository>,
    cache: Arc<dyn CacheRepository>,
    cache_ttl: Duration,
}

impl ServiceRegistry {
    pub fn new(
        repo: Arc<dyn ServiceRegistrationRepository>,
        cache: Arc<dyn CacheRepository>,
        cache_ttl: Duration,
    ) -> Self {
        Self { repo, cache, cache_ttl }
    }

    fn cache_key(service_id: &str) -> String {
        format!("{CACHE_KEY_PREFIX}:{service_id}")
    }

    pub async fn get(&self, service_id: &str) -> Result<Option<ServiceRegistration>> {
        let key = Self::cache_key(service_id);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(reg) = serde_json::from_str(&cached) {
                return Ok(Some(reg));
            }
        }
        let reg = self.repo.get(service_id).await?;
        if let Some(reg) = &reg {
            if let Ok(json) = serde_json::to_string(reg) {
                let _ = self.cache.set(&key, json, self.cache_ttl).await;
            }
        }
        Ok(reg)
    }

    /// All registered services, used by the router to build its match
    /// table. Not cached individually — callers should cache the snapshot
    /// themselves if they poll frequently.
    pub async fn get_all(&self) -> Result<Vec<ServiceRegistration>> {
        self.repo.get_all().await
    }

    /// Registers a brand new service, or replaces one unconditionally.
    /// Admin-initiated full registration bypasses CAS since there is no
    /// prior client-observed version to race against.
    pub async fn register(&self, registration: ServiceRegistration) -> Result<ServiceRegistration> {
        if !registration.is_valid() {
            return Err(Error::ValidationError(format!(
                "service registration '{}' is invalid: baseUrl must be absolute and every endpoint must satisfy its visibility constraints",
                registration.service_id
            )));
        }
        let stored = self.repo.upsert(registration).await?;
        self.invalidate(&stored.service_id).await;
        Ok(stored)
    }

    /// Conditional update: `expected_version` must equal
    /// the currently stored version, and the write bumps it by exactly one.
    /// Returns `Err(Conflict)` on a version mismatch.
    pub async fn update(
        &self,
        registration: ServiceRegistration,
        expected_version: u64,
    ) -> Result<ServiceRegistration> {
        if !registration.is_valid() {
            return Err(Error::ValidationError(format!(
                "service registration '{}' is invalid",
                registration.service_id
            )));
        }
        let service_id = registration.service_id.clone();
        match self.repo.compare_and_swap(registration, expected_version).await? {
            Some(updated) => {
                self.invalidate(&service_id).await;
                Ok(updated)
            }
            None => Err(Error::Conflict(format!(
                "service '{service_id}' was updated concurrently; refetch and retry"
            ))),
        }
    }

    pub async fn deregister(&self, service_id: &str) -> Result<bool> {
        let deleted = self.repo.delete(service_id).await?;
        self.invalidate(service_id).await;
        Ok(deleted)
    }

    async fn invalidate(&self, service_id: &str) {
        let _ = self.cache.invalidate(&Self::cache_key(service_id)).await;
        let _ = self.cache.invalidate(CACHE_ALL_KEY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::{EndpointConfig, Visibility};
    use crate::gateway::storage::{MemoryCacheRepository, MemoryServiceRegistrationRepository};

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(
            Arc::new(MemoryServiceRegistrationRepository::default()),
            Arc::new(MemoryCacheRepository::default()),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn register_rejects_invalid_registration() {
        let registry = registry();
        let mut reg = ServiceRegistration::new("users", "not-a-url");
        reg.endpoints.push(EndpointConfig::new("/users", &["GET"], Visibility::Public));
        assert!(registry.register(reg).await.is_err());
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let registry = registry();
        let reg = ServiceRegistration::new("users", "http://users.internal");
        let stored = registry.register(reg).await.unwrap();
        assert_eq!(stored.version, 1);

        let result = registry.update(stored.clone(), 99).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        let updated = registry.update(stored, 1).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn get_reflects_update_after_cache_invalidation() {
        let registry = registry();
        let reg = ServiceRegistration::new("users", "http://users.internal");
        let stored = registry.register(reg).await.unwrap();
        assert_eq!(registry.get("users").await.unwrap().unwrap().version, 1);

        registry.update(stored, 1).await.unwrap();
        assert_eq!(registry.get("users").await.unwrap().unwrap().version, 2);
    }
}
