//! Token translation: maps external claims to internal roles/permissions.
//!
//! A [`TranslationConfigVersion`] (the active one, loaded through
//! [`TranslationConfigRepository`]) describes `sources` (claim addresses),
//! `transforms` (per-source operation pipelines), `mappings`
//! (role/permission lookups), and `defaults`. Results are cached by
//! `(providerId, issuer, subject, claims-digest)` and invalidated whenever
//! a new version is activated.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::config::TranslationConfig as TranslationCacheConfig;
use crate::error::{Error, Result};

use super::model::{ClaimSource, ClaimSourceType, TransformOp, TranslationSchema};
use super::storage::{CacheRepository, TranslationConfigRepository};

/// Output of a successful translation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslationResult {
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
    pub attributes: HashMap<String, String>,
}

/// A pluggable source of translation logic. Implementations are selected by
/// priority at startup: `remote` (100) > `config` (10) >
/// `default` (0).
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;
    fn priority(&self) -> i32;
    async fn translate(
        &self,
        issuer: &str,
        subject: &str,
        claims: &HashMap<String, serde_json::Value>,
    ) -> Result<TranslationResult>;
}

/// Picks the configured provider by name, or the highest-priority one.
pub fn select_translation_provider(
    providers: Vec<Arc<dyn TranslationProvider>>,
    configured_name: Option<&str>,
) -> Result<Arc<dyn TranslationProvider>> {
    if let Some(name) = configured_name {
        return providers
            .into_iter()
            .find(|p| p.provider_name() == name)
            .ok_or_else(|| Error::ValidationError(format!("no translation provider named '{name}'")));
    }
    providers
        .into_iter()
        .max_by_key(|p| p.priority())
        .ok_or_else(|| Error::ValidationError("no translation provider configured".to_string()))
}

/// Simplest provider: treats a flat `roles` claim as the role list with no
/// schema, transforms, or mappings.
pub struct DefaultTranslationProvider;

#[async_trait]
impl TranslationProvider for DefaultTranslationProvider {
    fn provider_name(&self) -> &'static str {
        "default"
    }
    fn priority(&self) -> i32 {
        0
    }
    async fn translate(
        &self,
        _issuer: &str,
        _subject: &str,
        claims: &HashMap<String, serde_json::Value>,
    ) -> Result<TranslationResult> {
        let roles: HashSet<String> = claims
            .get("roles")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        Ok(TranslationResult { roles, permissions: HashSet::new(), attributes: HashMap::new() })
    }
}

/// Schema-driven provider backed by the active [`TranslationConfigVersion`].
/// File-backed config-reload providers are a thin wrapper that re-reads the
/// schema and calls [`ConfigTranslationProvider::create`] again.
pub struct ConfigTranslationProvider {
    repo: Arc<dyn TranslationConfigRepository>,
}

impl ConfigTranslationProvider {
    pub fn new(repo: Arc<dyn TranslationConfigRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl TranslationProvider for ConfigTranslationProvider {
    fn provider_name(&self) -> &'static str {
        "config"
    }
    fn priority(&self) -> i32 {
        10
    }
    async fn translate(
        &self,
        _issuer: &str,
        _subject: &str,
        claims: &HashMap<String, serde_json::Value>,
    ) -> Result<TranslationResult> {
        let Some(version) = self.repo.find_active().await? else {
            return Ok(TranslationResult::default());
        };
        apply_schema(&version.schema, claims)
    }
}

/// POSTs `{issuer, subject, claims}` to an external translation service.
pub struct RemoteTranslationProvider {
    url: String,
    http: reqwest::Client,
    fail_mode: RemoteFailMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFailMode {
    /// Rethrow the failure; the caller denies the request.
    Deny,
    /// Swallow the failure and return an empty translation result.
    AllowEmpty,
}

impl RemoteTranslationProvider {
    pub fn new(url: impl Into<String>, timeout: Duration, fail_mode: RemoteFailMode) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { url: url.into(), http, fail_mode }
    }
}

#[derive(Serialize)]
struct RemoteTranslationRequest<'a> {
    issuer: &'a str,
    subject: &'a str,
    claims: &'a HashMap<String, serde_json::Value>,
}

#[async_trait]
impl TranslationProvider for RemoteTranslationProvider {
    fn provider_name(&self) -> &'static str {
        "remote"
    }
    fn priority(&self) -> i32 {
        100
    }
    async fn translate(
        &self,
        issuer: &str,
        subject: &str,
        claims: &HashMap<String, serde_json::Value>,
    ) -> Result<TranslationResult> {
        let body = RemoteTranslationRequest { issuer, subject, claims };
        let result = async {
            let response = self.http.post(&self.url).json(&body).send().await?;
            response.json::<TranslationResult>().await
        }
        .await;

        match (result, self.fail_mode) {
            (Ok(r), _) => Ok(r),
            (Err(_), RemoteFailMode::AllowEmpty) => Ok(TranslationResult::default()),
            (Err(e), RemoteFailMode::Deny) => Err(Error::External(format!("remote translation failed: {e}"))),
        }
    }
}

/// Applies a [`TranslationSchema`] to a claims map, independent of where the
/// schema came from (exposed for direct use and for tests).
pub fn apply_schema(
    schema: &TranslationSchema,
    claims: &HashMap<String, serde_json::Value>,
) -> Result<TranslationResult> {
    let mut roles = HashSet::new();
    let mut permissions = HashSet::new();

    for source in &schema.sources {
        let raw_values = extract_source_values(claims, source);
        let empty = Vec::new();
        let ops = schema.transforms.get(&source.name).unwrap_or(&empty);
        for raw in raw_values {
            let transformed = apply_transforms(&raw, ops);
            let mut matched = false;
            if let Some(perm) = schema.mappings.direct_permissions.get(&transformed) {
                permissions.insert(perm.clone());
                matched = true;
            }
            if let Some(perms) = schema.mappings.role_to_permissions.get(&transformed) {
                roles.insert(transformed.clone());
                permissions.extend(perms.iter().cloned());
                matched = true;
            }
            if !matched && schema.defaults.include_unmapped {
                roles.insert(transformed);
            }
        }
    }

    if roles.is_empty() && permissions.is_empty() && schema.defaults.deny_if_no_match {
        return Err(Error::Forbidden("no translation mapping matched any claim".to_string()));
    }

    Ok(TranslationResult { roles, permissions, attributes: HashMap::new() })
}

/// Resolves a dot-path claim address (e.g. `realm_access.roles`) against
/// the claims map and extracts string values according to the source type.
fn extract_source_values(claims: &HashMap<String, serde_json::Value>, source: &ClaimSource) -> Vec<String> {
    let mut segments = source.claim.split('.');
    let Some(first) = segments.next() else { return Vec::new() };
    let Some(mut current) = claims.get(first) else { return Vec::new() };
    for segment in segments {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }

    match source.source_type {
        ClaimSourceType::Array => current
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        ClaimSourceType::String => current.as_str().map(|s| vec![s.to_string()]).unwrap_or_default(),
        ClaimSourceType::SpaceDelimited => current
            .as_str()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
        ClaimSourceType::CommaDelimited => current
            .as_str()
            .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default(),
    }
}

/// Applies transform operations in declared order.
fn apply_transforms(raw: &str, ops: &[TransformOp]) -> String {
    let mut value = raw.to_string();
    for op in ops {
        value = match op {
            TransformOp::StripPrefix { value: prefix } => {
                value.strip_prefix(prefix.as_str()).map(String::from).unwrap_or(value)
            }
            TransformOp::Replace { from, to } => value.replace(from.as_str(), to.as_str()),
            TransformOp::Lowercase => value.to_lowercase(),
            TransformOp::Uppercase => value.to_uppercase(),
            TransformOp::Regex { pattern, replacement } => match Regex::new(pattern) {
                Ok(re) => re.replace_all(&value, replacement.as_str()).into_owned(),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid translation regex, skipping");
                    value
                }
            },
        };
    }
    value
}

/// Wraps a [`TranslationProvider`] with a cache keyed by
/// `(issuer, subject, claims-digest)`, TTL'd and invalidated on version
/// activation.
pub struct TranslationEngine {
    provider: Arc<dyn TranslationProvider>,
    cache: Arc<dyn CacheRepository>,
    config: TranslationCacheConfig,
    /// Bumped by `invalidate_all`; folded into every cache key so flipping
    /// it orphans every previously-cached translation at once without a
    /// bulk delete against the backing cache.
    generation: AtomicU64,
}

impl TranslationEngine {
    pub fn new(provider: Arc<dyn TranslationProvider>, cache: Arc<dyn CacheRepository>, config: TranslationCacheConfig) -> Self {
        Self { provider, cache, config, generation: AtomicU64::new(0) }
    }

    fn cache_key(&self, issuer: &str, subject: &str, claims: &HashMap<String, serde_json::Value>) -> String {
        let digest = blake3::hash(serde_json::to_vec(claims).unwrap_or_default().as_slice());
        let generation = self.generation.load(Ordering::Relaxed);
        format!("translation:{generation}:{}:{issuer}:{subject}:{}", self.provider.provider_name(), digest.to_hex())
    }

    pub async fn translate(
        &self,
        issuer: &str,
        subject: &str,
        claims: &HashMap<String, serde_json::Value>,
    ) -> Result<TranslationResult> {
        let key = self.cache_key(issuer, subject, claims);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if let Ok(result) = serde_json::from_str(&cached) {
                return Ok(result);
            }
        }
        let result = self.provider.translate(issuer, subject, claims).await?;
        if let Ok(json) = serde_json::to_string(&result) {
            let _ = self.cache.set(&key, json, Duration::from_secs(self.config.cache_ttl_secs)).await;
        }
        Ok(result)
    }

    /// Called when a translation config version is activated: every
    /// cached translation becomes stale at once, regardless of which
    /// issuer/subject it was cached under.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::{ClaimSource, ClaimSourceType, TranslationDefaults, TranslationMappings};
    use crate::gateway::storage::MemoryCacheRepository;

    /// Returns a translation whose sole permission is the call count so
    /// far, to make cache hits vs. misses observable.
    struct CountingProvider {
        calls: std::sync::atomic::AtomicU64,
    }

    #[async_trait]
    impl TranslationProvider for CountingProvider {
        fn provider_name(&self) -> &'static str {
            "counting"
        }
        fn priority(&self) -> i32 {
            0
        }
        async fn translate(&self, _issuer: &str, _subject: &str, _claims: &HashMap<String, serde_json::Value>) -> Result<TranslationResult> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(TranslationResult { roles: HashSet::new(), permissions: [format!("call-{call}")].into_iter().collect(), attributes: HashMap::new() })
        }
    }

    #[tokio::test]
    async fn invalidate_all_bypasses_stale_cache_entries() {
        let provider = Arc::new(CountingProvider { calls: std::sync::atomic::AtomicU64::new(0) });
        let engine = TranslationEngine::new(provider, Arc::new(MemoryCacheRepository::default()), TranslationCacheConfig::default());
        let claims = HashMap::new();

        let first = engine.translate("issuer", "subject", &claims).await.unwrap();
        let second = engine.translate("issuer", "subject", &claims).await.unwrap();
        assert_eq!(first.permissions, second.permissions, "second call should hit the cache");

        engine.invalidate_all();
        let third = engine.translate("issuer", "subject", &claims).await.unwrap();
        assert_ne!(first.permissions, third.permissions, "activation must invalidate every cached entry");
    }

    fn claims_with_roles(roles: &[&str]) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "roles".to_string(),
            serde_json::Value::Array(roles.iter().map(|r| serde_json::Value::String(r.to_string())).collect()),
        );
        map
    }

    #[test]
    fn role_mapping_expands_to_permissions() {
        let mut mappings = TranslationMappings::default();
        mappings.role_to_permissions.insert("admin".to_string(), vec!["admin.all".to_string()]);
        let schema = TranslationSchema {
            sources: vec![ClaimSource { name: "roles".into(), claim: "roles".into(), source_type: ClaimSourceType::Array }],
            transforms: HashMap::new(),
            mappings,
            defaults: TranslationDefaults::default(),
        };
        let result = apply_schema(&schema, &claims_with_roles(&["admin"])).unwrap();
        assert!(result.permissions.contains("admin.all"));
        assert!(result.roles.contains("admin"));
    }

    #[test]
    fn activation_changes_resulting_permissions_for_same_token() {
        let mut v1 = TranslationMappings::default();
        v1.role_to_permissions.insert("admin".to_string(), vec!["admin.all".to_string()]);
        let schema_v1 = TranslationSchema {
            sources: vec![ClaimSource { name: "roles".into(), claim: "roles".into(), source_type: ClaimSourceType::Array }],
            transforms: HashMap::new(),
            mappings: v1,
            defaults: TranslationDefaults::default(),
        };
        let claims = claims_with_roles(&["admin"]);
        let result_v1 = apply_schema(&schema_v1, &claims).unwrap();
        assert_eq!(result_v1.permissions, ["admin.all".to_string()].into_iter().collect());

        let mut v2 = TranslationMappings::default();
        v2.role_to_permissions.insert("admin".to_string(), vec!["admin.read".to_string()]);
        let schema_v2 = TranslationSchema { mappings: v2, ..schema_v1 };
        let result_v2 = apply_schema(&schema_v2, &claims).unwrap();
        assert_eq!(result_v2.permissions, ["admin.read".to_string()].into_iter().collect());
    }

    #[test]
    fn deny_if_no_match_rejects_unmapped_claims() {
        let schema = TranslationSchema {
            sources: vec![ClaimSource { name: "roles".into(), claim: "roles".into(), source_type: ClaimSourceType::Array }],
            transforms: HashMap::new(),
            mappings: TranslationMappings::default(),
            defaults: TranslationDefaults { deny_if_no_match: true, include_unmapped: false },
        };
        let result = apply_schema(&schema, &claims_with_roles(&["unmapped"]));
        assert!(result.is_err());
    }

    #[test]
    fn strip_prefix_transform_runs_before_mapping_lookup() {
        let mut mappings = TranslationMappings::default();
        mappings.role_to_permissions.insert("admin".to_string(), vec!["admin.all".to_string()]);
        let mut transforms = HashMap::new();
        transforms.insert("roles".to_string(), vec![TransformOp::StripPrefix { value: "realm:".to_string() }]);
        let schema = TranslationSchema {
            sources: vec![ClaimSource { name: "roles".into(), claim: "roles".into(), source_type: ClaimSourceType::Array }],
            transforms,
            mappings,
            defaults: TranslationDefaults::default(),
        };
        let result = apply_schema(&schema, &claims_with_roles(&["realm:admin"])).unwrap();
        assert!(result.permissions.contains("admin.all"));
    }
}
