//! JWKS cache and OIDC token validator.
//!
//! The cache maps `jwksUri -> JsonWebKeySet` with a TTL. A miss triggers a
//! single-flight refresh per URI (concurrent callers for the same URI await
//! the same fetch rather than hammering the issuer) followed by one retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::JwksCacheConfig;

use super::model::TokenProviderConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use", default)]
    pub use_: Option<String>,
    pub kid: String,
    #[serde(default)]
    pub alg: Option<String>,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// Outcome of validating a bearer token.
#[derive(Debug, Clone)]
pub enum TokenValidationResult {
    /// Empty or whitespace-only input; the caller decides whether the
    /// endpoint allows anonymous access.
    NoToken,
    Valid {
        subject: String,
        issuer: String,
        expires_at: DateTime<Utc>,
        claims: HashMap<String, serde_json::Value>,
    },
    Invalid {
        reason: String,
    },
}

struct CachedKeySet {
    keys: JsonWebKeySet,
    fetched_at: DateTime<Utc>,
}

/// Per-issuer cached key sets with single-flight refresh-on-miss.
pub struct JwksCache {
    config: JwksCacheConfig,
    http: reqwest::Client,
    cache: DashMap<String, CachedKeySet>,
    /// One in-flight refresh per URI; other callers for the same URI block
    /// on this lock rather than issuing a duplicate fetch.
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl JwksCache {
    pub fn new(config: JwksCacheConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("reqwest client configuration is always valid");
        Self {
            config,
            http,
            cache: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs.clamp(self.config.min_ttl_secs, self.config.max_ttl_secs))
    }

    fn lock_for(&self, uri: &str) -> Arc<AsyncMutex<()>> {
        self.inflight.entry(uri.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Returns the JWK matching `kid` for `uri`, refreshing the cache once
    /// on a miss.
    pub async fn get_key(&self, uri: &str, kid: &str) -> Option<JsonWebKey> {
        if let Some(key) = self.lookup_fresh(uri, kid) {
            return Some(key);
        }
        let _ = self.refresh(uri).await;
        self.lookup_fresh(uri, kid)
    }

    fn lookup_fresh(&self, uri: &str, kid: &str) -> Option<JsonWebKey> {
        let entry = self.cache.get(uri)?;
        if Utc::now().signed_duration_since(entry.fetched_at).to_std().unwrap_or_default() > self.ttl() {
            return None;
        }
        entry.keys.keys.iter().find(|k| k.kid == kid).cloned()
    }

    /// Fetches and caches the key set for `uri`. Coalesces concurrent
    /// callers onto a single HTTP request via a per-URI lock.
    pub async fn refresh(&self, uri: &str) -> Result<(), String> {
        let lock = self.lock_for(uri);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(entry) = self.cache.get(uri) {
            if Utc::now().signed_duration_since(entry.fetched_at).to_std().unwrap_or_default() <= self.ttl() {
                return Ok(());
            }
        }

        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| format!("failed to fetch JWKS from '{uri}': {e}"))?;
        let keys: JsonWebKeySet = response
            .json()
            .await
            .map_err(|e| format!("failed to parse JWKS from '{uri}': {e}"))?;
        self.cache.insert(
            uri.to_string(),
            CachedKeySet { keys, fetched_at: Utc::now() },
        );
        Ok(())
    }
}

/// Verifies JWS tokens against a [`TokenProviderConfig`], backed by a
/// [`JwksCache`].
pub struct OidcValidator {
    jwks: Arc<JwksCache>,
}

impl OidcValidator {
    pub fn new(jwks: Arc<JwksCache>) -> Self {
        Self { jwks }
    }

    pub async fn validate(&self, token: &str, provider: &TokenProviderConfig) -> TokenValidationResult {
        if token.trim().is_empty() {
            return TokenValidationResult::NoToken;
        }

        let header = match decode_header(token) {
            Ok(h) => h,
            Err(_) => return TokenValidationResult::Invalid { reason: "malformed token".to_string() },
        };
        let Some(kid) = header.kid else {
            return TokenValidationResult::Invalid { reason: "Signing key not found in JWKS".to_string() };
        };

        let Some(jwk) = self.jwks.get_key(&provider.jwks_uri, &kid).await else {
            return TokenValidationResult::Invalid { reason: "Signing key not found in JWKS".to_string() };
        };

        let decoding_key = match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(k) => k,
            Err(_) => return TokenValidationResult::Invalid { reason: "Signing key not found in JWKS".to_string() },
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[provider.issuer.clone()]);
        if !provider.audiences.is_empty() {
            validation.set_audience(&provider.audiences.iter().cloned().collect::<Vec<_>>());
        } else {
            validation.validate_aud = false;
        }
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims: serde_json::Value = match decode(token, &decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                let reason = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token has expired",
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => "Invalid token issuer",
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => "Invalid token audience",
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => "Invalid token signature",
                    jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(c) if c == "sub" => {
                        "malformed token: missing subject"
                    }
                    _ => "malformed token",
                };
                return TokenValidationResult::Invalid { reason: reason.to_string() };
            }
        };

        let mut claims_map = match claims {
            serde_json::Value::Object(map) => map.into_iter().collect::<HashMap<_, _>>(),
            _ => return TokenValidationResult::Invalid { reason: "malformed token".to_string() },
        };

        let subject = match claims_map.get("sub").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return TokenValidationResult::Invalid { reason: "malformed token: missing subject".to_string() },
        };
        let expires_at = match claims_map.get("exp").and_then(|v| v.as_i64()) {
            Some(exp) => match DateTime::from_timestamp(exp, 0) {
                Some(dt) => dt,
                None => return TokenValidationResult::Invalid { reason: "malformed token".to_string() },
            },
            None => return TokenValidationResult::Invalid { reason: "malformed token".to_string() },
        };

        // Apply claims mapping: external claim value is copied under the
        // internal name, both remain present.
        for (external, internal) in &provider.claims_mapping {
            if let Some(value) = claims_map.get(external).cloned() {
                claims_map.insert(internal.clone(), value);
            }
        }

        TokenValidationResult::Valid {
            subject,
            issuer: provider.issuer.clone(),
            expires_at,
            claims: claims_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_token_yields_no_token() {
        let jwks = Arc::new(JwksCache::new(JwksCacheConfig::default()));
        let validator = OidcValidator::new(jwks);
        let provider = TokenProviderConfig {
            name: "default".into(),
            issuer: "https://issuer.example".into(),
            jwks_uri: "https://issuer.example/.well-known/jwks.json".into(),
            audiences: Default::default(),
            claims_mapping: Default::default(),
        };
        let result = validator.validate("   ", &provider).await;
        assert!(matches!(result, TokenValidationResult::NoToken));
    }

    #[tokio::test]
    async fn malformed_token_is_invalid_not_a_panic() {
        let jwks = Arc::new(JwksCache::new(JwksCacheConfig::default()));
        let validator = OidcValidator::new(jwks);
        let provider = TokenProviderConfig {
            name: "default".into(),
            issuer: "https://issuer.example".into(),
            jwks_uri: "https://issuer.example/.well-known/jwks.json".into(),
            audiences: Default::default(),
            claims_mapping: Default::default(),
        };
        let result = validator.validate("not-a-jwt", &provider).await;
        assert!(matches!(result, TokenValidationResult::Invalid { .. }));
    }
}
