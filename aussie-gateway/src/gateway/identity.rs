//! Identity resolution.
//!
//! Credentials are checked in a fixed order — API key, then bearer JWT,
//! then session cookie — and the first one present wins; if it is
//! invalid the request is rejected rather than falling through to the
//! next mechanism (a stale session cookie should not mask a caller who
//! is clearly presenting a bad API key).

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

use super::jwks::{OidcValidator, TokenValidationResult};
use super::model::{Identity, TokenProviderConfig};
use super::revocation::RevocationEngine;
use super::storage::{ApiKeyRepository, SessionRepository};
use super::translation::TranslationEngine;

/// Bytes of lookup prefix taken from the full hex-encoded key hash, kept
/// short enough to keep buckets small but long enough (64 bits) that
/// prefix collisions are rare.
const LOOKUP_PREFIX_LEN: usize = 16;

/// Derives a 32-byte keyed-hash key from whatever pepper string operators
/// configured, so any non-empty secret works regardless of its encoding.
pub fn derive_pepper(pepper: &str) -> [u8; 32] {
    *blake3::hash(pepper.as_bytes()).as_bytes()
}

/// Deterministic, non-reversible hash of a raw API key. Using a keyed
/// hash (rather than a randomly salted one like argon2) is what makes
/// `ApiKeyRepository::find_by_hash_lookup` an O(1)-ish bucket lookup
/// instead of a full-table scan.
pub fn hash_api_key(pepper: &[u8; 32], raw_key: &str) -> String {
    blake3::keyed_hash(pepper, raw_key.as_bytes()).to_hex().to_string()
}

fn lookup_prefix(full_hash: &str) -> &str {
    &full_hash[..full_hash.len().min(LOOKUP_PREFIX_LEN)]
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extracts the `iss` claim from a JWT without verifying its signature,
/// purely to select which configured [`TokenProviderConfig`] to validate
/// against. The real signature/claims check happens in
/// [`OidcValidator::validate`] immediately after, so a forged issuer here
/// only ever causes the wrong provider (and hence a failed verification)
/// to be picked, never an unchecked token.
fn peek_issuer(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("iss").and_then(|v| v.as_str()).map(String::from)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

pub struct IdentityResolver {
    api_keys: Arc<dyn ApiKeyRepository>,
    sessions: Arc<dyn SessionRepository>,
    oidc: Arc<OidcValidator>,
    translation: Arc<TranslationEngine>,
    revocation: Arc<RevocationEngine>,
    providers: Vec<TokenProviderConfig>,
    pepper: [u8; 32],
}

impl IdentityResolver {
    pub fn new(
        api_keys: Arc<dyn ApiKeyRepository>,
        sessions: Arc<dyn SessionRepository>,
        oidc: Arc<OidcValidator>,
        translation: Arc<TranslationEngine>,
        revocation: Arc<RevocationEngine>,
        providers: Vec<TokenProviderConfig>,
        pepper: [u8; 32],
    ) -> Self {
        Self { api_keys, sessions, oidc, translation, revocation, providers, pepper }
    }

    /// Resolves the caller's identity from whichever credential is
    /// present. `Ok(None)` means no credential was presented at all —
    /// callers decide whether the matched endpoint allows that.
    pub async fn resolve(
        &self,
        api_key: Option<&str>,
        bearer_token: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Option<Identity>> {
        if let Some(raw) = non_empty(api_key) {
            return self.resolve_api_key(raw).await.map(Some);
        }
        if let Some(token) = non_empty(bearer_token) {
            return self.resolve_bearer(token).await.map(Some);
        }
        if let Some(sid) = non_empty(session_id) {
            return self.resolve_session(sid).await.map(Some);
        }
        Ok(None)
    }

    async fn resolve_api_key(&self, raw_key: &str) -> Result<Identity> {
        let full_hash = hash_api_key(&self.pepper, raw_key);
        let candidates = self.api_keys.find_by_hash_lookup(lookup_prefix(&full_hash)).await?;
        let now = Utc::now();
        let matched = candidates
            .into_iter()
            .find(|record| constant_time_eq(&record.key_hash, &full_hash) && record.is_valid(now));

        match matched {
            Some(record) => Ok(Identity {
                subject: record.id,
                roles: Default::default(),
                permissions: record.permissions,
                expires_at: record.expires_at,
                attributes: HashMap::new(),
            }),
            None => Err(Error::Unauthorized("invalid API key".to_string())),
        }
    }

    async fn resolve_bearer(&self, token: &str) -> Result<Identity> {
        let issuer = peek_issuer(token).ok_or_else(|| Error::Unauthorized("malformed bearer token".to_string()))?;
        let provider = self
            .providers
            .iter()
            .find(|p| p.issuer == issuer)
            .ok_or_else(|| Error::Unauthorized("unknown token issuer".to_string()))?;

        match self.oidc.validate(token, provider).await {
            TokenValidationResult::NoToken => Err(Error::Unauthorized("missing bearer token".to_string())),
            TokenValidationResult::Invalid { reason } => Err(Error::Unauthorized(reason)),
            TokenValidationResult::Valid { subject, issuer, expires_at, claims } => {
                self.check_not_revoked(&subject, &claims, expires_at).await?;
                let translation = self.translation.translate(&issuer, &subject, &claims).await?;
                Ok(Identity {
                    subject,
                    roles: translation.roles,
                    permissions: translation.permissions,
                    expires_at: Some(expires_at),
                    attributes: translation.attributes,
                })
            }
        }
    }

    async fn check_not_revoked(
        &self,
        subject: &str,
        claims: &HashMap<String, serde_json::Value>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let jti = claims.get("jti").and_then(|v| v.as_str()).unwrap_or_default();
        let issued_at = claims
            .get("iat")
            .and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        if self.revocation.is_revoked(jti, Some(subject), issued_at, expires_at).await? {
            return Err(Error::Unauthorized("token has been revoked".to_string()));
        }
        Ok(())
    }

    async fn resolve_session(&self, session_id: &str) -> Result<Identity> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("unknown session".to_string()))?;

        if let Some(expires_at) = session.expires_at {
            if expires_at <= Utc::now() {
                return Err(Error::Unauthorized("session expired".to_string()));
            }
        }
        self.sessions.touch(session_id, Utc::now()).await?;

        Ok(Identity {
            subject: session.user_id,
            roles: Default::default(),
            permissions: session.permissions,
            expires_at: session.expires_at,
            attributes: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pepper_derivation_is_deterministic() {
        assert_eq!(derive_pepper("secret"), derive_pepper("secret"));
        assert_ne!(derive_pepper("secret"), derive_pepper("other"));
    }

    #[test]
    fn hashing_the_same_key_twice_is_stable() {
        let pepper = derive_pepper("pepper");
        assert_eq!(hash_api_key(&pepper, "key-123"), hash_api_key(&pepper, "key-123"));
        assert_ne!(hash_api_key(&pepper, "key-123"), hash_api_key(&pepper, "key-456"));
    }

    #[test]
    fn constant_time_eq_matches_regular_equality() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn lookup_prefix_is_bounded_and_stable() {
        let pepper = derive_pepper("pepper");
        let hash = hash_api_key(&pepper, "key-123");
        assert_eq!(lookup_prefix(&hash).len(), LOOKUP_PREFIX_LEN);
        assert!(hash.starts_with(lookup_prefix(&hash)));
    }
}
