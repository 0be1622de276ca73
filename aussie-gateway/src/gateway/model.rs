//! Core data model shared by the gateway pipeline and its storage layer.
//!
//! These types mirror the entities of the request gateway: service
//! registrations, endpoints, signing keys, translation configs, roles,
//! sessions, lockouts, and revocation events. They are intentionally plain
//! data — behavior lives in the component modules (`registry`, `router`,
//! `signing_keys`, ...).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility tier of an [`EndpointConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    /// No authentication required.
    Public,
    /// Authenticated identity required; permission check against
    /// `requiredPermissions` or the service's permission policy.
    Protected,
    /// Admin or explicit internal-service permission required.
    Internal,
}

/// A route pattern within a service, with its visibility and permission
/// requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path pattern, e.g. `/users/{id}` or `/static/**`.
    pub pattern: String,
    /// HTTP methods this endpoint accepts.
    pub methods: HashSet<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub required_permissions: HashSet<String>,
}

impl EndpointConfig {
    pub fn new(pattern: impl Into<String>, methods: &[&str], visibility: Visibility) -> Self {
        Self {
            pattern: pattern.into(),
            methods: methods.iter().map(|m| m.to_uppercase()).collect(),
            visibility,
            required_permissions: HashSet::new(),
        }
    }

    pub fn with_permissions(mut self, perms: &[&str]) -> Self {
        self.required_permissions = perms.iter().map(|p| p.to_string()).collect();
        self
    }

    /// `PUBLIC` endpoints must not require permissions.
    pub fn is_valid(&self) -> bool {
        if self.visibility == Visibility::Public && !self.required_permissions.is_empty() {
            return false;
        }
        !self.pattern.is_empty()
    }
}

/// Per-service authorization policy: operation-kind -> allowed permissions.
/// Absent kind means admin-only (closed world), per
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub allowed: HashMap<String, HashSet<String>>,
}

impl PermissionPolicy {
    /// Returns the permissions allowed to perform `operation_kind`, or
    /// `None` if the kind is absent (admin-only).
    pub fn allowed_for(&self, operation_kind: &str) -> Option<&HashSet<String>> {
        self.allowed.get(operation_kind)
    }
}

/// A registered upstream target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_id: String,
    pub base_url: String,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub permission_policy: Option<PermissionPolicy>,
    pub version: u64,
    #[serde(default)]
    pub owner: Option<String>,
}

impl ServiceRegistration {
    pub fn new(service_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            base_url: base_url.into(),
            endpoints: Vec::new(),
            permission_policy: None,
            version: 1,
            owner: None,
        }
    }

    /// `baseUrl` must be an absolute URI.
    pub fn is_valid(&self) -> bool {
        (self.base_url.starts_with("http://") || self.base_url.starts_with("https://"))
            && self.endpoints.iter().all(EndpointConfig::is_valid)
    }
}

/// RSA signing key lifecycle state. PENDING -> ACTIVE -> DEPRECATED -> RETIRED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStatus {
    Pending,
    Active,
    Deprecated,
    Retired,
}

/// An RSA signing key pair under rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub key_id: String,
    pub public_key_pem: String,
    /// Absent for verify-only records distributed to peer instances.
    #[serde(default)]
    pub private_key_pem: Option<String>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

/// Trust anchor for an external OIDC issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenProviderConfig {
    pub name: String,
    pub issuer: String,
    pub jwks_uri: String,
    pub audiences: HashSet<String>,
    #[serde(default)]
    pub claims_mapping: HashMap<String, String>,
}

/// A claim-source type for token translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimSourceType {
    Array,
    String,
    SpaceDelimited,
    CommaDelimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSource {
    pub name: String,
    /// Dot-path claim address, e.g. `realm_access.roles`.
    pub claim: String,
    #[serde(rename = "type")]
    pub source_type: ClaimSourceType,
}

/// One transform operation applied in declared order to a raw claim value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum TransformOp {
    StripPrefix { value: String },
    Replace { from: String, to: String },
    Lowercase,
    Uppercase,
    Regex { pattern: String, replacement: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationMappings {
    /// role -> list of permissions
    #[serde(default)]
    pub role_to_permissions: HashMap<String, Vec<String>>,
    /// raw claim value -> permission
    #[serde(default)]
    pub direct_permissions: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationDefaults {
    #[serde(default)]
    pub deny_if_no_match: bool,
    #[serde(default)]
    pub include_unmapped: bool,
}

impl Default for TranslationDefaults {
    fn default() -> Self {
        Self {
            deny_if_no_match: false,
            include_unmapped: false,
        }
    }
}

/// Claims->role/permission mapping schema carried by a
/// [`TranslationConfigVersion`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationSchema {
    #[serde(default)]
    pub sources: Vec<ClaimSource>,
    #[serde(default)]
    pub transforms: HashMap<String, Vec<TransformOp>>,
    #[serde(default)]
    pub mappings: TranslationMappings,
    #[serde(default)]
    pub defaults: TranslationDefaults,
}

/// A versioned token-translation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfigVersion {
    pub id: String,
    pub version: u64,
    pub schema: TranslationSchema,
    pub active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A named bundle of permissions, expanded at authorization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub display_name: String,
    pub permissions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Same shape as [`Role`], keyed by external group membership.
pub type Group = Role;

/// A credential issued to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    /// Salted, non-reversible hash; plaintext is emitted only at creation.
    pub key_hash: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub permissions: HashSet<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl ApiKeyRecord {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }

    /// `id|name|description|permissions-csv|createdBy|createdAt|expiresAt|revoked`
    pub fn to_cache_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.name,
            self.description.clone().unwrap_or_default(),
            self.permissions.iter().cloned().collect::<Vec<_>>().join(","),
            self.created_by.clone().unwrap_or_default(),
            self.created_at.timestamp_millis(),
            self.expires_at.map(|e| e.timestamp_millis().to_string()).unwrap_or_default(),
            self.revoked,
        )
    }

    pub fn from_cache_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 8 {
            return None;
        }
        let created_at = DateTime::from_timestamp_millis(parts[5].parse().ok()?)?;
        let expires_at = if parts[6].is_empty() {
            None
        } else {
            Some(DateTime::from_timestamp_millis(parts[6].parse().ok()?)?)
        };
        Some(Self {
            id: parts[0].to_string(),
            name: parts[1].to_string(),
            description: if parts[2].is_empty() { None } else { Some(parts[2].to_string()) },
            permissions: parts[3].split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
            created_by: if parts[4].is_empty() { None } else { Some(parts[4].to_string()) },
            created_at,
            expires_at,
            revoked: parts[7].parse().unwrap_or(false),
            key_hash: String::new(),
        })
    }
}

/// An authenticated session, addressed by an opaque session ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
    pub permissions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// A short-lived PKCE challenge, keyed by `state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub state: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Failed-attempts record backing the lockout engine. See
/// `LockoutInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutInfo {
    pub key: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub lockout_count: u32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl LockoutInfo {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A fan-out record for the revocation engine's pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RevocationEvent {
    JtiRevoked {
        jti: String,
        expires_at: DateTime<Utc>,
    },
    UserRevoked {
        user_id: String,
        issued_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl RevocationEvent {
    /// `jti:<id>:<expiresAtMillis>` or
    /// `user:<id>:<issuedBeforeMillis>:<expiresAtMillis>`.
    pub fn to_wire_line(&self) -> String {
        match self {
            Self::JtiRevoked { jti, expires_at } => {
                format!("jti:{}:{}", jti, expires_at.timestamp_millis())
            }
            Self::UserRevoked { user_id, issued_before, expires_at } => format!(
                "user:{}:{}:{}",
                user_id,
                issued_before.timestamp_millis(),
                expires_at.timestamp_millis()
            ),
        }
    }

    pub fn from_wire_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(4, ':');
        match parts.next()? {
            "jti" => {
                let jti = parts.next()?.to_string();
                let expires_at = DateTime::from_timestamp_millis(parts.next()?.parse().ok()?)?;
                Some(Self::JtiRevoked { jti, expires_at })
            }
            "user" => {
                let user_id = parts.next()?.to_string();
                let issued_before = DateTime::from_timestamp_millis(parts.next()?.parse().ok()?)?;
                let expires_at = DateTime::from_timestamp_millis(parts.next()?.parse().ok()?)?;
                Some(Self::UserRevoked { user_id, issued_before, expires_at })
            }
            _ => None,
        }
    }
}

/// The authenticated principal of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Identity {
    pub fn has_any_permission(&self, required: &HashSet<String>) -> bool {
        required.is_empty() || required.iter().any(|p| self.permissions.contains(p))
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.contains("admin.all") || self.roles.contains("admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_endpoint_with_permissions_is_invalid() {
        let ep = EndpointConfig::new("/ping", &["GET"], Visibility::Public)
            .with_permissions(&["x.read"]);
        assert!(!ep.is_valid());
    }

    #[test]
    fn api_key_cache_line_round_trips() {
        let rec = ApiKeyRecord {
            id: "k1".into(),
            key_hash: "hash".into(),
            name: "ci".into(),
            description: Some("ci key".into()),
            permissions: ["a.read".to_string()].into_iter().collect(),
            created_by: Some("admin".into()),
            created_at: Utc::now(),
            expires_at: None,
            revoked: false,
        };
        let line = rec.to_cache_line();
        let parsed = ApiKeyRecord::from_cache_line(&line).unwrap();
        assert_eq!(parsed.id, rec.id);
        assert_eq!(parsed.permissions, rec.permissions);
        assert!(!parsed.revoked);
    }

    #[test]
    fn revocation_event_wire_format_round_trips() {
        let ev = RevocationEvent::JtiRevoked {
            jti: "abc".into(),
            expires_at: Utc::now(),
        };
        let line = ev.to_wire_line();
        assert!(line.starts_with("jti:abc:"));
        let parsed = RevocationEvent::from_wire_line(&line).unwrap();
        match parsed {
            RevocationEvent::JtiRevoked { jti, .. } => assert_eq!(jti, "abc"),
            _ => panic!("wrong variant"),
        }
    }
}
