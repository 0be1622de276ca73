//! Authorization engine.10 step 7.
//!
//! `PUBLIC` endpoints never reach this check. `PROTECTED` endpoints
//! require the caller to hold at least one of the endpoint's
//! `requiredPermissions` (or, if that set is empty, just to be
//! authenticated). `INTERNAL` endpoints require admin or a permission the
//! service's [`PermissionPolicy`] explicitly grants for the matched
//! operation kind; an operation kind absent from the policy is
//! admin-only by design (closed world).

use super::model::{EndpointConfig, Identity, PermissionPolicy, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzDecision {
    Allow,
    Deny,
}

/// Checks `identity` (which may be absent for `PUBLIC` endpoints) against
/// `endpoint`'s visibility tier and, for `INTERNAL` endpoints, `policy`.
/// `operation_kind` names the action being attempted (e.g. `"read"`,
/// `"write"`, `"admin"`) and is only consulted for `INTERNAL` endpoints.
pub fn authorize(
    endpoint: &EndpointConfig,
    identity: Option<&Identity>,
    policy: Option<&PermissionPolicy>,
    operation_kind: &str,
) -> AuthzDecision {
    match endpoint.visibility {
        Visibility::Public => AuthzDecision::Allow,
        Visibility::Protected => {
            let Some(identity) = identity else { return AuthzDecision::Deny };
            if endpoint.required_permissions.is_empty() {
                AuthzDecision::Allow
            } else if identity.has_any_permission(&endpoint.required_permissions) {
                AuthzDecision::Allow
            } else {
                AuthzDecision::Deny
            }
        }
        Visibility::Internal => {
            let Some(identity) = identity else { return AuthzDecision::Deny };
            if identity.is_admin() {
                return AuthzDecision::Allow;
            }
            let Some(policy) = policy else { return AuthzDecision::Deny };
            match policy.allowed_for(operation_kind) {
                // Operation kind absent from the policy: closed world, admin-only.
                None => AuthzDecision::Deny,
                Some(allowed) => {
                    if allowed.iter().any(|p| identity.permissions.contains(p)) {
                        AuthzDecision::Allow
                    } else {
                        AuthzDecision::Deny
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn identity(permissions: &[&str]) -> Identity {
        Identity {
            subject: "u1".to_string(),
            roles: HashSet::new(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            expires_at: None,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn public_endpoint_allows_without_identity() {
        let ep = EndpointConfig::new("/ping", &["GET"], Visibility::Public);
        assert_eq!(authorize(&ep, None, None, "read"), AuthzDecision::Allow);
    }

    #[test]
    fn protected_endpoint_requires_identity() {
        let ep = EndpointConfig::new("/me", &["GET"], Visibility::Protected);
        assert_eq!(authorize(&ep, None, None, "read"), AuthzDecision::Deny);
        assert_eq!(authorize(&ep, Some(&identity(&[])), None, "read"), AuthzDecision::Allow);
    }

    #[test]
    fn protected_endpoint_requires_matching_permission() {
        let ep = EndpointConfig::new("/orders", &["GET"], Visibility::Protected).with_permissions(&["orders.read"]);
        assert_eq!(authorize(&ep, Some(&identity(&["orders.write"])), None, "read"), AuthzDecision::Deny);
        assert_eq!(authorize(&ep, Some(&identity(&["orders.read"])), None, "read"), AuthzDecision::Allow);
    }

    #[test]
    fn internal_endpoint_allows_admin_regardless_of_policy() {
        let ep = EndpointConfig::new("/internal/sync", &["POST"], Visibility::Internal);
        let admin = identity(&["admin.all"]);
        assert_eq!(authorize(&ep, Some(&admin), None, "write"), AuthzDecision::Allow);
    }

    #[test]
    fn internal_endpoint_without_policy_entry_for_kind_is_admin_only() {
        let ep = EndpointConfig::new("/internal/sync", &["POST"], Visibility::Internal);
        let mut policy = PermissionPolicy::default();
        policy.allowed.insert("read".to_string(), ["sync.read".to_string()].into_iter().collect());
        let caller = identity(&["sync.read"]);
        // Policy only defines "read"; this call is "write", which is absent -> deny.
        assert_eq!(authorize(&ep, Some(&caller), Some(&policy), "write"), AuthzDecision::Deny);
        assert_eq!(authorize(&ep, Some(&caller), Some(&policy), "read"), AuthzDecision::Allow);
    }
}
