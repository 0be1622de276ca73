//! Route resolution: given a request path, find the service and endpoint
//! pattern it targets.
//!
//! Matching precedence within a single service's endpoint list: a literal
//! segment always beats a `{var}` binding at the same position, which
//! always beats a trailing `**` catch-all. Reserved first path segments
//! (`admin`, `gateway`, `q`) never reach the router at all — they are
//! dispatched to the gateway's own handlers before any service lookup.

use std::collections::HashMap;

use super::model::{EndpointConfig, ServiceRegistration};

/// A successfully resolved route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub service_id: String,
    pub base_url: String,
    pub endpoint: EndpointConfig,
    /// The portion of the incoming path that should be forwarded upstream,
    /// i.e. the path with the service's mount prefix stripped.
    pub target_path: String,
    /// `{var}` bindings captured while matching, keyed by variable name.
    pub path_variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    CatchAll,
    Variable,
    Literal,
}

/// Compiled match table over every registered service's endpoints.
/// Rebuilt whenever the registry's snapshot changes.
#[derive(Default)]
pub struct Router {
    services: Vec<ServiceRegistration>,
}

impl Router {
    pub fn new(services: Vec<ServiceRegistration>) -> Self {
        Self { services }
    }

    /// First path segment that must never be routed to a service —
    /// the gateway owns these entirely.
    pub fn is_reserved(path: &str) -> bool {
        matches!(first_segment(path), Some("admin") | Some("gateway") | Some("q"))
    }

    /// Resolves `path`/`method` against every registered service. Within a
    /// service, endpoints are ranked literal > variable > catch-all and the
    /// most specific match wins; across services the first service whose
    /// endpoint list has any match wins (service registrations are not
    /// expected to overlap in practice).
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch> {
        if Self::is_reserved(path) {
            return None;
        }
        let method = method.to_uppercase();
        let request_segments: Vec<&str> = split_segments(path);

        let mut best: Option<(Specificity, &ServiceRegistration, &EndpointConfig, HashMap<String, String>)> = None;

        for service in &self.services {
            for endpoint in &service.endpoints {
                if !endpoint.methods.contains(&method) {
                    continue;
                }
                let Some((specificity, vars)) = match_pattern(&endpoint.pattern, &request_segments) else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some((current_specificity, ..)) => specificity > *current_specificity,
                };
                if better {
                    best = Some((specificity, service, endpoint, vars));
                }
            }
        }

        best.map(|(_, service, endpoint, path_variables)| RouteMatch {
            service_id: service.service_id.clone(),
            base_url: service.base_url.clone(),
            endpoint: endpoint.clone(),
            target_path: strip_mount_prefix(path),
            path_variables,
        })
    }
}

/// Strips the leading `/{serviceId}` mount-prefix segment, leaving the
/// remainder of the path (always `/`-rooted) to forward upstream.
/// `/foo/anything` becomes `/anything`; `/foo` becomes `/`.
fn strip_mount_prefix(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    match trimmed.find('/') {
        Some(idx) => trimmed[idx..].to_string(),
        None => "/".to_string(),
    }
}

fn first_segment(path: &str) -> Option<&str> {
    split_segments(path).into_iter().next()
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Matches `request_segments` against a pattern like `/users/{id}/posts/**`.
/// Returns the match's specificity (for ranking against other candidate
/// patterns) and any captured `{var}` bindings.
fn match_pattern(pattern: &str, request_segments: &[&str]) -> Option<(Specificity, HashMap<String, String>)> {
    let pattern_segments = split_segments(pattern);
    let mut vars = HashMap::new();
    let mut worst_specificity = Specificity::Literal;

    let mut pi = 0;
    let mut ri = 0;
    while pi < pattern_segments.len() {
        let pseg = pattern_segments[pi];
        if pseg == "**" {
            // Catch-all must be the final pattern segment and consumes the
            // remaining request path, possibly including zero segments.
            if pi != pattern_segments.len() - 1 {
                return None;
            }
            worst_specificity = Specificity::CatchAll;
            return Some((worst_specificity, vars));
        }
        let rseg = request_segments.get(ri)?;
        if let Some(var_name) = pseg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            vars.insert(var_name.to_string(), (*rseg).to_string());
            if worst_specificity == Specificity::Literal {
                worst_specificity = Specificity::Variable;
            }
        } else if pseg == *rseg {
            // literal match, no specificity downgrade
        } else {
            return None;
        }
        pi += 1;
        ri += 1;
    }

    if ri != request_segments.len() {
        return None;
    }
    Some((worst_specificity, vars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::model::Visibility;

    fn service(id: &str, patterns: &[(&str, &[&str])]) -> ServiceRegistration {
        let mut reg = ServiceRegistration::new(id, "http://upstream.internal");
        for (pattern, methods) in patterns {
            reg.endpoints.push(EndpointConfig::new(*pattern, methods, Visibility::Public));
        }
        reg
    }

    #[test]
    fn reserved_paths_never_match() {
        let router = Router::new(vec![service("svc", &[("/admin/**", &["GET"])])]);
        assert!(router.resolve("GET", "/admin/services").is_none());
    }

    #[test]
    fn literal_beats_variable_beats_catch_all() {
        let router = Router::new(vec![service(
            "users",
            &[("/users/**", &["GET"]), ("/users/{id}", &["GET"]), ("/users/me", &["GET"])],
        )]);

        let m = router.resolve("GET", "/users/me").unwrap();
        assert_eq!(m.endpoint.pattern, "/users/me");

        let m = router.resolve("GET", "/users/42").unwrap();
        assert_eq!(m.endpoint.pattern, "/users/{id}");
        assert_eq!(m.path_variables.get("id"), Some(&"42".to_string()));

        let m = router.resolve("GET", "/users/42/posts").unwrap();
        assert_eq!(m.endpoint.pattern, "/users/**");
    }

    #[test]
    fn target_path_strips_service_mount_prefix() {
        let router = Router::new(vec![service("foo", &[("/foo/**", &["GET"])])]);
        let m = router.resolve("GET", "/foo/anything").unwrap();
        assert_eq!(m.target_path, "/anything");

        let m = router.resolve("GET", "/foo").unwrap();
        assert_eq!(m.target_path, "/");
    }

    #[test]
    fn method_mismatch_does_not_match() {
        let router = Router::new(vec![service("users", &[("/users", &["GET"])])]);
        assert!(router.resolve("POST", "/users").is_none());
    }

    #[test]
    fn no_match_returns_none() {
        let router = Router::new(vec![service("users", &[("/users", &["GET"])])]);
        assert!(router.resolve("GET", "/unknown").is_none());
    }
}
