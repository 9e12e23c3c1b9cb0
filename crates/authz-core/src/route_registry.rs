//! In-memory map of `(METHOD, PATH) -> RouteMetadata` with exact and
//! pattern-normalized lookup.
//!
//! Reads never block writers and vice versa for longer than an `Arc` clone:
//! the backing map is copy-on-write, swapped atomically under a short write
//! lock.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, AuthzResult};
use crate::path_normalizer::normalize;

/// HTTP methods the registry understands. Lookups are case-insensitive on
/// the wire; this type normalizes at parse time so the map key is always
/// canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
        };
        f.write_str(s)
    }
}

impl FromStr for Method {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "HEAD" => Ok(Method::Head),
            other => Err(AuthzError::Validation(format!(
                "unsupported HTTP method: {other}"
            ))),
        }
    }
}

/// Per-role / default rate limit configuration attached to a route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRateLimit {
    pub default_rpm: u32,
    pub burst: u32,
    #[serde(default)]
    pub per_role_rpm: HashMap<String, u32>,
}

/// Value record describing one registered route. Owned exclusively by
/// `RouteRegistry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMetadata {
    pub path: String,
    pub method: Method,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub deprecated_reason: String,
    #[serde(default)]
    pub replaced_by: String,
    pub api_version: String,
    #[serde(default)]
    pub rate_limit: Option<RouteRateLimit>,
    #[serde(default)]
    pub audit_required: bool,
    #[serde(default)]
    pub ownership_check: bool,
    #[serde(default)]
    pub tags: HashSet<String>,
    /// Escape hatch named in the path-normalizer design note: disables
    /// segment rewriting for this route's lookups.
    #[serde(default)]
    pub disable_normalization: bool,
}

impl RouteMetadata {
    /// Validates the route's invariants:
    /// - `path` begins with `/`
    /// - `deprecated` implies a non-empty `replaced_by`
    /// - non-public routes carry at least one allowed role
    /// - `api_version` is non-empty
    pub fn validate(&self) -> AuthzResult<()> {
        if !self.path.starts_with('/') {
            return Err(AuthzError::Validation(format!(
                "route path must begin with '/': {}",
                self.path
            )));
        }
        if self.api_version.trim().is_empty() {
            return Err(AuthzError::Validation(
                "route api_version must be non-empty".to_string(),
            ));
        }
        if self.deprecated && self.replaced_by.trim().is_empty() {
            return Err(AuthzError::Validation(format!(
                "deprecated route {} {} requires replaced_by",
                self.method, self.path
            )));
        }
        if !self.is_public && self.allowed_roles.is_empty() {
            return Err(AuthzError::Validation(format!(
                "non-public route {} {} requires at least one allowed role",
                self.method, self.path
            )));
        }
        Ok(())
    }

    fn key(&self) -> (Method, String) {
        (self.method, self.path.clone())
    }

    pub fn normalized_path(&self) -> String {
        if self.disable_normalization {
            self.path.clone()
        } else {
            normalize(&self.path)
        }
    }
}

type RouteMap = HashMap<(Method, String), Arc<RouteMetadata>>;

#[derive(Default, Clone)]
struct Snapshot {
    routes: Arc<RouteMap>,
}

/// Owns every registered `RouteMetadata`. Concurrent reads are wait-free
/// relative to a snapshot; writes build a new map and swap the `Arc` under
/// a brief write lock.
pub struct RouteRegistry {
    state: RwLock<Snapshot>,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
        }
    }

    fn snapshot(&self) -> Snapshot {
        self.state.read().expect("route registry lock poisoned").clone()
    }

    /// Registers a single route. Fails with `AuthzError::DuplicateRoute` if
    /// `(method, path)` is already present.
    pub fn register(&self, metadata: RouteMetadata) -> AuthzResult<()> {
        metadata.validate()?;
        let mut guard = self.state.write().expect("route registry lock poisoned");
        if guard.routes.contains_key(&metadata.key()) {
            return Err(AuthzError::DuplicateRoute {
                method: metadata.method.to_string(),
                path: metadata.path.clone(),
            });
        }
        let mut next: RouteMap = (*guard.routes).clone();
        next.insert(metadata.key(), Arc::new(metadata));
        guard.routes = Arc::new(next);
        Ok(())
    }

    /// Best-effort batch register. On the first failure, the error is
    /// returned but routes registered earlier in the batch remain in the
    /// registry (the registry does not roll back prior successes).
    pub fn register_many(&self, routes: Vec<RouteMetadata>) -> AuthzResult<()> {
        for metadata in routes {
            self.register(metadata)?;
        }
        Ok(())
    }

    /// Looks up a route: exact `(method, path)` first, then the normalized
    /// path if normalization changes it.
    pub fn get(&self, path: &str, method: Method) -> Option<Arc<RouteMetadata>> {
        let snapshot = self.snapshot();
        if let Some(found) = snapshot.routes.get(&(method, path.to_string())) {
            return Some(found.clone());
        }
        let normalized = normalize(path);
        if normalized != path {
            if let Some(found) = snapshot.routes.get(&(method, normalized)) {
                return Some(found.clone());
            }
        }
        None
    }

    /// True if any registered route (any method) at exactly this path is
    /// public.
    pub fn check_if_public(&self, path: &str) -> bool {
        let snapshot = self.snapshot();
        snapshot
            .routes
            .values()
            .any(|m| m.is_public && m.path == path)
    }

    pub fn get_all(&self) -> Vec<Arc<RouteMetadata>> {
        let snapshot = self.snapshot();
        let mut all: Vec<_> = snapshot.routes.values().cloned().collect();
        all.sort_by(|a, b| (a.method.to_string(), &a.path).cmp(&(b.method.to_string(), &b.path)));
        all
    }

    pub fn get_by_tag(&self, tag: &str) -> Vec<Arc<RouteMetadata>> {
        self.filter(|m| m.tags.contains(tag))
    }

    pub fn get_by_role(&self, role: &str) -> Vec<Arc<RouteMetadata>> {
        self.filter(|m| m.allowed_roles.iter().any(|r| r == role))
    }

    pub fn get_by_api_version(&self, version: &str) -> Vec<Arc<RouteMetadata>> {
        self.filter(|m| m.api_version == version)
    }

    pub fn get_deprecated_routes(&self) -> Vec<Arc<RouteMetadata>> {
        self.filter(|m| m.deprecated)
    }

    fn filter(&self, predicate: impl Fn(&RouteMetadata) -> bool) -> Vec<Arc<RouteMetadata>> {
        let mut out: Vec<_> = self
            .get_all()
            .into_iter()
            .filter(|m| predicate(m))
            .collect();
        out.sort_by(|a, b| (a.method.to_string(), &a.path).cmp(&(b.method.to_string(), &b.path)));
        out
    }

    pub fn count(&self) -> usize {
        self.snapshot().routes.len()
    }

    pub fn clear(&self) {
        let mut guard = self.state.write().expect("route registry lock poisoned");
        guard.routes = Arc::new(HashMap::new());
    }

    /// Atomically swaps the backing map to `routes` after validating each
    /// entry and rejecting duplicate `(method, path)` pairs within the new
    /// set. On any error, the registry is left unchanged.
    pub fn replace(&self, routes: Vec<RouteMetadata>) -> AuthzResult<()> {
        let mut next: RouteMap = HashMap::with_capacity(routes.len());
        for metadata in routes {
            metadata.validate()?;
            let key = metadata.key();
            if next.contains_key(&key) {
                return Err(AuthzError::DuplicateRoute {
                    method: metadata.method.to_string(),
                    path: metadata.path.clone(),
                });
            }
            next.insert(key, Arc::new(metadata));
        }
        let mut guard = self.state.write().expect("route registry lock poisoned");
        guard.routes = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, method: Method, roles: &[&str]) -> RouteMetadata {
        RouteMetadata {
            path: path.to_string(),
            method,
            is_public: false,
            allowed_roles: roles.iter().map(|s| s.to_string()).collect(),
            deprecated: false,
            deprecated_reason: String::new(),
            replaced_by: String::new(),
            api_version: "v1".to_string(),
            rate_limit: None,
            audit_required: false,
            ownership_check: false,
            tags: HashSet::new(),
            disable_normalization: false,
        }
    }

    #[test]
    fn register_then_get_roundtrips() {
        let registry = RouteRegistry::new();
        let m = route("/api/v1/staff/profile", Method::Get, &["staff"]);
        registry.register(m.clone()).unwrap();
        let found = registry.get("/api/v1/staff/profile", Method::Get).unwrap();
        assert_eq!(found.path, m.path);
    }

    #[test]
    fn normalized_lookup_matches_pattern_route() {
        let registry = RouteRegistry::new();
        registry
            .register(route("/a/:id", Method::Get, &["staff"]))
            .unwrap();
        let found = registry.get("/a/123", Method::Get).unwrap();
        assert_eq!(found.path, "/a/:id");
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = RouteRegistry::new();
        registry
            .register(route("/a", Method::Get, &["staff"]))
            .unwrap();
        let err = registry
            .register(route("/a", Method::Get, &["staff"]))
            .unwrap_err();
        assert!(matches!(err, AuthzError::DuplicateRoute { .. }));
    }

    #[test]
    fn deprecated_without_replaced_by_is_rejected() {
        let mut m = route("/old", Method::Get, &["staff"]);
        m.deprecated = true;
        assert!(m.validate().is_err());
    }

    #[test]
    fn non_public_without_roles_is_rejected() {
        let m = route("/a", Method::Get, &[]);
        assert!(m.validate().is_err());
    }

    #[test]
    fn register_many_keeps_earlier_successes_on_failure() {
        let registry = RouteRegistry::new();
        let ok = route("/a", Method::Get, &["staff"]);
        let dup = route("/a", Method::Get, &["staff"]);
        let err = registry.register_many(vec![ok, dup]).unwrap_err();
        assert!(matches!(err, AuthzError::DuplicateRoute { .. }));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn replace_is_atomic_on_validation_failure() {
        let registry = RouteRegistry::new();
        registry
            .register(route("/a", Method::Get, &["staff"]))
            .unwrap();
        let bad = route("/a", Method::Get, &[]);
        let invalid = RouteMetadata {
            is_public: false,
            allowed_roles: vec![],
            ..bad
        };
        let err = registry.replace(vec![invalid]).unwrap_err();
        assert!(err.to_string().contains("allowed role"));
        // original state preserved
        assert_eq!(registry.count(), 1);
    }
}
