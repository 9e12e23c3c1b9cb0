//! Cross-checks a `RouteRegistry` against a `PolicyEnforcer`'s policy table
//! and produces a `PolicyValidationReport`. Runs on startup and after every
//! admin-driven registry or policy mutation; the report is logged, never
//! fatal.

use std::collections::HashSet;

use crate::policy::enforcer::PolicyRule;
use crate::route_registry::RouteRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPolicyError {
    pub role: String,
    pub resource: String,
    pub method: String,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryStats {
    pub total_policies: usize,
    pub unique_roles: usize,
    pub unique_resources: usize,
    pub registered_routes: usize,
    pub covered_routes: usize,
    pub coverage_percentage: f64,
    pub deprecated_count: usize,
    pub public_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyValidationReport {
    pub errors: Vec<MissingPolicyError>,
    pub warnings: Vec<String>,
    pub dead_policies: Vec<PolicyRule>,
    pub unregistered_routes: Vec<String>,
    pub policy_conflicts: Vec<String>,
    pub stats: SummaryStats,
}

impl PolicyValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Produces a validation report for the current registry/policy pairing.
/// Pure function: takes a snapshot of both inputs and never mutates either.
pub fn validate(registry: &RouteRegistry, policies: &[PolicyRule]) -> PolicyValidationReport {
    let routes = registry.get_all();
    let non_public: Vec<_> = routes.iter().filter(|r| !r.is_public).collect();

    let mut allowed_roles: HashSet<&str> = HashSet::new();
    for r in &routes {
        for role in &r.allowed_roles {
            allowed_roles.insert(role.as_str());
        }
    }

    let mut errors = Vec::new();
    let mut covered_routes = 0usize;

    for route in &non_public {
        let resource = route.normalized_path();
        let method = route.method.to_string();
        let mut all_roles_covered = true;

        for role in &route.allowed_roles {
            let has_match = policies.iter().any(|p| {
                p.role == *role && p.resource == resource && p.action.eq_ignore_ascii_case(&method)
            });
            if !has_match {
                all_roles_covered = false;
                errors.push(MissingPolicyError {
                    role: role.clone(),
                    resource: resource.clone(),
                    method: method.clone(),
                });
            }
        }

        if all_roles_covered {
            covered_routes += 1;
        }
    }

    let mut warnings = Vec::new();

    // Duplicate policies.
    let mut seen: HashSet<&PolicyRule> = HashSet::new();
    for p in policies {
        if !seen.insert(p) {
            warnings.push(format!(
                "duplicate policy: role={} resource={} action={}",
                p.role, p.resource, p.action
            ));
        }
    }

    // Policy rules whose role is not allowed on any route.
    for p in policies {
        if !allowed_roles.contains(p.role.as_str()) {
            warnings.push(format!(
                "policy role '{}' is not an allowed_role of any registered route (resource={})",
                p.role, p.resource
            ));
        }
    }

    // Overlapping path patterns: one pattern is a proper prefix of another.
    let mut distinct_resources: Vec<&str> = policies
        .iter()
        .map(|p| p.resource.as_str())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    distinct_resources.sort_unstable();
    let mut policy_conflicts = Vec::new();
    for i in 0..distinct_resources.len() {
        for j in 0..distinct_resources.len() {
            if i == j {
                continue;
            }
            if is_proper_prefix(distinct_resources[i], distinct_resources[j]) {
                policy_conflicts.push(format!(
                    "overlapping path patterns: '{}' is a proper prefix of '{}'",
                    distinct_resources[i], distinct_resources[j]
                ));
            }
        }
    }

    // Dead policies: rule's resource has no corresponding registered route
    // (exact or normalized) for its method.
    let mut dead_policies = Vec::new();
    let mut unregistered_routes: Vec<String> = Vec::new();
    for p in policies {
        let has_route = routes.iter().any(|r| {
            (r.path == p.resource || r.normalized_path() == p.resource)
                && r.method.to_string().eq_ignore_ascii_case(&p.action)
        });
        if !has_route {
            dead_policies.push(p.clone());
            if !unregistered_routes.contains(&p.resource) {
                unregistered_routes.push(p.resource.clone());
            }
        }
    }

    let total_non_public = non_public.len();
    let coverage_percentage = if total_non_public == 0 {
        0.0
    } else {
        (covered_routes as f64 / total_non_public as f64) * 100.0
    };

    let unique_roles: HashSet<&str> = policies.iter().map(|p| p.role.as_str()).collect();
    let unique_resources: HashSet<&str> = policies.iter().map(|p| p.resource.as_str()).collect();

    let stats = SummaryStats {
        total_policies: policies.len(),
        unique_roles: unique_roles.len(),
        unique_resources: unique_resources.len(),
        registered_routes: routes.len(),
        covered_routes,
        coverage_percentage,
        deprecated_count: routes.iter().filter(|r| r.deprecated).count(),
        public_count: routes.iter().filter(|r| r.is_public).count(),
    };

    PolicyValidationReport {
        errors,
        warnings,
        dead_policies,
        unregistered_routes,
        policy_conflicts,
        stats,
    }
}

fn is_proper_prefix(candidate: &str, other: &str) -> bool {
    if candidate == other {
        return false;
    }
    let a: Vec<&str> = candidate.split('/').collect();
    let b: Vec<&str> = other.split('/').collect();
    if a.len() >= b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_registry::{Method, RouteMetadata};
    use std::collections::HashSet as StdHashSet;

    fn public_route(path: &str) -> RouteMetadata {
        RouteMetadata {
            path: path.to_string(),
            method: Method::Get,
            is_public: true,
            allowed_roles: vec![],
            deprecated: false,
            deprecated_reason: String::new(),
            replaced_by: String::new(),
            api_version: "v1".to_string(),
            rate_limit: None,
            audit_required: false,
            ownership_check: false,
            tags: StdHashSet::new(),
            disable_normalization: false,
        }
    }

    fn private_route(path: &str, roles: &[&str]) -> RouteMetadata {
        RouteMetadata {
            is_public: false,
            allowed_roles: roles.iter().map(|s| s.to_string()).collect(),
            ..public_route(path)
        }
    }

    #[test]
    fn missing_policy_is_reported_as_error() {
        let registry = RouteRegistry::new();
        registry.register(private_route("/docs", &["reader"])).unwrap();
        let report = validate(&registry, &[]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.stats.coverage_percentage, 0.0);
    }

    #[test]
    fn fully_covered_route_has_full_coverage() {
        let registry = RouteRegistry::new();
        registry.register(private_route("/docs", &["reader"])).unwrap();
        let policies = vec![PolicyRule {
            role: "reader".to_string(),
            resource: "/docs".to_string(),
            action: "GET".to_string(),
        }];
        let report = validate(&registry, &policies);
        assert!(report.errors.is_empty());
        assert_eq!(report.stats.coverage_percentage, 100.0);
    }

    #[test]
    fn dead_policy_has_no_route() {
        let registry = RouteRegistry::new();
        let policies = vec![PolicyRule {
            role: "reader".to_string(),
            resource: "/nowhere".to_string(),
            action: "GET".to_string(),
        }];
        let report = validate(&registry, &policies);
        assert_eq!(report.dead_policies.len(), 1);
        assert_eq!(report.unregistered_routes, vec!["/nowhere".to_string()]);
    }

    #[test]
    fn policy_role_outside_allowed_roles_warns() {
        let registry = RouteRegistry::new();
        registry.register(private_route("/docs", &["reader"])).unwrap();
        let policies = vec![PolicyRule {
            role: "ghost".to_string(),
            resource: "/docs".to_string(),
            action: "GET".to_string(),
        }];
        let report = validate(&registry, &policies);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("is not an allowed_role")));
    }

    #[test]
    fn overlapping_prefix_patterns_are_flagged() {
        let registry = RouteRegistry::new();
        let policies = vec![
            PolicyRule {
                role: "reader".to_string(),
                resource: "/a".to_string(),
                action: "GET".to_string(),
            },
            PolicyRule {
                role: "reader".to_string(),
                resource: "/a/b".to_string(),
                action: "GET".to_string(),
            },
        ];
        let report = validate(&registry, &policies);
        assert_eq!(report.policy_conflicts.len(), 1);
    }

    #[test]
    fn empty_registry_has_zero_coverage_not_nan() {
        let registry = RouteRegistry::new();
        let report = validate(&registry, &[]);
        assert_eq!(report.stats.coverage_percentage, 0.0);
    }
}
