//! `ManagementApi`: the admin-facing surface over `RouteRegistry` and
//! `PolicyEnforcer`. This is the layer `authz-gateway`'s admin handlers
//! call into, keeping the HTTP handlers thin over the logic they delegate
//! to.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::error::{AuthzError, AuthzResult};
use crate::policy::{GroupingRule, PolicyEnforcer, PolicyField, PolicyRule};
use crate::route_registry::{RouteMetadata, RouteRegistry};

pub struct ManagementApi {
    registry: Arc<RouteRegistry>,
    enforcer: Arc<PolicyEnforcer>,
    /// Roles explicitly declared via `create_role`, independent of whether
    /// any policy or grouping currently references them. Lets an admin
    /// scaffold a role before wiring up permissions.
    known_roles: RwLock<HashSet<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteImportReport {
    pub imported: usize,
    pub skipped_duplicates: Vec<String>,
}

impl ManagementApi {
    pub fn new(registry: Arc<RouteRegistry>, enforcer: Arc<PolicyEnforcer>) -> Self {
        Self {
            registry,
            enforcer,
            known_roles: RwLock::new(HashSet::new()),
        }
    }

    /// Atomically replaces the full route table. Used by deployment-time
    /// route generation tooling.
    pub fn save_routes(&self, routes: Vec<RouteMetadata>) -> AuthzResult<()> {
        self.registry.replace(routes)
    }

    /// Adds routes one at a time, tolerating duplicates by skipping them
    /// rather than aborting the whole import (unlike `register_many`, which
    /// stops at the first failure).
    pub fn import_routes(&self, routes: Vec<RouteMetadata>) -> AuthzResult<RouteImportReport> {
        let mut report = RouteImportReport::default();
        for route in routes {
            let key = format!("{} {}", route.method, route.path);
            match self.registry.register(route) {
                Ok(()) => report.imported += 1,
                Err(AuthzError::DuplicateRoute { .. }) => report.skipped_duplicates.push(key),
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Removes a single route by rebuilding the table without it. There is
    /// no targeted single-key delete on `RouteRegistry`, so this reads the
    /// current set and calls `replace`.
    pub fn delete_route(&self, method: crate::route_registry::Method, path: &str) -> AuthzResult<bool> {
        let all = self.registry.get_all();
        let remaining: Vec<RouteMetadata> = all
            .iter()
            .filter(|r| !(r.method == method && r.path == path))
            .map(|r| (**r).clone())
            .collect();
        let removed = remaining.len() != all.len();
        self.registry.replace(remaining)?;
        Ok(removed)
    }

    pub fn create_role(&self, role: &str) -> AuthzResult<()> {
        if role.trim().is_empty() {
            return Err(AuthzError::Validation("role name must not be empty".to_string()));
        }
        self.known_roles
            .write()
            .expect("known roles lock poisoned")
            .insert(role.to_string());
        Ok(())
    }

    /// Renames a role across `known_roles`, every policy rule, and every
    /// grouping rule (both as the assigned role and, transitively, as a
    /// subject if another grouping nests roles).
    pub fn update_role(&self, old_name: &str, new_name: &str) -> AuthzResult<()> {
        if new_name.trim().is_empty() {
            return Err(AuthzError::Validation("new role name must not be empty".to_string()));
        }
        {
            let mut roles = self.known_roles.write().expect("known roles lock poisoned");
            if roles.remove(old_name) {
                roles.insert(new_name.to_string());
            }
        }

        let policies: Vec<PolicyRule> = self
            .enforcer
            .get_policy()
            .into_iter()
            .map(|p| {
                if p.role == old_name {
                    PolicyRule { role: new_name.to_string(), ..p }
                } else {
                    p
                }
            })
            .collect();
        let groupings: Vec<GroupingRule> = self
            .enforcer
            .get_grouping_policy()
            .into_iter()
            .map(|g| {
                let role = if g.role == old_name { new_name.to_string() } else { g.role };
                let subject = if g.subject == old_name { new_name.to_string() } else { g.subject };
                GroupingRule { subject, role }
            })
            .collect();
        self.enforcer.reload(policies, groupings);
        Ok(())
    }

    /// Removes a role entirely: every policy naming it and every grouping
    /// assigning it are dropped, plus the `known_roles` entry.
    pub fn delete_role(&self, role: &str) -> AuthzResult<()> {
        self.known_roles
            .write()
            .expect("known roles lock poisoned")
            .remove(role);
        let policies: Vec<PolicyRule> = self
            .enforcer
            .get_policy()
            .into_iter()
            .filter(|p| p.role != role)
            .collect();
        let groupings: Vec<GroupingRule> = self
            .enforcer
            .get_grouping_policy()
            .into_iter()
            .filter(|g| g.role != role)
            .collect();
        self.enforcer.reload(policies, groupings);
        Ok(())
    }

    pub fn assign_role_to_user(&self, subject: &str, role: &str) -> bool {
        self.enforcer.add_grouping_policy(subject, role)
    }

    pub fn remove_role_from_user(&self, subject: &str, role: &str) -> bool {
        self.enforcer.remove_grouping_policy(subject, role)
    }

    pub fn get_users_for_role(&self, role: &str) -> Vec<String> {
        self.enforcer.get_users_for_role(role)
    }

    pub fn get_roles_for_user(&self, subject: &str) -> Vec<String> {
        self.enforcer.get_roles_for_user(subject)
    }

    pub fn get_role_permissions(&self, role: &str) -> Vec<PolicyRule> {
        self.enforcer.get_filtered_policy(PolicyField::Role, role)
    }

    pub fn known_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.known_roles.read().expect("known roles lock poisoned").iter().cloned().collect();
        roles.sort();
        roles
    }
}
