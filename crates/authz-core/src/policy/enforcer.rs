//! Stores policy rules `(role, resource_pattern, action)` and grouping
//! rules `(subject, role)`; answers `allow?(subject, resource, action)`
//! with transitive role resolution.
//!
//! The enforcer is hand-rolled rather than delegated to the `casbin` crate:
//! the decision algorithm (hashed role index, memoized BFS closure,
//! immutable snapshot swapped under a write lock) is the engineering this
//! crate is meant to own. The on-disk format stays casbin-file-compatible
//! (`p,`/`g,` CSV lines) so the policy file can still be inspected with
//! casbin tooling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use tracing::error;

use crate::error::{AuthzError, AuthzResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyRule {
    pub role: String,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingRule {
    pub subject: String,
    pub role: String,
}

/// Index slot for `get_filtered_policy`, mirroring casbin's
/// `GetFilteredPolicy` convention (0=role, 1=resource, 2=action).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyField {
    Role = 0,
    Resource = 1,
    Action = 2,
}

#[derive(Default)]
struct PolicyState {
    policies: Vec<PolicyRule>,
    groupings: Vec<GroupingRule>,
    /// subject -> direct roles, built from `groupings` for O(1) BFS steps.
    direct_roles: HashMap<String, Vec<String>>,
    /// role -> rule indices, the hashed index `enforce` probes first.
    by_role: HashMap<String, Vec<usize>>,
}

impl PolicyState {
    fn rebuild_indices(&mut self) {
        self.direct_roles.clear();
        for g in &self.groupings {
            self.direct_roles
                .entry(g.subject.clone())
                .or_default()
                .push(g.role.clone());
        }
        self.by_role.clear();
        for (i, p) in self.policies.iter().enumerate() {
            self.by_role.entry(p.role.clone()).or_default().push(i);
        }
    }

    fn from_rules(policies: Vec<PolicyRule>, groupings: Vec<GroupingRule>) -> Self {
        let mut state = Self {
            policies,
            groupings,
            direct_roles: HashMap::new(),
            by_role: HashMap::new(),
        };
        state.rebuild_indices();
        state
    }
}

/// Answers `Enforce(subject, resource, action)` over role-hierarchy-aware
/// policy rules. Readers observe an immutable snapshot; writers build a new
/// snapshot and swap it in under a short write lock.
pub struct PolicyEnforcer {
    state: RwLock<Arc<PolicyState>>,
    /// Memoized transitive-role closures, keyed by subject. Invalidated
    /// wholesale whenever the snapshot changes.
    closure_cache: Mutex<HashMap<String, Arc<HashSet<String>>>>,
}

impl Default for PolicyEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEnforcer {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(PolicyState::default())),
            closure_cache: Mutex::new(HashMap::new()),
        }
    }

    fn snapshot(&self) -> Arc<PolicyState> {
        self.state.read().expect("enforcer lock poisoned").clone()
    }

    fn swap(&self, next: PolicyState) {
        let mut guard = self.state.write().expect("enforcer lock poisoned");
        *guard = Arc::new(next);
        drop(guard);
        self.closure_cache
            .lock()
            .expect("enforcer cache lock poisoned")
            .clear();
    }

    /// Transitive closure of roles reachable from `subject` via grouping
    /// rules (breadth-first, memoized per snapshot).
    fn roles_closure(&self, subject: &str) -> Arc<HashSet<String>> {
        if let Some(cached) = self
            .closure_cache
            .lock()
            .expect("enforcer cache lock poisoned")
            .get(subject)
        {
            return cached.clone();
        }

        let snapshot = self.snapshot();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = snapshot
            .direct_roles
            .get(subject)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();

        while let Some(role) = queue.pop_front() {
            if visited.insert(role.clone()) {
                if let Some(next_roles) = snapshot.direct_roles.get(&role) {
                    for r in next_roles {
                        if !visited.contains(r) {
                            queue.push_back(r.clone());
                        }
                    }
                }
            }
        }

        let result = Arc::new(visited);
        self.closure_cache
            .lock()
            .expect("enforcer cache lock poisoned")
            .insert(subject.to_string(), result.clone());
        result
    }

    /// `O(roles(subject) * rules-per-role)` thanks to the role-hashed index.
    /// Never panics: structural errors are logged and treated as deny.
    pub fn enforce(&self, subject: &str, resource: &str, action: &str) -> bool {
        let roles = self.roles_closure(subject);
        let snapshot = self.snapshot();
        for role in roles.iter() {
            let Some(indices) = snapshot.by_role.get(role) else {
                continue;
            };
            for &i in indices {
                let Some(rule) = snapshot.policies.get(i) else {
                    error!(subject, resource, action, "policy index out of bounds");
                    return false;
                };
                if rule.resource == resource && rule.action.eq_ignore_ascii_case(action) {
                    return true;
                }
            }
        }
        false
    }

    /// Adds a policy rule. No-op (`false`) if it already exists.
    pub fn add_policy(&self, role: &str, resource: &str, action: &str) -> bool {
        let snapshot = self.snapshot();
        let rule = PolicyRule {
            role: role.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        };
        if snapshot.policies.contains(&rule) {
            return false;
        }
        let mut policies = snapshot.policies.clone();
        policies.push(rule);
        self.swap(PolicyState::from_rules(policies, snapshot.groupings.clone()));
        true
    }

    pub fn remove_policy(&self, role: &str, resource: &str, action: &str) -> bool {
        let snapshot = self.snapshot();
        let rule = PolicyRule {
            role: role.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        };
        if !snapshot.policies.contains(&rule) {
            return false;
        }
        let policies: Vec<_> = snapshot
            .policies
            .iter()
            .filter(|p| **p != rule)
            .cloned()
            .collect();
        self.swap(PolicyState::from_rules(policies, snapshot.groupings.clone()));
        true
    }

    pub fn add_grouping_policy(&self, subject: &str, role: &str) -> bool {
        let snapshot = self.snapshot();
        let rule = GroupingRule {
            subject: subject.to_string(),
            role: role.to_string(),
        };
        if snapshot.groupings.contains(&rule) {
            return false;
        }
        let mut groupings = snapshot.groupings.clone();
        groupings.push(rule);
        self.swap(PolicyState::from_rules(snapshot.policies.clone(), groupings));
        true
    }

    pub fn remove_grouping_policy(&self, subject: &str, role: &str) -> bool {
        let snapshot = self.snapshot();
        let rule = GroupingRule {
            subject: subject.to_string(),
            role: role.to_string(),
        };
        if !snapshot.groupings.contains(&rule) {
            return false;
        }
        let groupings: Vec<_> = snapshot
            .groupings
            .iter()
            .filter(|g| **g != rule)
            .cloned()
            .collect();
        self.swap(PolicyState::from_rules(snapshot.policies.clone(), groupings));
        true
    }

    /// Direct (non-transitive) roles assigned to `subject`.
    pub fn get_roles_for_user(&self, subject: &str) -> Vec<String> {
        self.snapshot()
            .direct_roles
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Direct (non-transitive) subjects assigned `role`.
    pub fn get_users_for_role(&self, role: &str) -> Vec<String> {
        self.snapshot()
            .groupings
            .iter()
            .filter(|g| g.role == role)
            .map(|g| g.subject.clone())
            .collect()
    }

    pub fn get_policy(&self) -> Vec<PolicyRule> {
        self.snapshot().policies.clone()
    }

    pub fn get_grouping_policy(&self) -> Vec<GroupingRule> {
        self.snapshot().groupings.clone()
    }

    pub fn get_filtered_policy(&self, field: PolicyField, value: &str) -> Vec<PolicyRule> {
        self.snapshot()
            .policies
            .iter()
            .filter(|p| match field {
                PolicyField::Role => p.role == value,
                PolicyField::Resource => p.resource == value,
                PolicyField::Action => p.action.eq_ignore_ascii_case(value),
            })
            .cloned()
            .collect()
    }

    /// Replaces the whole policy table from the given rules, independent of
    /// any file on disk. Used by `load_policy`/`load_policy_str` and by
    /// `ManagementApi` when regenerating policies from routes.
    pub fn reload(&self, policies: Vec<PolicyRule>, groupings: Vec<GroupingRule>) {
        self.swap(PolicyState::from_rules(policies, groupings));
    }

    /// Parses the casbin-compatible line-oriented CSV format and replaces
    /// the in-memory tables. Blank lines and leading whitespace are
    /// ignored.
    pub fn load_policy_str(&self, text: &str) -> AuthzResult<()> {
        let (policies, groupings) = parse_csv(text)?;
        self.reload(policies, groupings);
        Ok(())
    }

    pub fn load_policy(&self, path: &Path) -> AuthzResult<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuthzError::Configuration(format!("reading policy file: {e}")))?;
        self.load_policy_str(&text)
    }

    /// Serializes the current table to the CSV format: `g,` lines first,
    /// then `p,` lines.
    pub fn to_csv(&self) -> String {
        let snapshot = self.snapshot();
        render_csv(&snapshot.policies, &snapshot.groupings)
    }

    pub fn save_policy(&self, path: &Path) -> AuthzResult<()> {
        std::fs::write(path, self.to_csv())
            .map_err(|e| AuthzError::TransientStore(format!("writing policy file: {e}")))
    }
}

fn parse_csv(text: &str) -> AuthzResult<(Vec<PolicyRule>, Vec<GroupingRule>)> {
    let mut policies = Vec::new();
    let mut groupings = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split(',').map(|f| f.trim().to_string()).collect();
        match fields.first().map(String::as_str) {
            Some("p") => {
                if fields.len() != 4 {
                    return Err(AuthzError::Validation(format!(
                        "malformed policy line: {raw_line}"
                    )));
                }
                policies.push(PolicyRule {
                    role: fields[1].clone(),
                    resource: fields[2].clone(),
                    action: fields[3].clone(),
                });
            }
            Some("g") => {
                if fields.len() != 3 {
                    return Err(AuthzError::Validation(format!(
                        "malformed grouping line: {raw_line}"
                    )));
                }
                groupings.push(GroupingRule {
                    subject: fields[1].clone(),
                    role: fields[2].clone(),
                });
            }
            _ => {
                return Err(AuthzError::Validation(format!(
                    "unrecognized policy line: {raw_line}"
                )));
            }
        }
    }

    Ok((policies, groupings))
}

fn render_csv(policies: &[PolicyRule], groupings: &[GroupingRule]) -> String {
    let mut out = String::new();
    for g in groupings {
        out.push_str(&format!("g, {}, {}\n", g.subject, g.role));
    }
    for p in policies {
        out.push_str(&format!("p, {}, {}, {}\n", p.role, p.resource, p.action));
    }
    out
}
