//! External collaborator traits. The core crate depends on these
//! interfaces only; concrete adapters (Postgres, JWT extraction, env
//! config) live in `authz-persistence` and `authz-gateway`, keeping the
//! core crate free of any concrete I/O dependency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::records::DecisionRecord;
use crate::error::AuthzResult;
use crate::policy::{GroupingRule, PolicyRule};

/// Extracts the authenticated subject (user id + role) from an inbound
/// request. Implemented by the embedding application, not this crate --
/// this crate has no opinion on how tokens are verified.
#[async_trait]
pub trait AuthenticationExtractor: Send + Sync {
    async fn extract(&self, request_id: &str, raw_token: Option<&str>) -> AuthzResult<AuthenticatedSubject>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    pub subject_id: String,
    pub role: String,
}

/// Durable storage for audit records and the policy table. A real
/// implementation talks to Postgres (see `authz-persistence`); tests use
/// the in-memory adapter in this crate's `tests` support module.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save_batch(&self, records: &[DecisionRecord]) -> AuthzResult<()>;

    async fn find_all(&self, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>>;

    async fn find_by_subject(&self, subject: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>>;

    async fn find_by_resource(&self, resource: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>>;

    async fn find_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> AuthzResult<Vec<DecisionRecord>>;

    async fn count(&self) -> AuthzResult<u64>;

    /// Deletes records older than `older_than` and returns how many rows
    /// were removed.
    async fn cleanup_old_logs(&self, older_than: DateTime<Utc>) -> AuthzResult<u64>;

    async fn load_policy(&self) -> AuthzResult<(Vec<PolicyRule>, Vec<GroupingRule>)>;

    async fn save_policy(&self, policies: &[PolicyRule], groupings: &[GroupingRule]) -> AuthzResult<()>;
}

/// Source of ambient configuration, satisfied by `authz-gateway`'s
/// `config.rs` (`config` + `dotenvy` crates) in this workspace.
pub trait ConfigSource: Send + Sync {
    fn get_string(&self, key: &str) -> AuthzResult<String>;
    fn get_u32(&self, key: &str) -> AuthzResult<u32>;
    fn get_bool(&self, key: &str) -> AuthzResult<bool>;
}
