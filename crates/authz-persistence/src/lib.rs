//! Postgres-backed `PersistenceAdapter` for `authz-core`.

pub mod audit_repository;
pub mod error;
pub mod policy_store;

use async_trait::async_trait;
use authz_core::audit::DecisionRecord;
use authz_core::error::AuthzResult;
use authz_core::policy::{GroupingRule, PolicyRule};
use authz_core::ports::PersistenceAdapter;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;

use audit_repository::PostgresAuditRepository;
use policy_store::PostgresPolicyStore;

/// Single `PersistenceAdapter` implementation backing both the audit trail
/// and the policy table, sharing one connection pool.
pub struct PostgresPersistenceAdapter {
    audit: PostgresAuditRepository,
    policy: PostgresPolicyStore,
}

impl PostgresPersistenceAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            audit: PostgresAuditRepository::new(pool.clone()),
            policy: PostgresPolicyStore::new(pool),
        }
    }

    /// Runs the crate's embedded migrations (table creation for
    /// `authz_decision_records`, `authz_policy_rules`, `authz_grouping_rules`).
    pub async fn migrate(pool: &PgPool) -> AuthzResult<()> {
        info!("running authz-persistence migrations");
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| authz_core::AuthzError::Configuration(format!("running migrations: {e}")))
    }
}

#[async_trait]
impl PersistenceAdapter for PostgresPersistenceAdapter {
    async fn save_batch(&self, records: &[DecisionRecord]) -> AuthzResult<()> {
        self.audit.save_batch(records).await
    }

    async fn find_all(&self, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        self.audit.find_all(limit, offset).await
    }

    async fn find_by_subject(&self, subject: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        self.audit.find_by_subject(subject, limit, offset).await
    }

    async fn find_by_resource(&self, resource: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        self.audit.find_by_resource(resource, limit, offset).await
    }

    async fn find_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> AuthzResult<Vec<DecisionRecord>> {
        self.audit.find_by_time_range(from, to, limit, offset).await
    }

    async fn count(&self) -> AuthzResult<u64> {
        self.audit.count().await
    }

    async fn cleanup_old_logs(&self, older_than: DateTime<Utc>) -> AuthzResult<u64> {
        self.audit.cleanup_old_logs(older_than).await
    }

    async fn load_policy(&self) -> AuthzResult<(Vec<PolicyRule>, Vec<GroupingRule>)> {
        self.policy.load_policy().await
    }

    async fn save_policy(&self, policies: &[PolicyRule], groupings: &[GroupingRule]) -> AuthzResult<()> {
        self.policy.save_policy(policies, groupings).await
    }
}
