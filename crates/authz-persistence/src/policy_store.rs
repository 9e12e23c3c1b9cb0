//! `PostgresPolicyStore`: durable storage for the policy and grouping
//! tables `PolicyEnforcer` loads at startup, grounded the same way as
//! [`crate::audit_repository`] (plain `sqlx::query`, no query builder).

use authz_core::error::AuthzResult;
use authz_core::policy::{GroupingRule, PolicyRule};
use sqlx::PgPool;

pub struct PostgresPolicyStore {
    pool: PgPool,
}

impl PostgresPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load_policy(&self) -> AuthzResult<(Vec<PolicyRule>, Vec<GroupingRule>)> {
        let policy_rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT role, resource, action FROM authz_policy_rules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| crate::error::map_sqlx("load policy rules", e))?;

        let grouping_rows = sqlx::query_as::<_, (String, String)>(
            "SELECT subject, role FROM authz_grouping_rules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| crate::error::map_sqlx("load grouping rules", e))?;

        let policies = policy_rows
            .into_iter()
            .map(|(role, resource, action)| PolicyRule { role, resource, action })
            .collect();
        let groupings = grouping_rows
            .into_iter()
            .map(|(subject, role)| GroupingRule { subject, role })
            .collect();
        Ok((policies, groupings))
    }

    /// Replaces the entire policy and grouping tables atomically.
    pub async fn save_policy(&self, policies: &[PolicyRule], groupings: &[GroupingRule]) -> AuthzResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| crate::error::map_sqlx("begin policy save transaction", e))?;

        sqlx::query("TRUNCATE authz_policy_rules")
            .execute(&mut *tx)
            .await
            .map_err(|e| crate::error::map_sqlx("truncate policy rules", e))?;
        sqlx::query("TRUNCATE authz_grouping_rules")
            .execute(&mut *tx)
            .await
            .map_err(|e| crate::error::map_sqlx("truncate grouping rules", e))?;

        for p in policies {
            sqlx::query("INSERT INTO authz_policy_rules (role, resource, action) VALUES ($1, $2, $3)")
                .bind(&p.role)
                .bind(&p.resource)
                .bind(&p.action)
                .execute(&mut *tx)
                .await
                .map_err(|e| crate::error::map_sqlx("insert policy rule", e))?;
        }
        for g in groupings {
            sqlx::query("INSERT INTO authz_grouping_rules (subject, role) VALUES ($1, $2)")
                .bind(&g.subject)
                .bind(&g.role)
                .execute(&mut *tx)
                .await
                .map_err(|e| crate::error::map_sqlx("insert grouping rule", e))?;
        }

        tx.commit().await.map_err(|e| crate::error::map_sqlx("commit policy save transaction", e))?;
        Ok(())
    }
}
