//! `PostgresAuditRepository`: the `PersistenceAdapter` half covering
//! [`DecisionRecord`] storage.

use authz_core::audit::{Decision, DecisionRecord};
use authz_core::error::AuthzResult;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::map_sqlx;

pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save_batch(&self, records: &[DecisionRecord]) -> AuthzResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx("begin audit batch transaction", e))?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO authz_decision_records (
                    id, occurred_at, subject, role, method, resource,
                    decision, reason, request_id, source_ip, duration_ms
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::INET, $11)
                "#,
            )
            .bind(record.id)
            .bind(record.occurred_at)
            .bind(&record.subject)
            .bind(&record.role)
            .bind(&record.method)
            .bind(&record.resource)
            .bind(record.decision.to_string())
            .bind(&record.reason)
            .bind(&record.request_id)
            .bind(&record.source_ip)
            .bind(record.duration_ms as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("insert audit decision record", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx("commit audit batch transaction", e))?;
        Ok(())
    }

    pub async fn find_all(&self, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, subject, role, method, resource,
                   decision, reason, request_id, source_ip::TEXT as source_ip, duration_ms
            FROM authz_decision_records
            ORDER BY occurred_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list audit decision records", e))?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn find_by_subject(&self, subject: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, subject, role, method, resource,
                   decision, reason, request_id, source_ip::TEXT as source_ip, duration_ms
            FROM authz_decision_records
            WHERE subject = $1
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(subject)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list audit decision records by subject", e))?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn find_by_resource(&self, resource: &str, limit: u32, offset: u32) -> AuthzResult<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, subject, role, method, resource,
                   decision, reason, request_id, source_ip::TEXT as source_ip, duration_ms
            FROM authz_decision_records
            WHERE resource = $1
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(resource)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list audit decision records by resource", e))?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn find_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> AuthzResult<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, occurred_at, subject, role, method, resource,
                   decision, reason, request_id, source_ip::TEXT as source_ip, duration_ms
            FROM authz_decision_records
            WHERE occurred_at >= $1 AND occurred_at <= $2
            ORDER BY occurred_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list audit decision records by time range", e))?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn count(&self) -> AuthzResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authz_decision_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx("count audit decision records", e))?;
        Ok(total as u64)
    }

    pub async fn cleanup_old_logs(&self, older_than: DateTime<Utc>) -> AuthzResult<u64> {
        let result = sqlx::query("DELETE FROM authz_decision_records WHERE occurred_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("cleanup old audit decision records", e))?;
        Ok(result.rows_affected())
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> AuthzResult<DecisionRecord> {
    let decision_str: String = row.try_get("decision").map_err(|e| map_sqlx("decode decision column", e))?;
    let decision = match decision_str.as_str() {
        "ALLOWED" => Decision::Allowed,
        "DENIED" => Decision::Denied,
        "RATE_LIMITED" => Decision::RateLimited,
        _ => Decision::Error,
    };
    Ok(DecisionRecord {
        id: row.try_get::<Uuid, _>("id").map_err(|e| map_sqlx("decode id column", e))?,
        occurred_at: row.try_get("occurred_at").map_err(|e| map_sqlx("decode occurred_at column", e))?,
        subject: row.try_get("subject").map_err(|e| map_sqlx("decode subject column", e))?,
        role: row.try_get("role").map_err(|e| map_sqlx("decode role column", e))?,
        method: row.try_get("method").map_err(|e| map_sqlx("decode method column", e))?,
        resource: row.try_get("resource").map_err(|e| map_sqlx("decode resource column", e))?,
        decision,
        reason: row.try_get("reason").map_err(|e| map_sqlx("decode reason column", e))?,
        request_id: row.try_get("request_id").map_err(|e| map_sqlx("decode request_id column", e))?,
        source_ip: row.try_get("source_ip").map_err(|e| map_sqlx("decode source_ip column", e))?,
        duration_ms: row.try_get::<i32, _>("duration_ms").map_err(|e| map_sqlx("decode duration_ms column", e))? as u32,
    })
}
