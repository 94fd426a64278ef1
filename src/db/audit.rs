//! Query audit trail (`NL2SQL_QUERIES`) and the daily per-organization
//! rollup (`NL2SQL_QUERY_PERFORMANCE`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::db::pool_manager::PoolManager;
use crate::db::{DbError, OrgId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryStatus {
    Success,
    /// Rejected before execution: validation or a low evaluation score.
    Failed,
    /// Execution or infrastructure failure.
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Success => "SUCCESS",
            QueryStatus::Failed => "FAILED",
            QueryStatus::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewQueryRecord {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub query_text: String,
    pub sql_query: String,
    pub status: QueryStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub rows_returned: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueryRecord {
    #[sqlx(rename = "ID")]
    pub id: i64,
    #[sqlx(rename = "USER_ID")]
    pub user_id: Option<UserId>,
    #[sqlx(rename = "QUERY_TEXT")]
    pub query_text: String,
    #[sqlx(rename = "SQL_QUERY")]
    pub sql_query: Option<String>,
    #[sqlx(rename = "STATUS")]
    pub status: String,
    #[sqlx(rename = "ERROR_MESSAGE")]
    pub error_message: Option<String>,
    #[sqlx(rename = "EXECUTION_TIME")]
    pub execution_time: Option<i64>,
    #[sqlx(rename = "ROWS_RETURNED")]
    pub rows_returned: Option<i64>,
    #[sqlx(rename = "CREATED_AT")]
    pub created_at: DateTime<Utc>,
}

/// One organization's counters for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, sqlx::FromRow)]
pub struct PerformanceRollup {
    #[sqlx(rename = "TOTAL_QUERIES")]
    pub total_queries: i64,
    #[sqlx(rename = "SUCCESSFUL_QUERIES")]
    pub successful_queries: i64,
    #[sqlx(rename = "FAILED_QUERIES")]
    pub failed_queries: i64,
    #[sqlx(rename = "AVG_EXECUTION_TIME")]
    pub avg_execution_time: f64,
}

impl PerformanceRollup {
    /// Fold one sample in: `avg' = (avg * n + new) / (n + 1)`.
    pub fn record_sample(&mut self, execution_time_ms: f64, succeeded: bool) {
        let n = self.total_queries as f64;
        self.avg_execution_time = (self.avg_execution_time * n + execution_time_ms) / (n + 1.0);
        self.total_queries += 1;
        if succeeded {
            self.successful_queries += 1;
        } else {
            self.failed_queries += 1;
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: NewQueryRecord) -> Result<(), DbError>;
    async fn recent(&self, org_id: OrgId, limit: i64) -> Result<Vec<QueryRecord>, DbError>;
}

pub struct PgAuditLog {
    pools: Arc<PoolManager>,
}

impl PgAuditLog {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, entry: NewQueryRecord) -> Result<(), DbError> {
        let pool = self.pools.default_pool().await?;
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO "NL2SQL_QUERIES"
                 ("ORG_ID", "USER_ID", "QUERY_TEXT", "SQL_QUERY", "STATUS",
                  "ERROR_MESSAGE", "EXECUTION_TIME", "ROWS_RETURNED", "CREATED_AT")
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())"#,
        )
        .bind(entry.org_id)
        .bind(entry.user_id)
        .bind(&entry.query_text)
        .bind(&entry.sql_query)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(entry.execution_time_ms)
        .bind(entry.rows_returned)
        .execute(&mut *tx)
        .await?;

        let day: NaiveDate = Utc::now().date_naive();
        sqlx::query(
            r#"INSERT INTO "NL2SQL_QUERY_PERFORMANCE"
                 ("ORG_ID", "DATE", "TOTAL_QUERIES", "SUCCESSFUL_QUERIES", "FAILED_QUERIES", "AVG_EXECUTION_TIME")
               VALUES ($1, $2, 0, 0, 0, 0)
               ON CONFLICT ("ORG_ID", "DATE") DO NOTHING"#,
        )
        .bind(entry.org_id)
        .bind(day)
        .execute(&mut *tx)
        .await?;

        let mut rollup = sqlx::query_as::<_, PerformanceRollup>(
            r#"SELECT "TOTAL_QUERIES", "SUCCESSFUL_QUERIES", "FAILED_QUERIES", "AVG_EXECUTION_TIME"
               FROM "NL2SQL_QUERY_PERFORMANCE"
               WHERE "ORG_ID" = $1 AND "DATE" = $2
               FOR UPDATE"#,
        )
        .bind(entry.org_id)
        .bind(day)
        .fetch_one(&mut *tx)
        .await?;

        rollup.record_sample(
            entry.execution_time_ms as f64,
            entry.status == QueryStatus::Success,
        );

        sqlx::query(
            r#"UPDATE "NL2SQL_QUERY_PERFORMANCE"
               SET "TOTAL_QUERIES" = $3, "SUCCESSFUL_QUERIES" = $4,
                   "FAILED_QUERIES" = $5, "AVG_EXECUTION_TIME" = $6
               WHERE "ORG_ID" = $1 AND "DATE" = $2"#,
        )
        .bind(entry.org_id)
        .bind(day)
        .bind(rollup.total_queries)
        .bind(rollup.successful_queries)
        .bind(rollup.failed_queries)
        .bind(rollup.avg_execution_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            org_id = entry.org_id,
            status = entry.status.as_str(),
            "Recorded query audit entry"
        );
        Ok(())
    }

    async fn recent(&self, org_id: OrgId, limit: i64) -> Result<Vec<QueryRecord>, DbError> {
        let pool = self.pools.default_pool().await?;
        Ok(sqlx::query_as::<_, QueryRecord>(
            r#"SELECT "ID", "USER_ID", "QUERY_TEXT", "SQL_QUERY", "STATUS", "ERROR_MESSAGE",
                      "EXECUTION_TIME", "ROWS_RETURNED", "CREATED_AT"
               FROM "NL2SQL_QUERIES"
               WHERE "ORG_ID" = $1
               ORDER BY "CREATED_AT" DESC
               LIMIT $2"#,
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_average_matches_direct_mean() {
        let samples = [120.0, 35.5, 980.25, 4.0, 4.0, 61.0, 1500.0, 0.5];
        let mut rollup = PerformanceRollup::default();

        for (i, sample) in samples.iter().enumerate() {
            rollup.record_sample(*sample, i % 3 != 0);
            let seen = &samples[..=i];
            let mean = seen.iter().sum::<f64>() / seen.len() as f64;
            assert!(
                (rollup.avg_execution_time - mean).abs() < 1e-9,
                "after {} samples: {} vs {}",
                i + 1,
                rollup.avg_execution_time,
                mean
            );
        }

        assert_eq!(rollup.total_queries, 8);
        assert_eq!(rollup.failed_queries, 3);
        assert_eq!(rollup.successful_queries, 5);
    }

    #[test]
    fn status_strings_match_stored_values() {
        assert_eq!(QueryStatus::Success.as_str(), "SUCCESS");
        assert_eq!(
            serde_json::to_value(QueryStatus::Failed).unwrap(),
            serde_json::json!("FAILED")
        );
    }
}
