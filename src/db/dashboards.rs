//! Saved dashboards and the log of streamed dashboard generations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::pool_manager::PoolManager;
use crate::db::{DbError, OrgId, UserId};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SavedDashboard {
    #[sqlx(rename = "ID")]
    pub id: Uuid,
    #[sqlx(rename = "ORG_ID")]
    pub org_id: OrgId,
    #[sqlx(rename = "USER_ID")]
    pub user_id: UserId,
    #[sqlx(rename = "NAME")]
    pub name: String,
    #[sqlx(rename = "DESCRIPTION")]
    pub description: Option<String>,
    #[sqlx(rename = "CHARTS")]
    pub charts: serde_json::Value,
    #[sqlx(rename = "CREATED_AT")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "UPDATED_AT")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardDraft {
    /// Present when overwriting an existing dashboard.
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub charts: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Completed,
    Partial,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Completed => "COMPLETED",
            GenerationStatus::Partial => "PARTIAL",
            GenerationStatus::Failed => "FAILED",
        }
    }

    pub fn from_counts(requested: usize, succeeded: usize) -> Self {
        if succeeded == 0 {
            GenerationStatus::Failed
        } else if succeeded < requested {
            GenerationStatus::Partial
        } else {
            GenerationStatus::Completed
        }
    }
}

const DASHBOARD_COLUMNS: &str = r#""ID", "ORG_ID", "USER_ID", "NAME", "DESCRIPTION", "CHARTS", "CREATED_AT", "UPDATED_AT""#;

pub struct DashboardStore {
    pools: Arc<PoolManager>,
}

impl DashboardStore {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    pub async fn list(&self, org_id: OrgId) -> Result<Vec<SavedDashboard>, DbError> {
        let pool = self.pools.default_pool().await?;
        let sql = format!(
            r#"SELECT {} FROM "NL2SQL_SAVED_DASHBOARDS" WHERE "ORG_ID" = $1 ORDER BY "UPDATED_AT" DESC"#,
            DASHBOARD_COLUMNS
        );
        Ok(sqlx::query_as::<_, SavedDashboard>(&sql)
            .bind(org_id)
            .fetch_all(&pool)
            .await?)
    }

    pub async fn get(&self, org_id: OrgId, id: Uuid) -> Result<SavedDashboard, DbError> {
        let pool = self.pools.default_pool().await?;
        let sql = format!(
            r#"SELECT {} FROM "NL2SQL_SAVED_DASHBOARDS" WHERE "ORG_ID" = $1 AND "ID" = $2"#,
            DASHBOARD_COLUMNS
        );
        sqlx::query_as::<_, SavedDashboard>(&sql)
            .bind(org_id)
            .bind(id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Dashboard {}", id)))
    }

    /// Insert a new dashboard or overwrite one the organization already owns.
    pub async fn save(
        &self,
        org_id: OrgId,
        user_id: UserId,
        draft: DashboardDraft,
    ) -> Result<SavedDashboard, DbError> {
        let pool = self.pools.default_pool().await?;
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let sql = format!(
            r#"INSERT INTO "NL2SQL_SAVED_DASHBOARDS"
                 ("ID", "ORG_ID", "USER_ID", "NAME", "DESCRIPTION", "CHARTS", "CREATED_AT", "UPDATED_AT")
               VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
               ON CONFLICT ("ID") DO UPDATE
                 SET "NAME" = EXCLUDED."NAME",
                     "DESCRIPTION" = EXCLUDED."DESCRIPTION",
                     "CHARTS" = EXCLUDED."CHARTS",
                     "UPDATED_AT" = NOW()
                 WHERE "NL2SQL_SAVED_DASHBOARDS"."ORG_ID" = EXCLUDED."ORG_ID"
               RETURNING {}"#,
            DASHBOARD_COLUMNS
        );
        sqlx::query_as::<_, SavedDashboard>(&sql)
            .bind(id)
            .bind(org_id)
            .bind(user_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(&draft.charts)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Dashboard {}", id)))
    }

    pub async fn delete(&self, org_id: OrgId, id: Uuid) -> Result<(), DbError> {
        let pool = self.pools.default_pool().await?;
        let result = sqlx::query(
            r#"DELETE FROM "NL2SQL_SAVED_DASHBOARDS" WHERE "ORG_ID" = $1 AND "ID" = $2"#,
        )
        .bind(org_id)
        .bind(id)
        .execute(&pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("Dashboard {}", id)));
        }
        Ok(())
    }

    pub async fn record_generation(
        &self,
        org_id: OrgId,
        user_id: UserId,
        prompt: &str,
        status: GenerationStatus,
        chart_count: usize,
    ) -> Result<(), DbError> {
        let pool = self.pools.default_pool().await?;
        sqlx::query(
            r#"INSERT INTO "NL2SQL_DASHBOARD_GENERATIONS"
                 ("ID", "ORG_ID", "USER_ID", "PROMPT", "STATUS", "CHART_COUNT", "CREATED_AT")
               VALUES ($1, $2, $3, $4, $5, $6, NOW())"#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(user_id)
        .bind(prompt)
        .bind(status.as_str())
        .bind(chart_count as i32)
        .execute(&pool)
        .await?;
        Ok(())
    }
}
