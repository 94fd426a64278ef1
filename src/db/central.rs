//! Organization and catalog lookups against the central metadata database.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::db::connection::DatabaseConnectionInfo;
use crate::db::pool_manager::PoolManager;
use crate::db::schema_manager::{AvailableTable, SchemaCatalog, TableColumn};
use crate::db::{DbError, OrgId, UserId};

const TABLE_COLUMNS: &str =
    r#""ID", "ORG_ID", "TABLE_NAME", "DESCRIPTION", "IS_ACTIVE""#;
const COLUMN_COLUMNS: &str = r#""ID", "TABLE_ID", "COLUMN_NAME", "DATA_TYPE", "DESCRIPTION", "IS_PRIMARY_KEY", "IS_FOREIGN_KEY""#;

/// Resolves who a caller is and where their organization's data lives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    async fn organization_for_user(&self, user_id: UserId) -> Result<OrgId, DbError>;
    async fn connection_info(&self, org_id: OrgId) -> Result<DatabaseConnectionInfo, DbError>;
}

pub struct CentralStore {
    pools: Arc<PoolManager>,
}

impl CentralStore {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl OrgDirectory for CentralStore {
    async fn organization_for_user(&self, user_id: UserId) -> Result<OrgId, DbError> {
        let pool = self.pools.default_pool().await?;
        sqlx::query_scalar::<_, OrgId>(r#"SELECT "ORG_ID" FROM "NL2SQL_USERS" WHERE "ID" = $1"#)
            .bind(user_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("User {}", user_id)))
    }

    async fn connection_info(&self, org_id: OrgId) -> Result<DatabaseConnectionInfo, DbError> {
        let pool = self.pools.default_pool().await?;
        let raw = sqlx::query_scalar::<_, Option<String>>(
            r#"SELECT "DATABASE_INFO"::text FROM "NL2SQL_ORG" WHERE "ID" = $1"#,
        )
        .bind(org_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Organization {}", org_id)))?
        .ok_or_else(|| {
            DbError::Config(format!("Organization {} has no database configured", org_id))
        })?;

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| DbError::Config(format!("Invalid DATABASE_INFO for org {}: {}", org_id, e)))?;
        let info = DatabaseConnectionInfo::from_stored(&value)?;
        debug!(org_id, dialect = %info.dialect(), "Resolved tenant connection");
        Ok(info)
    }
}

#[async_trait]
impl SchemaCatalog for CentralStore {
    async fn tables_for_org(
        &self,
        org_id: OrgId,
        active_only: bool,
    ) -> Result<Vec<AvailableTable>, DbError> {
        let pool = self.pools.default_pool().await?;
        let sql = format!(
            r#"SELECT {} FROM "NL2SQL_AVAILABLE_TABLES"
               WHERE "ORG_ID" = $1 AND (NOT $2 OR "IS_ACTIVE")
               ORDER BY "TABLE_NAME""#,
            TABLE_COLUMNS
        );
        let tables = sqlx::query_as::<_, AvailableTable>(&sql)
            .bind(org_id)
            .bind(active_only)
            .fetch_all(&pool)
            .await?;
        Ok(tables)
    }

    async fn all_tables(&self) -> Result<Vec<AvailableTable>, DbError> {
        let pool = self.pools.default_pool().await?;
        let sql = format!(
            r#"SELECT {} FROM "NL2SQL_AVAILABLE_TABLES" ORDER BY "TABLE_NAME""#,
            TABLE_COLUMNS
        );
        Ok(sqlx::query_as::<_, AvailableTable>(&sql)
            .fetch_all(&pool)
            .await?)
    }

    async fn columns_for_tables(&self, table_ids: Vec<i64>) -> Result<Vec<TableColumn>, DbError> {
        let pool = self.pools.default_pool().await?;
        let sql = format!(
            r#"SELECT {} FROM "NL2SQL_TABLE_COLUMNS"
               WHERE "TABLE_ID" = ANY($1)
               ORDER BY "TABLE_ID", "ID""#,
            COLUMN_COLUMNS
        );
        Ok(sqlx::query_as::<_, TableColumn>(&sql)
            .bind(table_ids)
            .fetch_all(&pool)
            .await?)
    }

    async fn all_columns(&self) -> Result<Vec<TableColumn>, DbError> {
        let pool = self.pools.default_pool().await?;
        let sql = format!(
            r#"SELECT {} FROM "NL2SQL_TABLE_COLUMNS" ORDER BY "TABLE_ID", "ID""#,
            COLUMN_COLUMNS
        );
        Ok(sqlx::query_as::<_, TableColumn>(&sql)
            .fetch_all(&pool)
            .await?)
    }
}
