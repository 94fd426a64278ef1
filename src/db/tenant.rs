//! Running statements against an organization's own database.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::db::central::OrgDirectory;
use crate::db::connection::DatabaseConnectionInfo;
use crate::db::oracle::{self as oracle_db, OracleTableListing};
use crate::db::pool_manager::PoolManager;
use crate::db::schema_manager::LiveTableProbe;
use crate::db::{postgres, DbError, OrgId};
use crate::sql::dialect::adapt_sql_for_oracle;
use crate::sql::postprocess::Row;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantExecutor: Send + Sync {
    /// Run a read query and return raw rows.
    async fn query(
        &self,
        org_id: OrgId,
        info: &DatabaseConnectionInfo,
        sql: &str,
    ) -> Result<Vec<Row>, DbError>;

    /// Run a write statement and return the number of affected rows.
    async fn execute_dml(
        &self,
        org_id: OrgId,
        info: &DatabaseConnectionInfo,
        sql: &str,
    ) -> Result<u64, DbError>;
}

pub struct TenantDatabases {
    pools: Arc<PoolManager>,
}

impl TenantDatabases {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    async fn react_to_failure(&self, org_id: OrgId, err: &DbError) {
        if err.is_too_many_clients() {
            warn!(org_id, "Tenant database reports too many clients");
            self.pools.release_org_pools().await;
        } else if err.is_connection_failure() {
            self.pools.evict(org_id).await;
        }
    }

    // Write pools are not cached; there is nothing to evict.
    async fn react_to_write_failure(&self, org_id: OrgId, err: &DbError) {
        if err.is_too_many_clients() {
            warn!(org_id, "Tenant database reports too many clients on write");
            self.pools.release_org_pools().await;
        }
    }
}

#[async_trait]
impl TenantExecutor for TenantDatabases {
    async fn query(
        &self,
        org_id: OrgId,
        info: &DatabaseConnectionInfo,
        sql: &str,
    ) -> Result<Vec<Row>, DbError> {
        let started = Instant::now();
        let result = match info {
            DatabaseConnectionInfo::Oracle(oracle_info) => {
                let adapted = adapt_sql_for_oracle(sql, &oracle_info.user);
                debug!(org_id, "Oracle SQL: {}", adapted);
                let oracle_info = oracle_info.clone();
                tokio::task::spawn_blocking(move || oracle_db::query_rows(&oracle_info, &adapted))
                    .await?
            }
            DatabaseConnectionInfo::Postgres(pg_info) => {
                let pool = self.pools.acquire(org_id, pg_info).await;
                postgres::fetch_rows(&pool, sql).await
            }
        };

        match &result {
            Ok(rows) => info!(
                org_id,
                dialect = %info.dialect(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Query returned {} rows",
                rows.len()
            ),
            Err(e) => self.react_to_failure(org_id, e).await,
        }
        result
    }

    async fn execute_dml(
        &self,
        org_id: OrgId,
        info: &DatabaseConnectionInfo,
        sql: &str,
    ) -> Result<u64, DbError> {
        let started = Instant::now();
        let result = match info {
            DatabaseConnectionInfo::Oracle(oracle_info) => {
                let adapted = adapt_sql_for_oracle(sql, &oracle_info.user);
                let oracle_info = oracle_info.clone();
                tokio::task::spawn_blocking(move || oracle_db::execute(&oracle_info, &adapted))
                    .await?
            }
            DatabaseConnectionInfo::Postgres(pg_info) => {
                // Write connections are never reused
                let pool = self.pools.dml_pool(pg_info);
                let result = postgres::execute(&pool, sql).await;
                pool.close().await;
                result
            }
        };

        match &result {
            Ok(affected) => info!(
                org_id,
                dialect = %info.dialect(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Statement affected {} rows",
                affected
            ),
            Err(e) => self.react_to_write_failure(org_id, e).await,
        }
        result
    }
}

/// Lists live tables of an organization's database for schema validation.
pub struct TenantTableProbe {
    directory: Arc<dyn OrgDirectory>,
    pools: Arc<PoolManager>,
}

impl TenantTableProbe {
    pub fn new(directory: Arc<dyn OrgDirectory>, pools: Arc<PoolManager>) -> Self {
        Self { directory, pools }
    }
}

#[async_trait]
impl LiveTableProbe for TenantTableProbe {
    async fn existing_tables(&self, org_id: OrgId) -> Result<Option<Vec<String>>, DbError> {
        match self.directory.connection_info(org_id).await? {
            DatabaseConnectionInfo::Oracle(oracle_info) => {
                let listing =
                    tokio::task::spawn_blocking(move || oracle_db::list_tables(&oracle_info))
                        .await??;
                Ok(match listing {
                    OracleTableListing::Tables(tables) => Some(tables),
                    OracleTableListing::ReachableOnly => None,
                })
            }
            DatabaseConnectionInfo::Postgres(pg_info) => {
                let pool = self.pools.acquire(org_id, &pg_info).await;
                Ok(Some(postgres::list_tables(&pool).await?))
            }
        }
    }
}
