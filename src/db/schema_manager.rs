use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{DbError, OrgId};

/// A table exposed to query generation (`NL2SQL_AVAILABLE_TABLES`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AvailableTable {
    #[serde(rename = "ID", alias = "id")]
    #[sqlx(rename = "ID")]
    pub id: i64,
    #[serde(rename = "ORG_ID", alias = "org_id", default)]
    #[sqlx(rename = "ORG_ID")]
    pub org_id: Option<OrgId>,
    #[serde(rename = "TABLE_NAME", alias = "table_name")]
    #[sqlx(rename = "TABLE_NAME")]
    pub table_name: String,
    #[serde(rename = "DESCRIPTION", alias = "description", default)]
    #[sqlx(rename = "DESCRIPTION")]
    pub description: Option<String>,
    #[serde(rename = "IS_ACTIVE", alias = "is_active", default)]
    #[sqlx(rename = "IS_ACTIVE")]
    pub is_active: bool,
}

/// A column of an [`AvailableTable`] (`NL2SQL_TABLE_COLUMNS`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TableColumn {
    #[serde(rename = "ID", alias = "id")]
    #[sqlx(rename = "ID")]
    pub id: i64,
    #[serde(rename = "TABLE_ID", alias = "table_id")]
    #[sqlx(rename = "TABLE_ID")]
    pub table_id: i64,
    #[serde(rename = "COLUMN_NAME", alias = "column_name")]
    #[sqlx(rename = "COLUMN_NAME")]
    pub column_name: String,
    #[serde(rename = "DATA_TYPE", alias = "data_type")]
    #[sqlx(rename = "DATA_TYPE")]
    pub data_type: String,
    #[serde(rename = "DESCRIPTION", alias = "description", default)]
    #[sqlx(rename = "DESCRIPTION")]
    pub description: Option<String>,
    #[serde(rename = "IS_PRIMARY_KEY", alias = "is_primary_key", default)]
    #[sqlx(rename = "IS_PRIMARY_KEY")]
    pub is_primary_key: bool,
    #[serde(rename = "IS_FOREIGN_KEY", alias = "is_foreign_key", default)]
    #[sqlx(rename = "IS_FOREIGN_KEY")]
    pub is_foreign_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: Vec<AvailableTable>,
    pub columns: Vec<TableColumn>,
}

/// Read access to the table/column catalog kept in the central database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn tables_for_org(&self, org_id: OrgId, active_only: bool)
        -> Result<Vec<AvailableTable>, DbError>;
    async fn all_tables(&self) -> Result<Vec<AvailableTable>, DbError>;
    async fn columns_for_tables(&self, table_ids: Vec<i64>) -> Result<Vec<TableColumn>, DbError>;
    async fn all_columns(&self) -> Result<Vec<TableColumn>, DbError>;
}

/// Lists the tables that really exist in a tenant database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveTableProbe: Send + Sync {
    /// `Ok(None)` when the database answered but could not list its tables.
    async fn existing_tables(&self, org_id: OrgId) -> Result<Option<Vec<String>>, DbError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaPolicy {
    /// Show inactive tables when an organization has no active ones.
    pub fallback_to_inactive: bool,
    /// Cross-check catalog tables against the tenant database.
    pub validate_live_tables: bool,
}

impl Default for SchemaPolicy {
    fn default() -> Self {
        Self {
            fallback_to_inactive: true,
            validate_live_tables: true,
        }
    }
}

/// Builds the per-organization schema handed to the LLM.
pub struct SchemaProvider {
    catalog: Arc<dyn SchemaCatalog>,
    probe: Option<Arc<dyn LiveTableProbe>>,
    policy: SchemaPolicy,
}

impl SchemaProvider {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        probe: Option<Arc<dyn LiveTableProbe>>,
        policy: SchemaPolicy,
    ) -> Self {
        Self {
            catalog,
            probe,
            policy,
        }
    }

    pub async fn get_database_schema(&self, org_id: Option<OrgId>) -> Result<DatabaseSchema, DbError> {
        let Some(org_id) = org_id else {
            let tables = self.catalog.all_tables().await?;
            let columns = self.catalog.all_columns().await?;
            debug!("Loaded unfiltered catalog: {} tables", tables.len());
            return Ok(DatabaseSchema { tables, columns });
        };

        let mut tables = self.catalog.tables_for_org(org_id, true).await?;
        if tables.is_empty() && self.policy.fallback_to_inactive {
            info!(org_id, "No active tables, falling back to all tables");
            tables = self.catalog.tables_for_org(org_id, false).await?;
        }

        let columns = if tables.is_empty() {
            Vec::new()
        } else {
            let ids = tables.iter().map(|t| t.id).collect();
            self.catalog.columns_for_tables(ids).await?
        };

        if !tables.is_empty() && self.policy.validate_live_tables {
            self.validate_live_tables(org_id, &tables).await;
        }

        info!(org_id, "Schema has {} tables and {} columns", tables.len(), columns.len());
        Ok(DatabaseSchema { tables, columns })
    }

    /// Warn about catalog tables missing from the tenant database. Never fails.
    async fn validate_live_tables(&self, org_id: OrgId, tables: &[AvailableTable]) {
        let Some(probe) = &self.probe else {
            return;
        };

        match probe.existing_tables(org_id).await {
            Ok(Some(existing)) => {
                let existing: HashSet<String> =
                    existing.iter().map(|t| t.to_uppercase()).collect();
                let missing: Vec<&str> = tables
                    .iter()
                    .map(|t| t.table_name.as_str())
                    .filter(|name| !existing.contains(&name.to_uppercase()))
                    .collect();
                if !missing.is_empty() {
                    warn!(org_id, "Tables missing from tenant database: {:?}", missing);
                }
            }
            Ok(None) => debug!(org_id, "Tenant database reachable, table list unavailable"),
            Err(e) => warn!(org_id, "Could not validate tables against tenant database: {}", e),
        }
    }

    pub async fn schema_prompt(&self, org_id: Option<OrgId>) -> Result<String, DbError> {
        let schema = self.get_database_schema(org_id).await?;
        Ok(format_schema_for_prompt(&schema))
    }
}

/// Render the schema as plain-text blocks, one per table.
pub fn format_schema_for_prompt(schema: &DatabaseSchema) -> String {
    let mut prompt = String::new();

    for (i, table) in schema.tables.iter().enumerate() {
        if i > 0 {
            prompt.push('\n');
        }
        let _ = writeln!(prompt, "Table: {} ({})", table.table_name, table.id);
        let _ = writeln!(
            prompt,
            "Description: {}",
            table.description.as_deref().unwrap_or("No description")
        );
        prompt.push_str("Columns:\n");

        let mut columns = schema
            .columns
            .iter()
            .filter(|c| c.table_id == table.id)
            .peekable();
        if columns.peek().is_none() {
            prompt.push_str("  No columns found\n");
        }
        for column in columns {
            let _ = writeln!(
                prompt,
                "  - {} ({}): {}",
                column.column_name,
                column.data_type,
                column.description.as_deref().unwrap_or("No description")
            );
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(id: i64, name: &str, active: bool) -> AvailableTable {
        AvailableTable {
            id,
            org_id: Some(1),
            table_name: name.to_string(),
            description: Some(format!("{} data", name)),
            is_active: active,
        }
    }

    fn column(id: i64, table_id: i64, name: &str) -> TableColumn {
        TableColumn {
            id,
            table_id,
            column_name: name.to_string(),
            data_type: "varchar".to_string(),
            description: None,
            is_primary_key: false,
            is_foreign_key: false,
        }
    }

    #[tokio::test]
    async fn falls_back_to_inactive_tables() {
        let mut catalog = MockSchemaCatalog::new();
        catalog
            .expect_tables_for_org()
            .withf(|org, active| *org == 1 && *active)
            .returning(|_, _| Ok(vec![]));
        catalog
            .expect_tables_for_org()
            .withf(|org, active| *org == 1 && !*active)
            .returning(|_, _| {
                Ok(vec![
                    table(1, "orders", false),
                    table(2, "customers", false),
                    table(3, "items", false),
                ])
            });
        catalog
            .expect_columns_for_tables()
            .returning(|_| Ok(vec![column(10, 1, "id")]));

        let provider = SchemaProvider::new(Arc::new(catalog), None, SchemaPolicy::default());
        let schema = provider.get_database_schema(Some(1)).await.unwrap();
        assert_eq!(schema.tables.len(), 3);
    }

    #[tokio::test]
    async fn no_fallback_when_policy_disabled() {
        let mut catalog = MockSchemaCatalog::new();
        catalog
            .expect_tables_for_org()
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let policy = SchemaPolicy {
            fallback_to_inactive: false,
            validate_live_tables: true,
        };
        let provider = SchemaProvider::new(Arc::new(catalog), None, policy);
        let schema = provider.get_database_schema(Some(1)).await.unwrap();
        assert!(schema.tables.is_empty());
    }

    #[tokio::test]
    async fn probe_failure_does_not_fail_the_fetch() {
        let mut catalog = MockSchemaCatalog::new();
        catalog
            .expect_tables_for_org()
            .returning(|_, _| Ok(vec![table(1, "orders", true)]));
        catalog.expect_columns_for_tables().returning(|_| Ok(vec![]));
        let mut probe = MockLiveTableProbe::new();
        probe
            .expect_existing_tables()
            .times(1)
            .returning(|_| Err(DbError::Connection("ORA-12541: TNS:no listener".into())));

        let provider = SchemaProvider::new(
            Arc::new(catalog),
            Some(Arc::new(probe)),
            SchemaPolicy::default(),
        );
        let schema = provider.get_database_schema(Some(1)).await.unwrap();
        assert_eq!(schema.tables.len(), 1);
    }

    #[tokio::test]
    async fn no_org_returns_whole_catalog() {
        let mut catalog = MockSchemaCatalog::new();
        catalog
            .expect_all_tables()
            .returning(|| Ok(vec![table(1, "orders", true), table(2, "old", false)]));
        catalog
            .expect_all_columns()
            .returning(|| Ok(vec![column(1, 1, "id"), column(2, 2, "id")]));

        let provider = SchemaProvider::new(Arc::new(catalog), None, SchemaPolicy::default());
        let schema = provider.get_database_schema(None).await.unwrap();
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.columns.len(), 2);
    }

    #[tokio::test]
    async fn prompt_lists_each_table_with_only_its_columns() {
        let mut catalog = MockSchemaCatalog::new();
        catalog.expect_tables_for_org().returning(|_, _| {
            Ok(vec![table(1, "orders", true), table(2, "customers", true)])
        });
        catalog.expect_columns_for_tables().returning(|_| {
            Ok(vec![
                column(10, 1, "order_id"),
                column(11, 1, "amount"),
                column(20, 2, "customer_id"),
            ])
        });

        let provider = SchemaProvider::new(Arc::new(catalog), None, SchemaPolicy::default());
        let prompt = provider.schema_prompt(Some(1)).await.unwrap();

        assert_eq!(prompt.matches("Table: ").count(), 2);
        let blocks: Vec<&str> = prompt.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("Table: orders (1)"));
        assert!(blocks[0].contains("  - order_id (varchar): No description"));
        assert!(blocks[0].contains("  - amount (varchar)"));
        assert!(!blocks[0].contains("customer_id"));
        assert!(blocks[1].contains("  - customer_id (varchar)"));
        assert!(!blocks[1].contains("order_id"));
    }

    #[test]
    fn tables_without_columns_say_so() {
        let schema = DatabaseSchema {
            tables: vec![table(5, "empty", true)],
            columns: vec![],
        };
        assert_eq!(
            format_schema_for_prompt(&schema),
            "Table: empty (5)\nDescription: empty data\nColumns:\n  No columns found\n"
        );
    }

    #[test]
    fn records_accept_either_field_casing() {
        let upper: AvailableTable = serde_json::from_value(json!({
            "ID": 1, "TABLE_NAME": "orders", "IS_ACTIVE": true
        }))
        .unwrap();
        let lower: AvailableTable = serde_json::from_value(json!({
            "id": 1, "table_name": "orders", "is_active": true
        }))
        .unwrap();
        assert_eq!(upper, lower);

        let column: TableColumn = serde_json::from_value(json!({
            "id": 3, "table_id": 1, "column_name": "amount", "data_type": "numeric"
        }))
        .unwrap();
        assert_eq!(column.column_name, "amount");
    }
}
