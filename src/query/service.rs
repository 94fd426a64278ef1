//! The read and write pipelines: validate, evaluate, execute, audit.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::db::audit::{AuditLog, NewQueryRecord, QueryStatus};
use crate::db::central::OrgDirectory;
use crate::db::connection::DatabaseConnectionInfo;
use crate::db::schema_manager::SchemaProvider;
use crate::db::tenant::TenantExecutor;
use crate::db::{OrgId, UserId};
use crate::llm::models::QueryEvaluation;
use crate::llm::{GenerationContext, QueryGenerator};
use crate::query::{QueryError, check_evaluation, translate_driver_error};
use crate::sql::optimizer::QueryOptimizer;
use crate::sql::postprocess::format_rows;
use crate::sql::validator::SqlValidator;

/// Everything resolved about the caller before a statement runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub connection: DatabaseConnectionInfo,
    pub generation: GenerationContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub sql: String,
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub execution_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<QueryEvaluation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DmlOutcome {
    pub sql: String,
    pub rows_affected: u64,
    pub execution_time_ms: i64,
}

pub struct QueryService {
    directory: Arc<dyn OrgDirectory>,
    schema: Arc<SchemaProvider>,
    validator: Arc<dyn SqlValidator>,
    optimizer: Arc<dyn QueryOptimizer>,
    executor: Arc<dyn TenantExecutor>,
    audit: Arc<dyn AuditLog>,
}

impl QueryService {
    pub fn new(
        directory: Arc<dyn OrgDirectory>,
        schema: Arc<SchemaProvider>,
        validator: Arc<dyn SqlValidator>,
        optimizer: Arc<dyn QueryOptimizer>,
        executor: Arc<dyn TenantExecutor>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            directory,
            schema,
            validator,
            optimizer,
            executor,
            audit,
        }
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    pub fn schema(&self) -> &SchemaProvider {
        &self.schema
    }

    pub async fn organization_of(&self, user_id: UserId) -> Result<OrgId, QueryError> {
        Ok(self.directory.organization_for_user(user_id).await?)
    }

    /// Resolve the caller's organization, its database and its schema prompt.
    pub async fn context_for(&self, user_id: UserId) -> Result<RequestContext, QueryError> {
        let org_id = self.directory.organization_for_user(user_id).await?;
        let connection = self.directory.connection_info(org_id).await?;
        let schema_prompt = self.schema.schema_prompt(Some(org_id)).await?;
        let dialect = connection.dialect();
        debug!(user_id, org_id, %dialect, "Resolved request context");

        Ok(RequestContext {
            org_id,
            user_id,
            connection,
            generation: GenerationContext {
                schema_prompt,
                dialect,
            },
        })
    }

    pub async fn run_query(
        &self,
        ctx: &RequestContext,
        generator: &dyn QueryGenerator,
        question: &str,
        sql: &str,
    ) -> Result<QueryOutcome, QueryError> {
        let started = Instant::now();

        let cleaned = match self.validator.validate_select(sql) {
            Ok(cleaned) => cleaned,
            Err(message) => {
                self.record(ctx, question, sql, QueryStatus::Failed, Some(&message), started, 0)
                    .await;
                return Err(QueryError::Validation(message));
            }
        };

        let optimized = self.optimizer.optimize(&cleaned, ctx.connection.dialect());

        let evaluation = match generator
            .evaluate_query(&ctx.generation, question, &optimized)
            .await
        {
            Ok(evaluation) => {
                debug!(org_id = ctx.org_id, score = evaluation.score, "Query evaluated");
                if let Err(e) = check_evaluation(&evaluation) {
                    let message = e.to_string();
                    self.record(ctx, question, &optimized, QueryStatus::Failed, Some(&message), started, 0)
                        .await;
                    return Err(e);
                }
                Some(evaluation)
            }
            Err(e) => {
                warn!(org_id = ctx.org_id, "Query evaluation unavailable, executing anyway: {}", e);
                None
            }
        };

        match self.executor.query(ctx.org_id, &ctx.connection, &optimized).await {
            Ok(rows) => {
                let rows = format_rows(rows);
                let row_count = rows.len();
                let execution_time_ms = self
                    .record(ctx, question, &optimized, QueryStatus::Success, None, started, row_count as i64)
                    .await;
                info!(org_id = ctx.org_id, row_count, execution_time_ms, "Query succeeded");
                Ok(QueryOutcome {
                    sql: optimized,
                    rows,
                    row_count,
                    execution_time_ms,
                    evaluation,
                })
            }
            Err(e) => {
                let message = translate_driver_error(&e.to_string());
                self.record(ctx, question, &optimized, QueryStatus::Error, Some(&message), started, 0)
                    .await;
                Err(QueryError::Execution(message))
            }
        }
    }

    pub async fn run_dml(
        &self,
        ctx: &RequestContext,
        question: &str,
        sql: &str,
    ) -> Result<DmlOutcome, QueryError> {
        let started = Instant::now();

        let cleaned = match self.validator.validate_dml(sql) {
            Ok(cleaned) => cleaned,
            Err(message) => {
                self.record(ctx, question, sql, QueryStatus::Failed, Some(&message), started, 0)
                    .await;
                return Err(QueryError::Validation(message));
            }
        };

        match self.executor.execute_dml(ctx.org_id, &ctx.connection, &cleaned).await {
            Ok(rows_affected) => {
                let execution_time_ms = self
                    .record(ctx, question, &cleaned, QueryStatus::Success, None, started, rows_affected as i64)
                    .await;
                info!(org_id = ctx.org_id, rows_affected, execution_time_ms, "DML succeeded");
                Ok(DmlOutcome {
                    sql: cleaned,
                    rows_affected,
                    execution_time_ms,
                })
            }
            Err(e) => {
                let message = translate_driver_error(&e.to_string());
                self.record(ctx, question, &cleaned, QueryStatus::Error, Some(&message), started, 0)
                    .await;
                Err(QueryError::Execution(message))
            }
        }
    }

    /// Write the audit entry and return the elapsed time it recorded.
    /// Audit failures are logged and never reach the caller.
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        ctx: &RequestContext,
        question: &str,
        sql: &str,
        status: QueryStatus,
        error_message: Option<&str>,
        started: Instant,
        rows_returned: i64,
    ) -> i64 {
        let execution_time_ms = started.elapsed().as_millis() as i64;
        let entry = NewQueryRecord {
            org_id: ctx.org_id,
            user_id: ctx.user_id,
            query_text: question.to_string(),
            sql_query: sql.to_string(),
            status,
            error_message: error_message.map(str::to_string),
            execution_time_ms,
            rows_returned,
        };
        if let Err(e) = self.audit.record(entry).await {
            warn!(org_id = ctx.org_id, "Failed to record query audit entry: {}", e);
        }
        execution_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::db::audit::MockAuditLog;
    use crate::db::central::MockOrgDirectory;
    use crate::db::connection::PostgresConnectionInfo;
    use crate::db::schema_manager::{MockSchemaCatalog, SchemaPolicy};
    use crate::db::tenant::MockTenantExecutor;
    use crate::llm::{LlmError, MockQueryGenerator};
    use crate::sql::dialect::Dialect;
    use crate::sql::optimizer::WhitespaceOptimizer;
    use crate::sql::postprocess::CellValue;
    use crate::sql::validator::{DenylistValidator, READ_ONLY_VIOLATION};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn context() -> RequestContext {
        RequestContext {
            org_id: 7,
            user_id: 11,
            connection: DatabaseConnectionInfo::Postgres(PostgresConnectionInfo {
                host: "db.internal".into(),
                port: 5432,
                user: "app".into(),
                password: "secret".into(),
                database: "sales".into(),
            }),
            generation: GenerationContext {
                schema_prompt: "Table: ORDERS (1)".into(),
                dialect: Dialect::Postgres,
            },
        }
    }

    fn service(executor: MockTenantExecutor, audit: MockAuditLog) -> QueryService {
        QueryService::new(
            Arc::new(MockOrgDirectory::new()),
            Arc::new(SchemaProvider::new(
                Arc::new(MockSchemaCatalog::new()),
                None,
                SchemaPolicy::default(),
            )),
            Arc::new(DenylistValidator),
            Arc::new(WhitespaceOptimizer),
            Arc::new(executor),
            Arc::new(audit),
        )
    }

    fn scoring(score: f64) -> MockQueryGenerator {
        let mut generator = MockQueryGenerator::new();
        generator.expect_evaluate_query().returning(move |_, _, _| {
            Ok(QueryEvaluation {
                score,
                explanation: "looks fine".into(),
            })
        });
        generator
    }

    fn capturing_audit() -> (MockAuditLog, Arc<Mutex<Vec<NewQueryRecord>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut audit = MockAuditLog::new();
        audit.expect_record().returning(move |entry| {
            sink.lock().unwrap().push(entry);
            Ok(())
        });
        (audit, seen)
    }

    fn one_row_executor() -> MockTenantExecutor {
        let mut executor = MockTenantExecutor::new();
        executor.expect_query().times(1).returning(|_, _, _| {
            Ok(vec![vec![
                ("year".to_string(), CellValue::Int(2024)),
                ("total".to_string(), CellValue::Float(10.456)),
            ]])
        });
        executor
    }

    #[tokio::test]
    async fn score_of_three_executes() {
        let (audit, seen) = capturing_audit();
        let service = service(one_row_executor(), audit);

        let outcome = service
            .run_query(&context(), &scoring(3.0), "sales per year", "SELECT year, total FROM sales;")
            .await
            .unwrap();

        assert_eq!(outcome.sql, "SELECT year, total FROM sales");
        assert_eq!(outcome.rows[0]["year"], "2024");
        assert_eq!(outcome.rows[0]["total"], 10.46);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, QueryStatus::Success);
        assert_eq!(seen[0].rows_returned, 1);
    }

    #[tokio::test]
    async fn low_score_is_rejected_and_audited() {
        let mut executor = MockTenantExecutor::new();
        executor.expect_query().never();
        let (audit, seen) = capturing_audit();
        let service = service(executor, audit);

        let err = service
            .run_query(&context(), &scoring(2.9), "sales per year", "SELECT * FROM sales")
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::LowScore { .. }));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].status, QueryStatus::Failed);
        assert!(
            seen[0]
                .error_message
                .as_deref()
                .unwrap()
                .starts_with("The generated query has significant issues")
        );
    }

    #[tokio::test]
    async fn unsafe_sql_never_reaches_the_database() {
        let mut executor = MockTenantExecutor::new();
        executor.expect_query().never();
        let mut generator = MockQueryGenerator::new();
        generator.expect_evaluate_query().never();
        let (audit, seen) = capturing_audit();
        let service = service(executor, audit);

        let err = service
            .run_query(&context(), &generator, "clean up", "SELECT 1; DROP TABLE orders")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), READ_ONLY_VIOLATION);
        assert_eq!(seen.lock().unwrap()[0].status, QueryStatus::Failed);
    }

    #[tokio::test]
    async fn evaluation_outage_does_not_block_execution() {
        let mut generator = MockQueryGenerator::new();
        generator
            .expect_evaluate_query()
            .returning(|_, _, _| Err(LlmError::Timeout(std::time::Duration::from_secs(120))));
        let (audit, _) = capturing_audit();
        let service = service(one_row_executor(), audit);

        let outcome = service
            .run_query(&context(), &generator, "sales per year", "SELECT year, total FROM sales")
            .await
            .unwrap();

        assert_eq!(outcome.row_count, 1);
        assert!(outcome.evaluation.is_none());
    }

    #[tokio::test]
    async fn audit_failure_does_not_mask_the_result() {
        let mut audit = MockAuditLog::new();
        audit
            .expect_record()
            .returning(|_| Err(DbError::Connection("central database down".into())));
        let service = service(one_row_executor(), audit);

        let outcome = service
            .run_query(&context(), &scoring(4.0), "sales per year", "SELECT year, total FROM sales")
            .await;

        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn driver_errors_are_translated_and_audited() {
        let mut executor = MockTenantExecutor::new();
        executor
            .expect_query()
            .returning(|_, _, _| Err(DbError::Query(r#"relation "sales" does not exist"#.into())));
        let (audit, seen) = capturing_audit();
        let service = service(executor, audit);

        let err = service
            .run_query(&context(), &scoring(5.0), "sales per year", "SELECT * FROM sales")
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Table or view does not exist"));
        assert_eq!(seen.lock().unwrap()[0].status, QueryStatus::Error);
    }

    #[tokio::test]
    async fn dml_reports_affected_rows() {
        let mut executor = MockTenantExecutor::new();
        executor
            .expect_execute_dml()
            .withf(|_, _, sql| sql.starts_with("UPDATE orders") && sql.ends_with("id = 3"))
            .returning(|_, _, _| Ok(1));
        let (audit, seen) = capturing_audit();
        let service = service(executor, audit);

        let outcome = service
            .run_dml(
                &context(),
                "close order 3",
                "UPDATE orders SET status = 'CLOSED' WHERE id = 3;",
            )
            .await
            .unwrap();

        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(seen.lock().unwrap()[0].rows_returned, 1);
    }

    #[tokio::test]
    async fn dml_rejects_structure_changes() {
        let mut executor = MockTenantExecutor::new();
        executor.expect_execute_dml().never();
        let (audit, _) = capturing_audit();
        let service = service(executor, audit);

        let err = service
            .run_dml(&context(), "drop it", "DELETE FROM orders; DROP TABLE orders")
            .await
            .unwrap_err();

        assert!(err.is_user_correctable());
    }
}
