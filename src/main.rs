use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod llm;
mod query;
mod sql;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::audit::PgAuditLog;
use crate::db::central::{CentralStore, OrgDirectory};
use crate::db::pool_manager::{PoolManager, PoolSettings};
use crate::db::schema_manager::{LiveTableProbe, SchemaPolicy, SchemaProvider};
use crate::db::tenant::{TenantDatabases, TenantTableProbe};
use crate::llm::LlmManager;
use crate::query::service::QueryService;
use crate::sql::optimizer::WhitespaceOptimizer;
use crate::sql::validator::DenylistValidator;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Initializing connection pools");
    let pools = Arc::new(PoolManager::new(PoolSettings::from_config(
        &config.database,
        &config.tenant_pool,
    )?));

    let central = Arc::new(CentralStore::new(Arc::clone(&pools)));
    let directory: Arc<dyn OrgDirectory> = central.clone();
    let probe: Arc<dyn LiveTableProbe> =
        Arc::new(TenantTableProbe::new(Arc::clone(&directory), Arc::clone(&pools)));
    let schema = Arc::new(SchemaProvider::new(
        central,
        Some(probe),
        SchemaPolicy {
            fallback_to_inactive: config.schema.fallback_to_inactive,
            validate_live_tables: config.schema.validate_live_tables,
        },
    ));

    let queries = Arc::new(QueryService::new(
        directory,
        schema,
        Arc::new(DenylistValidator),
        Arc::new(WhitespaceOptimizer),
        Arc::new(TenantDatabases::new(Arc::clone(&pools))),
        Arc::new(PgAuditLog::new(Arc::clone(&pools))),
    ));

    info!(default_model = %config.llm.default_model, "Initializing LLM manager");
    let llm = LlmManager::new(&config.llm)?;

    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, Arc::clone(&pools), queries, llm));

    info!("Starting nl2sql gateway on {}:{}", web_config.host, web_config.port);
    let served = web::run_server(&web_config, app_state).await;

    pools.shutdown().await;
    match served {
        Ok(()) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
