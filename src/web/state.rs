use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::dashboards::DashboardStore;
use crate::db::pool_manager::PoolManager;
use crate::llm::LlmManager;
use crate::query::service::QueryService;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub pools: Arc<PoolManager>,
    pub queries: Arc<QueryService>,
    pub llm: LlmManager,
    pub dashboards: DashboardStore,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        pools: Arc<PoolManager>,
        queries: Arc<QueryService>,
        llm: LlmManager,
    ) -> Self {
        Self {
            config,
            dashboards: DashboardStore::new(Arc::clone(&pools)),
            pools,
            queries,
            llm,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.startup_time).num_seconds()
    }
}
