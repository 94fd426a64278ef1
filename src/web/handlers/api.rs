use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::UserId;
use crate::db::audit::QueryRecord;
use crate::db::dashboards::{DashboardDraft, SavedDashboard};
use crate::db::schema_manager::DatabaseSchema;
use crate::llm::ModelId;
use crate::llm::models::{ChartConfig, GeneratedQuery, ReportRequest};
use crate::query::dashboard::{DashboardEvent, DashboardRequest, build_dashboard};
use crate::query::service::{DmlOutcome, QueryOutcome};
use crate::sql::dialect::Dialect;
use crate::web::error::ApiError;
use crate::web::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;
const DASHBOARD_EVENT_BUFFER: usize = 16;

/// The calling user, taken from the `x-user-id` header set by the UI's
/// session layer.
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .map(Caller)
            .ok_or(ApiError::MissingIdentity)
    }
}

// Request types

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
    #[serde(default)]
    pub model: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
pub struct RunQueryRequest {
    pub question: String,
    pub sql: String,
    #[serde(default)]
    pub model: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub sql: String,
    #[serde(default)]
    pub model: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
pub struct ChartRequest {
    pub question: String,
    pub sql: String,
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub model: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
pub struct RunDmlRequest {
    pub question: String,
    pub sql: String,
    /// Ask the model for a short report on what changed.
    #[serde(default)]
    pub report: bool,
    #[serde(default)]
    pub model: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

// Response types

#[derive(Debug, Serialize)]
pub struct GeneratedResponse {
    #[serde(flatten)]
    pub generated: GeneratedQuery,
    pub dialect: Dialect,
    pub model: ModelId,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub generated: GeneratedQuery,
    #[serde(flatten)]
    pub result: QueryOutcome,
}

#[derive(Debug, Serialize)]
pub struct DmlResponse {
    #[serde(flatten)]
    pub outcome: DmlOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

// Handlers

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
        "default_model": state.config.llm.default_model,
        "cached_tenant_pools": state.pools.cached_orgs().await.len(),
    }))
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> Result<Json<DatabaseSchema>, ApiError> {
    let org_id = state.queries.organization_of(user_id).await?;
    let schema = state.queries.schema().get_database_schema(Some(org_id)).await?;
    Ok(Json(schema))
}

pub async fn generate_query(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(payload): Json<QuestionRequest>,
) -> Result<Json<GeneratedResponse>, ApiError> {
    require_text(&payload.question, "question")?;
    let model = payload.model.unwrap_or(state.llm.default_model());
    let generator = state.llm.generator(Some(model))?;
    let ctx = state.queries.context_for(user_id).await?;

    let generated = generator
        .generate_query(&ctx.generation, &payload.question)
        .await?;
    info!(user_id, org_id = ctx.org_id, %model, "Generated SQL");
    Ok(Json(GeneratedResponse {
        generated,
        dialect: ctx.generation.dialect,
        model,
    }))
}

pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(payload): Json<RunQueryRequest>,
) -> Result<Json<QueryOutcome>, ApiError> {
    require_text(&payload.sql, "sql")?;
    let generator = state.llm.generator(payload.model)?;
    let ctx = state.queries.context_for(user_id).await?;

    let outcome = state
        .queries
        .run_query(&ctx, generator.as_ref(), &payload.question, &payload.sql)
        .await?;
    Ok(Json(outcome))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(payload): Json<QuestionRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    require_text(&payload.question, "question")?;
    let generator = state.llm.generator(payload.model)?;
    let ctx = state.queries.context_for(user_id).await?;

    let generated = generator
        .generate_query(&ctx.generation, &payload.question)
        .await?;
    let result = state
        .queries
        .run_query(&ctx, generator.as_ref(), &payload.question, &generated.sql)
        .await?;
    Ok(Json(AskResponse {
        question: payload.question,
        generated,
        result,
    }))
}

pub async fn explain_query(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(payload): Json<ExplainRequest>,
) -> Result<Json<Value>, ApiError> {
    require_text(&payload.sql, "sql")?;
    let generator = state.llm.generator(payload.model)?;
    let ctx = state.queries.context_for(user_id).await?;

    let explanation = generator.explain_query(&ctx.generation, &payload.sql).await?;
    Ok(Json(json!({ "explanation": explanation })))
}

pub async fn chart_config(
    State(state): State<Arc<AppState>>,
    Caller(_user_id): Caller,
    Json(payload): Json<ChartRequest>,
) -> Result<Json<ChartConfig>, ApiError> {
    let generator = state.llm.generator(payload.model)?;
    let chart = generator
        .generate_chart_config(&payload.question, &payload.sql, &payload.rows)
        .await?;
    Ok(Json(chart))
}

pub async fn generate_dml(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(payload): Json<QuestionRequest>,
) -> Result<Json<GeneratedResponse>, ApiError> {
    require_text(&payload.question, "question")?;
    let model = payload.model.unwrap_or(state.llm.default_model());
    let generator = state.llm.generator(Some(model))?;
    let ctx = state.queries.context_for(user_id).await?;

    let generated = generator
        .generate_dml_query(&ctx.generation, &payload.question)
        .await?;
    Ok(Json(GeneratedResponse {
        generated,
        dialect: ctx.generation.dialect,
        model,
    }))
}

pub async fn run_dml(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(payload): Json<RunDmlRequest>,
) -> Result<Json<DmlResponse>, ApiError> {
    require_text(&payload.sql, "sql")?;
    let generator = state.llm.generator(payload.model)?;
    let ctx = state.queries.context_for(user_id).await?;

    let outcome = state
        .queries
        .run_dml(&ctx, &payload.question, &payload.sql)
        .await?;

    let report = if payload.report {
        let request = ReportRequest {
            question: payload.question.clone(),
            sql: outcome.sql.clone(),
            outcome: format!("{} rows affected", outcome.rows_affected),
        };
        match generator.generate_report(&request).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(user_id, "DML report unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(Json(DmlResponse { outcome, report }))
}

pub async fn query_history(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<QueryRecord>>, ApiError> {
    let org_id = state.queries.organization_of(user_id).await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let records = state.queries.audit_log().recent(org_id, limit).await?;
    Ok(Json(records))
}

pub async fn list_dashboards(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> Result<Json<Vec<SavedDashboard>>, ApiError> {
    let org_id = state.queries.organization_of(user_id).await?;
    Ok(Json(state.dashboards.list(org_id).await?))
}

pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<SavedDashboard>, ApiError> {
    let org_id = state.queries.organization_of(user_id).await?;
    Ok(Json(state.dashboards.get(org_id, id).await?))
}

pub async fn save_dashboard(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(draft): Json<DashboardDraft>,
) -> Result<Json<SavedDashboard>, ApiError> {
    require_text(&draft.name, "name")?;
    let org_id = state.queries.organization_of(user_id).await?;
    let saved = state.dashboards.save(org_id, user_id, draft).await?;
    info!(org_id, dashboard = %saved.id, "Saved dashboard");
    Ok(Json(saved))
}

pub async fn delete_dashboard(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let org_id = state.queries.organization_of(user_id).await?;
    state.dashboards.delete(org_id, id).await?;
    Ok(Json(json!({ "deleted": id })))
}

/// Streams generation progress as newline-delimited JSON. Failures after the
/// stream has started arrive as `error` events.
pub async fn generate_dashboard(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(request): Json<DashboardRequest>,
) -> Result<Response, ApiError> {
    if request.questions.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one chart question is required".to_string(),
        ));
    }
    let generator = state.llm.generator(request.model)?;
    let ctx = state.queries.context_for(user_id).await?;

    let (tx, rx) = mpsc::channel::<DashboardEvent>(DASHBOARD_EVENT_BUFFER);
    let worker_state = Arc::clone(&state);
    tokio::spawn(async move {
        let (status, charts) =
            build_dashboard(&worker_state.queries, generator.as_ref(), &ctx, &request, &tx).await;
        info!(
            org_id = ctx.org_id,
            status = status.as_str(),
            charts,
            "Dashboard generation finished"
        );
        if let Err(e) = worker_state
            .dashboards
            .record_generation(ctx.org_id, ctx.user_id, &request.title, status, charts)
            .await
        {
            warn!(org_id = ctx.org_id, "Failed to record dashboard generation: {}", e);
        }
    });

    let lines = ReceiverStream::new(rx).map(|event| {
        serde_json::to_string(&event).map(|mut line| {
            line.push('\n');
            line
        })
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

fn require_text(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}
