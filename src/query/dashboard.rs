//! Building a dashboard chart by chart while streaming progress events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::db::dashboards::GenerationStatus;
use crate::llm::models::{ChartConfig, ReportRequest};
use crate::llm::{ModelId, QueryGenerator};
use crate::query::service::{QueryService, RequestContext};

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardRequest {
    pub title: String,
    pub questions: Vec<String>,
    #[serde(default)]
    pub model: Option<ModelId>,
}

/// One line of the NDJSON generation stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DashboardEvent {
    Init {
        total: usize,
    },
    Chart {
        index: usize,
        question: String,
        sql: String,
        rows: Vec<Value>,
        chart: ChartConfig,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        message: String,
    },
    Insights {
        text: String,
    },
    Complete {
        charts: usize,
    },
}

struct BuiltChart {
    question: String,
    sql: String,
    row_count: usize,
}

/// Runs every question through the full query pipeline. A failing chart is
/// reported and skipped; the stream carries on. Stops early when the
/// receiver goes away.
pub async fn build_dashboard(
    service: &QueryService,
    generator: &dyn QueryGenerator,
    ctx: &RequestContext,
    request: &DashboardRequest,
    events: &mpsc::Sender<DashboardEvent>,
) -> (GenerationStatus, usize) {
    let total = request.questions.len();
    let mut built: Vec<BuiltChart> = Vec::new();

    if events.send(DashboardEvent::Init { total }).await.is_err() {
        return (GenerationStatus::Failed, 0);
    }

    for (index, question) in request.questions.iter().enumerate() {
        let event = match build_chart(service, generator, ctx, question).await {
            Ok((sql, rows, chart)) => {
                built.push(BuiltChart {
                    question: question.clone(),
                    sql: sql.clone(),
                    row_count: rows.len(),
                });
                DashboardEvent::Chart {
                    index,
                    question: question.clone(),
                    sql,
                    rows,
                    chart,
                }
            }
            Err(message) => {
                warn!(org_id = ctx.org_id, index, "Dashboard chart failed: {}", message);
                DashboardEvent::Error {
                    index: Some(index),
                    message,
                }
            }
        };
        if events.send(event).await.is_err() {
            info!(org_id = ctx.org_id, "Dashboard stream closed by client");
            return (GenerationStatus::from_counts(total, built.len()), built.len());
        }
    }

    if !built.is_empty() {
        let report = ReportRequest {
            question: request.title.clone(),
            sql: built
                .iter()
                .map(|c| c.sql.as_str())
                .collect::<Vec<_>>()
                .join(";\n"),
            outcome: built
                .iter()
                .map(|c| format!("{}: {} rows", c.question, c.row_count))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let event = match generator.generate_report(&report).await {
            Ok(text) => DashboardEvent::Insights { text },
            Err(e) => DashboardEvent::Error {
                index: None,
                message: e.to_string(),
            },
        };
        let _ = events.send(event).await;
    }

    let charts = built.len();
    let _ = events.send(DashboardEvent::Complete { charts }).await;
    (GenerationStatus::from_counts(total, charts), charts)
}

async fn build_chart(
    service: &QueryService,
    generator: &dyn QueryGenerator,
    ctx: &RequestContext,
    question: &str,
) -> Result<(String, Vec<Value>, ChartConfig), String> {
    let generated = generator
        .generate_query(&ctx.generation, question)
        .await
        .map_err(|e| e.to_string())?;
    let outcome = service
        .run_query(ctx, generator, question, &generated.sql)
        .await
        .map_err(|e| e.to_string())?;
    let chart = generator
        .generate_chart_config(question, &outcome.sql, &outcome.rows)
        .await
        .map_err(|e| e.to_string())?;
    Ok((outcome.sql, outcome.rows, chart))
}
