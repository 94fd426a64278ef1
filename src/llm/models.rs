use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Number of `--chart-N` colour variables the UI theme defines.
const CHART_PALETTE_SIZE: usize = 5;

// Output of SQL and DML generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

// Judgement of a generated query against the question it answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub score: f64,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Area,
    Pie,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub x_key: String,
    pub series: Vec<ChartSeries>,
}

impl ChartConfig {
    /// Give every series without an explicit colour one from the theme palette.
    pub fn assign_series_colors(&mut self) {
        for (i, series) in self.series.iter_mut().enumerate() {
            if series.color.as_deref().is_none_or(|c| c.trim().is_empty()) {
                series.color = Some(format!("hsl(var(--chart-{}))", i % CHART_PALETTE_SIZE + 1));
            }
        }
    }
}

// Input for natural-language reports on DML results and dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub question: String,
    pub sql: String,
    pub outcome: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextAnswer {
    pub text: String,
}

pub(crate) fn generated_query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sql": { "type": "string" },
            "explanation": { "type": "string" }
        },
        "required": ["sql", "explanation"],
        "additionalProperties": false
    })
}

pub(crate) fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": { "type": "number" },
            "explanation": { "type": "string" }
        },
        "required": ["score", "explanation"],
        "additionalProperties": false
    })
}

pub(crate) fn text_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "text": { "type": "string" } },
        "required": ["text"],
        "additionalProperties": false
    })
}

pub(crate) fn chart_config_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": { "type": "string", "enum": ["bar", "line", "area", "pie", "table"] },
            "title": { "type": "string" },
            "description": { "type": "string" },
            "xKey": { "type": "string" },
            "series": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "label": { "type": "string" },
                        "color": { "type": ["string", "null"] }
                    },
                    "required": ["key", "label", "color"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["type", "title", "description", "xKey", "series"],
        "additionalProperties": false
    })
}
