pub mod extract;
pub mod models;
pub mod prompts;
pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::llm::models::{ChartConfig, GeneratedQuery, QueryEvaluation, ReportRequest};
use crate::llm::prompts::PromptLibrary;
use crate::sql::dialect::Dialect;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    Connection(String),
    #[error("LLM response error: {0}")]
    Response(String),
    #[error("LLM configuration error: {0}")]
    Config(String),
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Generation(String),
}

impl LlmError {
    /// Attach the operation to a transport or parsing failure. Timeouts keep
    /// their own variant.
    pub fn while_generating(self, what: &str) -> LlmError {
        match self {
            LlmError::Timeout(_) | LlmError::Generation(_) => self,
            other => LlmError::Generation(format!("Failed to generate {}: {}", what, other)),
        }
    }
}

/// Which backend serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    #[default]
    Openai,
    Reasoner,
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Openai => write!(f, "openai"),
            ModelId::Reasoner => write!(f, "reasoner"),
        }
    }
}

impl FromStr for ModelId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ModelId::Openai),
            "reasoner" => Ok(ModelId::Reasoner),
            other => Err(LlmError::Config(format!("Unsupported model: {}", other))),
        }
    }
}

/// What every prompt needs to know about the target database.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub schema_prompt: String,
    pub dialect: Dialect,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError>;

    async fn generate_dml_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError>;

    async fn explain_query(&self, ctx: &GenerationContext, sql: &str) -> Result<String, LlmError>;

    async fn generate_chart_config(
        &self,
        question: &str,
        sql: &str,
        rows: &[serde_json::Value],
    ) -> Result<ChartConfig, LlmError>;

    async fn generate_report(&self, request: &ReportRequest) -> Result<String, LlmError>;

    async fn evaluate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
        sql: &str,
    ) -> Result<QueryEvaluation, LlmError>;
}

/// Replaces a failed SELECT generation with the dialect's canned query so
/// callers always get runnable SQL back. Every other operation passes
/// straight through.
pub struct FallbackGenerator {
    inner: Arc<dyn QueryGenerator>,
    model: ModelId,
}

impl FallbackGenerator {
    pub fn new(inner: Arc<dyn QueryGenerator>, model: ModelId) -> Self {
        Self { inner, model }
    }
}

#[async_trait]
impl QueryGenerator for FallbackGenerator {
    async fn generate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError> {
        match self.inner.generate_query(ctx, question).await {
            Ok(generated) => Ok(generated),
            Err(e) => {
                warn!(model = %self.model, "Query generation failed, using fallback: {}", e);
                Ok(GeneratedQuery {
                    sql: ctx.dialect.fallback_query().to_string(),
                    explanation: Some(format!("Query generation failed: {}", e)),
                })
            }
        }
    }

    async fn generate_dml_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError> {
        self.inner.generate_dml_query(ctx, question).await
    }

    async fn explain_query(&self, ctx: &GenerationContext, sql: &str) -> Result<String, LlmError> {
        self.inner.explain_query(ctx, sql).await
    }

    async fn generate_chart_config(
        &self,
        question: &str,
        sql: &str,
        rows: &[serde_json::Value],
    ) -> Result<ChartConfig, LlmError> {
        let mut chart = self.inner.generate_chart_config(question, sql, rows).await?;
        chart.assign_series_colors();
        Ok(chart)
    }

    async fn generate_report(&self, request: &ReportRequest) -> Result<String, LlmError> {
        self.inner.generate_report(request).await
    }

    async fn evaluate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
        sql: &str,
    ) -> Result<QueryEvaluation, LlmError> {
        self.inner.evaluate_query(ctx, question, sql).await
    }
}

pub struct LlmManager {
    default_model: ModelId,
    openai: Option<Arc<dyn QueryGenerator>>,
    reasoner: Arc<dyn QueryGenerator>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let prompts = Arc::new(PromptLibrary::new()?);

        // The hosted backend is optional; without a key only the reasoner serves.
        let openai: Option<Arc<dyn QueryGenerator>> = match &config.openai.api_key {
            Some(key) if !key.trim().is_empty() => Some(Arc::new(
                providers::openai::OpenAiProvider::new(&config.openai, key, Arc::clone(&prompts))?,
            )),
            _ => {
                warn!("No OpenAI API key configured, hosted model disabled");
                None
            }
        };
        let reasoner: Arc<dyn QueryGenerator> = Arc::new(
            providers::reasoner::ReasonerProvider::new(&config.reasoner, prompts)?,
        );

        info!(default_model = %config.default_model, "LLM backends initialized");
        Ok(Self {
            default_model: config.default_model,
            openai,
            reasoner,
        })
    }

    pub fn default_model(&self) -> ModelId {
        self.default_model
    }

    /// The generator for `model`, or the configured default.
    pub fn generator(&self, model: Option<ModelId>) -> Result<Arc<dyn QueryGenerator>, LlmError> {
        let model = model.unwrap_or(self.default_model);
        let inner = match model {
            ModelId::Openai => self.openai.clone().ok_or_else(|| {
                LlmError::Config("The openai model requires an API key".to_string())
            })?,
            ModelId::Reasoner => Arc::clone(&self.reasoner),
        };
        Ok(Arc::new(FallbackGenerator::new(inner, model)))
    }
}
