use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChatResponse, Message, check_status};
use crate::config::ReasonerConfig;
use crate::llm::extract::{DML_STARTERS, SELECT_STARTERS, extract_json, extract_sql, strip_code_fences};
use crate::llm::models::{ChartConfig, GeneratedQuery, QueryEvaluation, ReportRequest};
use crate::llm::prompts::PromptLibrary;
use crate::llm::{GenerationContext, LlmError, QueryGenerator};

/// Locally hosted reasoning model behind an OpenAI-style chat endpoint.
/// Answers are free text; SQL and JSON are extracted from them.
pub struct ReasonerProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    timeout: Duration,
    prompts: Arc<PromptLibrary>,
}

#[derive(Serialize, Debug)]
struct ReasonerRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    stream: bool,
}

impl ReasonerProvider {
    pub fn new(config: &ReasonerConfig, prompts: Arc<PromptLibrary>) -> Result<Self, LlmError> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            prompts,
        })
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn chat(&self, system: String, user: &str) -> Result<String, LlmError> {
        let request = ReasonerRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: 0.1,
            stream: false,
        };

        info!("Sending request to reasoner with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let call = async {
            let response = self
                .client
                .post(&self.api_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| LlmError::Connection(e.to_string()))?;
            check_status(response)
                .await?
                .json::<ChatResponse>()
                .await
                .map_err(|e| LlmError::Response(format!("Failed to parse reasoner response: {}", e)))?
                .into_content()
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Reasoner request timed out");
                Err(LlmError::Timeout(self.timeout))
            }
        }
    }

    async fn sql_answer(
        &self,
        system: String,
        question: &str,
        starters: &[&str],
    ) -> Result<GeneratedQuery, LlmError> {
        let content = self.chat(system, question).await?;
        let sql = extract_sql(&content, starters).ok_or_else(|| {
            LlmError::Response("Failed to extract valid SQL from response".to_string())
        })?;
        Ok(GeneratedQuery {
            sql,
            explanation: None,
        })
    }

    async fn json_answer(&self, system: String, user: &str) -> Result<Value, LlmError> {
        let content = self.chat(system, user).await?;
        extract_json(&content)
            .ok_or_else(|| LlmError::Response("No JSON object in response".to_string()))
    }
}

#[async_trait]
impl QueryGenerator for ReasonerProvider {
    async fn generate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError> {
        let system = self.prompts.generate_query(ctx, false)?;
        self.sql_answer(system, question, SELECT_STARTERS)
            .await
            .map_err(|e| e.while_generating("SQL query"))
    }

    async fn generate_dml_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError> {
        let system = self.prompts.generate_dml(ctx, false)?;
        self.sql_answer(system, question, DML_STARTERS)
            .await
            .map_err(|e| e.while_generating("DML statement"))
    }

    async fn explain_query(&self, ctx: &GenerationContext, sql: &str) -> Result<String, LlmError> {
        let system = self.prompts.explain_query(ctx)?;
        let content = self
            .chat(system, sql)
            .await
            .map_err(|e| e.while_generating("query explanation"))?;
        Ok(strip_code_fences(&content))
    }

    async fn generate_chart_config(
        &self,
        question: &str,
        sql: &str,
        rows: &[Value],
    ) -> Result<ChartConfig, LlmError> {
        let system = self.prompts.chart_config(question, sql, rows, false)?;
        let value = self
            .json_answer(system, question)
            .await
            .map_err(|e| e.while_generating("chart configuration"))?;
        serde_json::from_value(value).map_err(|e| {
            LlmError::Response(format!("Malformed chart configuration: {}", e))
                .while_generating("chart configuration")
        })
    }

    async fn generate_report(&self, request: &ReportRequest) -> Result<String, LlmError> {
        let system = self.prompts.report(request)?;
        let content = self
            .chat(system, &request.question)
            .await
            .map_err(|e| e.while_generating("report"))?;
        Ok(strip_code_fences(&content))
    }

    async fn evaluate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
        sql: &str,
    ) -> Result<QueryEvaluation, LlmError> {
        let system = self.prompts.evaluate_query(ctx, question, false)?;
        let value = self
            .json_answer(system, sql)
            .await
            .map_err(|e| e.while_generating("query evaluation"))?;
        serde_json::from_value(value).map_err(|e| {
            LlmError::Response(format!("Malformed evaluation: {}", e))
                .while_generating("query evaluation")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chat_server;
    use super::*;
    use crate::sql::dialect::Dialect;

    fn provider(api_url: String) -> ReasonerProvider {
        let config = ReasonerConfig {
            api_url,
            model: "reasoner".to_string(),
            timeout_secs: 120,
        };
        ReasonerProvider::new(&config, Arc::new(PromptLibrary::new().unwrap())).unwrap()
    }

    fn ctx() -> GenerationContext {
        GenerationContext {
            schema_prompt: "Table: ORDERS (1)".to_string(),
            dialect: Dialect::Oracle,
        }
    }

    #[tokio::test]
    async fn slow_reasoner_times_out() {
        let url = chat_server("SELECT 1 FROM DUAL", Duration::from_secs(5)).await;
        let reasoner = provider(url).with_timeout(Duration::from_millis(100));

        let err = reasoner.generate_query(&ctx(), "anything").await.unwrap_err();

        assert!(matches!(err, LlmError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn sql_is_extracted_from_reasoning_output() {
        let url = chat_server(
            "<think>Need a count.</think>\n```sql\nSELECT COUNT(*) FROM ORDERS;\n```",
            Duration::ZERO,
        )
        .await;

        let generated = provider(url).generate_query(&ctx(), "how many orders").await.unwrap();

        assert_eq!(generated.sql, "SELECT COUNT(*) FROM ORDERS;");
    }

    #[tokio::test]
    async fn evaluation_json_is_parsed_from_prose() {
        let url = chat_server(
            "The query looks right. {\"score\": 3.5, \"explanation\": \"ok\"} Hope that helps.",
            Duration::ZERO,
        )
        .await;

        let evaluation = provider(url)
            .evaluate_query(&ctx(), "how many orders", "SELECT COUNT(*) FROM ORDERS")
            .await
            .unwrap();

        assert_eq!(evaluation.score, 3.5);
    }

    #[tokio::test]
    async fn unreachable_reasoner_is_a_generation_error() {
        let err = provider("http://127.0.0.1:1/v1/chat/completions".to_string())
            .generate_dml_query(&ctx(), "delete everything")
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Failed to generate DML statement"));
    }
}
