use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChatResponse, Message, check_status};
use crate::config::OpenAiConfig;
use crate::llm::models::{
    ChartConfig, GeneratedQuery, QueryEvaluation, ReportRequest, TextAnswer, chart_config_schema,
    evaluation_schema, generated_query_schema, text_schema,
};
use crate::llm::prompts::PromptLibrary;
use crate::llm::{GenerationContext, LlmError, QueryGenerator};

/// Hosted OpenAI-compatible chat completions with schema-constrained answers.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    prompts: Arc<PromptLibrary>,
}

#[derive(Serialize)]
struct PromptRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    response_format: Value,
}

impl OpenAiProvider {
    pub fn new(
        config: &OpenAiConfig,
        api_key: &str,
        prompts: Arc<PromptLibrary>,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            prompts,
        })
    }

    async fn structured<T: DeserializeOwned>(
        &self,
        system: String,
        user: &str,
        name: &str,
        schema: Value,
    ) -> Result<T, LlmError> {
        let request = PromptRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: 0.1,
            response_format: json!({
                "type": "json_schema",
                "json_schema": { "name": name, "strict": true, "schema": schema }
            }),
        };

        debug!(model = %self.model, schema = name, "Sending request to OpenAI");
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let content = check_status(response)
            .await?
            .json::<ChatResponse>()
            .await
            .map_err(|e| LlmError::Response(e.to_string()))?
            .into_content()?;

        serde_json::from_str(&content)
            .map_err(|e| LlmError::Response(format!("Malformed structured answer: {}", e)))
    }
}

#[async_trait]
impl QueryGenerator for OpenAiProvider {
    async fn generate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError> {
        let system = self.prompts.generate_query(ctx, true)?;
        self.structured(system, question, "generated_query", generated_query_schema())
            .await
            .map_err(|e| e.while_generating("SQL query"))
    }

    async fn generate_dml_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
    ) -> Result<GeneratedQuery, LlmError> {
        let system = self.prompts.generate_dml(ctx, true)?;
        self.structured(system, question, "generated_dml", generated_query_schema())
            .await
            .map_err(|e| e.while_generating("DML statement"))
    }

    async fn explain_query(&self, ctx: &GenerationContext, sql: &str) -> Result<String, LlmError> {
        let system = self.prompts.explain_query(ctx)?;
        let answer: TextAnswer = self
            .structured(system, sql, "explanation", text_schema())
            .await
            .map_err(|e| e.while_generating("query explanation"))?;
        Ok(answer.text)
    }

    async fn generate_chart_config(
        &self,
        question: &str,
        sql: &str,
        rows: &[Value],
    ) -> Result<ChartConfig, LlmError> {
        let system = self.prompts.chart_config(question, sql, rows, true)?;
        self.structured(system, question, "chart_config", chart_config_schema())
            .await
            .map_err(|e| e.while_generating("chart configuration"))
    }

    async fn generate_report(&self, request: &ReportRequest) -> Result<String, LlmError> {
        let system = self.prompts.report(request)?;
        let answer: TextAnswer = self
            .structured(system, &request.question, "report", text_schema())
            .await
            .map_err(|e| e.while_generating("report"))?;
        Ok(answer.text)
    }

    async fn evaluate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
        sql: &str,
    ) -> Result<QueryEvaluation, LlmError> {
        let system = self.prompts.evaluate_query(ctx, question, true)?;
        self.structured(system, sql, "query_evaluation", evaluation_schema())
            .await
            .map_err(|e| e.while_generating("query evaluation"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chat_server;
    use super::*;
    use crate::sql::dialect::Dialect;

    fn provider(api_url: String) -> OpenAiProvider {
        let config = OpenAiConfig {
            api_url,
            api_key: None,
            model: "gpt-4o".to_string(),
            timeout_secs: 5,
        };
        OpenAiProvider::new(&config, "sk-test", Arc::new(PromptLibrary::new().unwrap())).unwrap()
    }

    fn ctx() -> GenerationContext {
        GenerationContext {
            schema_prompt: "Table: ORDERS (1)".to_string(),
            dialect: Dialect::Postgres,
        }
    }

    #[tokio::test]
    async fn structured_answer_is_decoded() {
        let url = chat_server(
            r#"{"sql": "SELECT COUNT(*) FROM orders", "explanation": "Counts orders"}"#,
            Duration::ZERO,
        )
        .await;

        let generated = provider(url).generate_query(&ctx(), "how many orders").await.unwrap();

        assert_eq!(generated.sql, "SELECT COUNT(*) FROM orders");
        assert_eq!(generated.explanation.as_deref(), Some("Counts orders"));
    }

    #[tokio::test]
    async fn malformed_answer_names_the_operation() {
        let url = chat_server("not json", Duration::ZERO).await;

        let err = provider(url).evaluate_query(&ctx(), "q", "SELECT 1").await.unwrap_err();

        assert!(matches!(err, LlmError::Generation(_)));
        assert!(err.to_string().starts_with("Failed to generate query evaluation"));
    }
}
