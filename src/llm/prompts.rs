//! System prompts rendered from the templates under `prompts/`.

use minijinja::{Environment, context};
use serde_json::Value;

use crate::llm::GenerationContext;
use crate::llm::LlmError;
use crate::llm::models::ReportRequest;

/// Rows shown to the model when asking for a chart.
const CHART_SAMPLE_ROWS: usize = 5;

pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, LlmError> {
        let mut env = Environment::new();
        let templates = [
            ("generate_query", include_str!("../../prompts/generate_query.j2")),
            ("generate_dml", include_str!("../../prompts/generate_dml.j2")),
            ("explain_query", include_str!("../../prompts/explain_query.j2")),
            ("evaluate_query", include_str!("../../prompts/evaluate_query.j2")),
            ("chart_config", include_str!("../../prompts/chart_config.j2")),
            ("report", include_str!("../../prompts/report.j2")),
        ];
        for (name, source) in templates {
            env.add_template(name, source)
                .map_err(|e| LlmError::Config(format!("Invalid prompt template {}: {}", name, e)))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, LlmError> {
        self.env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(ctx))
            .map_err(|e| LlmError::Config(format!("Failed to render prompt {}: {}", name, e)))
    }

    /// `structured` tells the model whether a JSON schema constrains its
    /// answer or it should reply in plain text.
    pub fn generate_query(&self, ctx: &GenerationContext, structured: bool) -> Result<String, LlmError> {
        self.render(
            "generate_query",
            context! {
                dialect => ctx.dialect.name(),
                schema => ctx.schema_prompt,
                rules => ctx.dialect.prompt_rules(),
                structured,
            },
        )
    }

    pub fn generate_dml(&self, ctx: &GenerationContext, structured: bool) -> Result<String, LlmError> {
        self.render(
            "generate_dml",
            context! {
                dialect => ctx.dialect.name(),
                schema => ctx.schema_prompt,
                rules => ctx.dialect.prompt_rules(),
                structured,
            },
        )
    }

    pub fn explain_query(&self, ctx: &GenerationContext) -> Result<String, LlmError> {
        self.render(
            "explain_query",
            context! { dialect => ctx.dialect.name(), schema => ctx.schema_prompt },
        )
    }

    pub fn evaluate_query(
        &self,
        ctx: &GenerationContext,
        question: &str,
        structured: bool,
    ) -> Result<String, LlmError> {
        self.render(
            "evaluate_query",
            context! {
                dialect => ctx.dialect.name(),
                schema => ctx.schema_prompt,
                question,
                structured,
            },
        )
    }

    pub fn chart_config(
        &self,
        question: &str,
        sql: &str,
        rows: &[Value],
        structured: bool,
    ) -> Result<String, LlmError> {
        let columns: Vec<String> = rows
            .first()
            .and_then(Value::as_object)
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        let sample = serde_json::to_string_pretty(
            &rows.iter().take(CHART_SAMPLE_ROWS).collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        self.render(
            "chart_config",
            context! { question, sql, columns, sample, structured },
        )
    }

    pub fn report(&self, request: &ReportRequest) -> Result<String, LlmError> {
        self.render(
            "report",
            context! {
                question => request.question,
                sql => request.sql,
                outcome => request.outcome,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::Dialect;
    use serde_json::json;

    fn ctx(dialect: Dialect) -> GenerationContext {
        GenerationContext {
            schema_prompt: "Table: ORDERS (7)\nDescription: Customer orders".to_string(),
            dialect,
        }
    }

    #[test]
    fn query_prompt_embeds_schema_and_dialect_rules() {
        let prompts = PromptLibrary::new().unwrap();
        let prompt = prompts.generate_query(&ctx(Dialect::Oracle), true).unwrap();

        assert!(prompt.contains("Table: ORDERS (7)"));
        assert!(prompt.contains(Dialect::Oracle.name()));
        for rule in Dialect::Oracle.prompt_rules() {
            assert!(prompt.contains(rule), "missing rule: {}", rule);
        }
        assert!(prompt.contains("`explanation`"));
    }

    #[test]
    fn plain_text_prompts_ask_for_bare_sql() {
        let prompts = PromptLibrary::new().unwrap();
        let prompt = prompts.generate_dml(&ctx(Dialect::Postgres), false).unwrap();

        assert!(prompt.contains("Return only the SQL statement"));
        assert!(!prompt.contains("`explanation`"));
    }

    #[test]
    fn chart_prompt_lists_columns_from_first_row() {
        let prompts = PromptLibrary::new().unwrap();
        let rows = vec![json!({ "region": "EMEA", "total": 12.5 })];
        let prompt = prompts
            .chart_config("sales by region", "SELECT region, total FROM sales", &rows, false)
            .unwrap();

        assert!(prompt.contains("region, total"));
        assert!(prompt.contains("\"EMEA\""));
        assert!(prompt.contains("Respond with a JSON object only"));
    }
}
