pub mod dashboard;
pub mod service;

use thiserror::Error;

use crate::db::DbError;
use crate::llm::LlmError;
use crate::llm::models::QueryEvaluation;

/// Evaluation scores below this are rejected before execution.
pub const MIN_EVALUATION_SCORE: f64 = 3.0;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error(
        "The generated query has significant issues (score {score}/5): {explanation}. Please refine your request."
    )]
    LowScore { score: f64, explanation: String },
    #[error("{0}")]
    Execution(String),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl QueryError {
    /// Errors the caller can fix by rephrasing the request.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, QueryError::Validation(_) | QueryError::LowScore { .. })
    }
}

pub fn check_evaluation(evaluation: &QueryEvaluation) -> Result<(), QueryError> {
    if evaluation.score < MIN_EVALUATION_SCORE {
        return Err(QueryError::LowScore {
            score: evaluation.score,
            explanation: evaluation.explanation.clone(),
        });
    }
    Ok(())
}

/// Friendlier wording for driver errors with a recognised code or phrase;
/// anything else is returned as-is.
pub fn translate_driver_error(raw: &str) -> String {
    let lower = raw.to_lowercase();

    if raw.contains("ORA-00942") || (lower.contains("relation") && lower.contains("does not exist")) {
        return format!(
            "Table or view does not exist. Check that the tables referenced by the query are available to your organization. ({})",
            raw
        );
    }
    if ["ORA-00905", "ORA-00933", "ORA-00923"].iter().any(|code| raw.contains(code))
        || lower.contains("syntax error at or near")
    {
        return format!(
            "The query contains syntax errors for the target database. Try rephrasing your request. ({})",
            raw
        );
    }
    if raw.contains("ORA-01017") || lower.contains("password authentication failed") {
        return "Authentication with the organization database failed. Check the stored credentials."
            .to_string();
    }
    if ["ORA-12541", "ORA-12154", "ORA-12545"].iter().any(|code| raw.contains(code))
        || lower.contains("connection refused")
    {
        return format!(
            "The organization database host could not be reached. Check the connection settings. ({})",
            raw
        );
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation(score: f64) -> QueryEvaluation {
        QueryEvaluation {
            score,
            explanation: "groups by the wrong column".into(),
        }
    }

    #[test]
    fn score_of_three_is_enough() {
        assert!(check_evaluation(&evaluation(3.0)).is_ok());
        assert!(check_evaluation(&evaluation(5.0)).is_ok());
    }

    #[test]
    fn score_below_three_is_rejected() {
        let err = check_evaluation(&evaluation(2.9)).unwrap_err();
        assert!(err.is_user_correctable());
        assert!(
            err.to_string()
                .starts_with("The generated query has significant issues")
        );
    }

    #[test]
    fn oracle_codes_are_translated() {
        assert!(
            translate_driver_error("ORA-00942: table or view does not exist")
                .starts_with("Table or view does not exist")
        );
        assert!(
            translate_driver_error("ORA-00933: SQL command not properly ended")
                .starts_with("The query contains syntax errors")
        );
        assert!(
            translate_driver_error("ORA-12541: TNS:no listener")
                .starts_with("The organization database host could not be reached")
        );
    }

    #[test]
    fn postgres_messages_are_translated() {
        assert!(
            translate_driver_error(r#"relation "orders" does not exist"#)
                .starts_with("Table or view does not exist")
        );
        assert!(
            translate_driver_error(r#"syntax error at or near "FETCH""#)
                .starts_with("The query contains syntax errors")
        );
        assert!(
            translate_driver_error("password authentication failed for user \"app\"")
                .starts_with("Authentication")
        );
    }

    #[test]
    fn unknown_errors_pass_through() {
        assert_eq!(
            translate_driver_error("division by zero"),
            "division by zero"
        );
    }
}
