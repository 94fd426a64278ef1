use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::db::DbError;
use crate::llm::LlmError;
use crate::query::QueryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or invalid x-user-id header")]
    MissingIdentity,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::Query(QueryError::Database(err))
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        ApiError::Query(QueryError::Llm(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Query(QueryError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Query(QueryError::LowScore { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Query(QueryError::Database(DbError::NotFound(_))) => StatusCode::NOT_FOUND,
            ApiError::Query(QueryError::Llm(LlmError::Config(_))) => StatusCode::BAD_REQUEST,
            ApiError::Query(QueryError::Llm(LlmError::Timeout(_))) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else if matches!(&self, ApiError::Query(e) if e.is_user_correctable()) {
            info!(error = %self, "query rejected");
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_correctable_errors_are_client_errors() {
        let validation = ApiError::from(QueryError::Validation("no".into()));
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let low_score = ApiError::from(QueryError::LowScore {
            score: 1.0,
            explanation: "wrong table".into(),
        });
        assert_eq!(low_score.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = ApiError::from(DbError::NotFound("Dashboard 1".into()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn infrastructure_errors_are_server_errors() {
        let err = ApiError::from(DbError::Connection("refused".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
