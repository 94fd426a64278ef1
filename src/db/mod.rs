pub mod audit;
pub mod central;
pub mod connection;
pub mod dashboards;
pub mod oracle;
pub mod pool_manager;
pub mod postgres;
pub mod schema_manager;
pub mod tenant;

use thiserror::Error;

/// Organization identifier as stored in `NL2SQL_ORG.ID`.
pub type OrgId = i64;
pub type UserId = i64;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("{0}")]
    Query(String),
    #[error("Database configuration error: {0}")]
    Config(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Database task failed: {0}")]
    Task(String),
}

impl DbError {
    /// Failures that say nothing about the statement and everything about
    /// the pool behind it.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }

    pub fn is_too_many_clients(&self) -> bool {
        self.to_string().to_lowercase().contains("too many clients")
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::Query(db_err.message().to_string()),
            sqlx::Error::RowNotFound => DbError::NotFound("Row".to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Connection(err.to_string()),
            sqlx::Error::Configuration(_) => DbError::Config(err.to_string()),
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<::oracle::Error> for DbError {
    fn from(err: ::oracle::Error) -> Self {
        DbError::Query(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Task(err.to_string())
    }
}
