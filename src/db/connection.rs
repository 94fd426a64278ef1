//! Tenant connection details as stored in `NL2SQL_ORG.DATABASE_INFO`.
//!
//! The stored blob carries no type tag: a non-empty `connectString` means
//! Oracle, everything else is PostgreSQL. [`DatabaseConnectionInfo::from_stored`]
//! is the only place that decision is made.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::db::DbError;
use crate::sql::dialect::Dialect;

pub const POSTGRES_DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConnectionInfo {
    pub user: String,
    pub password: String,
    pub connect_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConnectionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatabaseConnectionInfo {
    Oracle(OracleConnectionInfo),
    Postgres(PostgresConnectionInfo),
}

/// Ports show up both as numbers and as strings in stored blobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StoredPort {
    Number(u64),
    Text(String),
}

impl StoredPort {
    fn as_u16(&self) -> Option<u16> {
        match self {
            StoredPort::Number(n) => u16::try_from(*n).ok(),
            StoredPort::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StoredConnectionInfo {
    kind: Option<String>,
    #[serde(alias = "connectString")]
    connect_string: Option<String>,
    host: Option<String>,
    port: Option<StoredPort>,
    #[serde(alias = "username")]
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

impl StoredConnectionInfo {
    fn dialect(&self) -> Dialect {
        if self
            .connect_string
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
        {
            return Dialect::Oracle;
        }
        let port = self.port.as_ref().and_then(StoredPort::as_u16);
        if self.host.is_some() && port == Some(POSTGRES_DEFAULT_PORT) {
            return Dialect::Postgres;
        }
        match self.kind.as_deref() {
            Some(kind) if kind.eq_ignore_ascii_case("oracle") => Dialect::Oracle,
            _ => Dialect::Postgres,
        }
    }
}

impl DatabaseConnectionInfo {
    /// Parse and classify the untagged JSON blob kept by the central database.
    pub fn from_stored(value: &serde_json::Value) -> Result<Self, DbError> {
        let stored: StoredConnectionInfo = serde_json::from_value(value.clone())
            .map_err(|e| DbError::Config(format!("Invalid DATABASE_INFO: {}", e)))?;

        match stored.dialect() {
            Dialect::Oracle => Ok(DatabaseConnectionInfo::Oracle(OracleConnectionInfo {
                user: stored.user.unwrap_or_default(),
                password: stored.password.unwrap_or_default(),
                connect_string: stored.connect_string.ok_or_else(|| {
                    DbError::Config("Oracle connection info has no connectString".to_string())
                })?,
            })),
            Dialect::Postgres => {
                let port = stored
                    .port
                    .as_ref()
                    .and_then(StoredPort::as_u16)
                    .unwrap_or(POSTGRES_DEFAULT_PORT);
                Ok(DatabaseConnectionInfo::Postgres(PostgresConnectionInfo {
                    host: stored.host.unwrap_or_else(|| "localhost".to_string()),
                    port,
                    user: stored.user.unwrap_or_default(),
                    password: stored.password.unwrap_or_default(),
                    database: stored.database.unwrap_or_else(|| "postgres".to_string()),
                }))
            }
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DatabaseConnectionInfo::Oracle(_) => Dialect::Oracle,
            DatabaseConnectionInfo::Postgres(_) => Dialect::Postgres,
        }
    }
}

static HOST_PORT_SERVICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:/()\s]+):(\d+)/([^\s()]+)$").unwrap());

/// Expand `host:port/service` into a full TNS descriptor; leave descriptors,
/// `//host` easy-connect strings and aliases untouched.
pub fn normalize_connect_string(connect_string: &str) -> String {
    let trimmed = connect_string.trim();
    match HOST_PORT_SERVICE.captures(trimmed) {
        Some(caps) => format!(
            "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={})(PORT={}))(CONNECT_DATA=(SERVICE_NAME={})))",
            &caps[1], &caps[2], &caps[3]
        ),
        None => trimmed.to_string(),
    }
}
