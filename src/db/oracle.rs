//! Oracle access. Every call opens its own connection and closes it before
//! returning; nothing here is pooled. All functions block and are meant to
//! run on the blocking thread pool.

use ::oracle::sql_type::OracleType;
use ::oracle::{Connection, SqlValue};
use tracing::{debug, warn};

use crate::db::connection::{normalize_connect_string, OracleConnectionInfo};
use crate::db::DbError;
use crate::sql::postprocess::{CellValue, Row};

fn connect(info: &OracleConnectionInfo) -> Result<Connection, DbError> {
    let connect_string = normalize_connect_string(&info.connect_string);
    debug!("Opening Oracle connection as {}", info.user);
    Connection::connect(&info.user, &info.password, &connect_string).map_err(DbError::from)
}

/// Run `work` on a fresh connection and close it whatever the outcome.
fn with_connection<T>(
    info: &OracleConnectionInfo,
    work: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    let conn = connect(info)?;
    let result = work(&conn);
    if let Err(e) = conn.close() {
        warn!("Failed to close Oracle connection: {}", e);
    }
    result
}

fn number_cell(value: &SqlValue) -> Result<CellValue, ::oracle::Error> {
    let text: String = value.get()?;
    if let Ok(i) = text.parse::<i64>() {
        return Ok(CellValue::Int(i));
    }
    Ok(text
        .parse::<f64>()
        .map(CellValue::Float)
        .unwrap_or(CellValue::Text(text)))
}

fn decode_cell(value: &SqlValue, oracle_type: &OracleType) -> Result<CellValue, ::oracle::Error> {
    if value.is_null()? {
        return Ok(CellValue::Null);
    }
    let cell = match oracle_type {
        OracleType::Number(_, _)
        | OracleType::Float(_)
        | OracleType::Int64
        | OracleType::UInt64 => number_cell(value)?,
        OracleType::BinaryFloat | OracleType::BinaryDouble => CellValue::Float(value.get()?),
        OracleType::Boolean => CellValue::Bool(value.get()?),
        OracleType::Date | OracleType::Timestamp(_) | OracleType::TimestampLTZ(_) => {
            CellValue::DateTime(value.get::<chrono::NaiveDateTime>()?)
        }
        OracleType::TimestampTZ(_) => CellValue::DateTime(
            value
                .get::<chrono::DateTime<chrono::FixedOffset>>()?
                .naive_local(),
        ),
        _ => CellValue::Text(value.get()?),
    };
    Ok(cell)
}

pub fn query_rows(info: &OracleConnectionInfo, sql: &str) -> Result<Vec<Row>, DbError> {
    with_connection(info, |conn| {
        let result_set = conn.query(sql, &[])?;
        let columns: Vec<(String, OracleType)> = result_set
            .column_info()
            .iter()
            .map(|c| (c.name().to_string(), c.oracle_type().clone()))
            .collect();

        let mut rows = Vec::new();
        for row in result_set {
            let row = row?;
            let decoded = row
                .sql_values()
                .iter()
                .zip(&columns)
                .map(|(value, (name, oracle_type))| {
                    Ok((name.clone(), decode_cell(value, oracle_type)?))
                })
                .collect::<Result<Row, ::oracle::Error>>()?;
            rows.push(decoded);
        }
        Ok(rows)
    })
}

pub fn execute(info: &OracleConnectionInfo, sql: &str) -> Result<u64, DbError> {
    with_connection(info, |conn| {
        let stmt = conn.execute(sql, &[])?;
        let affected = stmt.row_count()?;
        conn.commit()?;
        Ok(affected)
    })
}

/// What a best-effort dictionary lookup could establish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleTableListing {
    Tables(Vec<String>),
    /// Only `SELECT 1 FROM DUAL` worked: the database is up, tables unknown.
    ReachableOnly,
}

pub fn list_tables(info: &OracleConnectionInfo) -> Result<OracleTableListing, DbError> {
    with_connection(info, |conn| {
        let lookups = [
            "SELECT table_name FROM USER_TABLES",
            "SELECT object_name FROM USER_OBJECTS WHERE object_type IN ('TABLE', 'VIEW')",
        ];
        for sql in lookups {
            match conn.query_as::<String>(sql, &[]) {
                Ok(rows) => {
                    let tables = rows.collect::<Result<Vec<String>, _>>()?;
                    return Ok(OracleTableListing::Tables(tables));
                }
                Err(e) => warn!("Oracle dictionary lookup failed ({}): {}", sql, e),
            }
        }
        conn.query_row("SELECT 1 FROM DUAL", &[])?;
        Ok(OracleTableListing::ReachableOnly)
    })
}
