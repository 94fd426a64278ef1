use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use tracing::debug;

use crate::db::DbError;
use crate::sql::postprocess::{CellValue, Row};

fn decimal_cell(value: Decimal) -> CellValue {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return CellValue::Int(i);
        }
    }
    value
        .to_f64()
        .map(CellValue::Float)
        .unwrap_or_else(|| CellValue::Text(value.to_string()))
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> Result<CellValue, sqlx::Error> {
    let cell = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(CellValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)?
            .map(|v| CellValue::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)?
            .map(|v| CellValue::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(CellValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|v| CellValue::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(CellValue::Float),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(idx)?.map(decimal_cell),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)?
            .map(CellValue::Date),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)?
            .map(CellValue::DateTime),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?
            .map(|v| CellValue::DateTime(v.naive_utc())),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(CellValue::Json),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)?
            .map(|v| CellValue::Text(v.to_string())),
        other => match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => v.map(CellValue::Text),
            Err(e) => {
                debug!("Cannot decode column type {} as text: {}", other, e);
                None
            }
        },
    };
    Ok(cell.unwrap_or(CellValue::Null))
}

pub fn decode_row(row: &PgRow) -> Result<Row, DbError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = decode_cell(row, idx, column.type_info().name())?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

pub async fn fetch_rows(pool: &PgPool, sql: &str) -> Result<Vec<Row>, DbError> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    rows.iter().map(decode_row).collect()
}

pub async fn execute(pool: &PgPool, sql: &str) -> Result<u64, DbError> {
    let result = sqlx::query(sql).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Names of the user tables visible through `information_schema`.
pub async fn list_tables(pool: &PgPool) -> Result<Vec<String>, DbError> {
    let tables = sqlx::query_scalar::<_, String>(
        "SELECT table_name::text FROM information_schema.tables \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema')",
    )
    .fetch_all(pool)
    .await?;
    Ok(tables)
}
