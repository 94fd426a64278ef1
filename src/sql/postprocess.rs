//! Driver-neutral cell values and the display shaping applied to every
//! result row before it leaves the service.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};

/// One cell as decoded from either driver.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Json(Value),
}

/// Ordered column → value pairs for one row.
pub type Row = Vec<(String, CellValue)>;

const YEARISH_MIN: i64 = 1000;
const YEARISH_MAX: i64 = 9999;

fn locale_date(date: NaiveDate) -> String {
    date.format("%-m/%-d/%Y").to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn integer_value(value: i64) -> Value {
    if (YEARISH_MIN..=YEARISH_MAX).contains(&value) {
        Value::String(value.to_string())
    } else {
        Value::Number(value.into())
    }
}

/// Shape one cell for display.
///
/// Dates become `M/D/YYYY`, integers between 1000 and 9999 become strings
/// so charts treat them as labels, other fractional numbers are rounded to
/// two decimals.
pub fn format_cell(cell: CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Bool(b) => Value::Bool(b),
        CellValue::Int(i) => integer_value(i),
        CellValue::Float(f) if !f.is_finite() => Value::Null,
        CellValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            integer_value(f as i64)
        }
        CellValue::Float(f) => Number::from_f64(round2(f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CellValue::Text(s) => Value::String(s),
        CellValue::Date(d) => Value::String(locale_date(d)),
        CellValue::DateTime(dt) => Value::String(locale_date(dt.date())),
        CellValue::Json(v) => v,
    }
}

pub fn format_row(row: Row) -> Map<String, Value> {
    row.into_iter()
        .map(|(column, cell)| (column, format_cell(cell)))
        .collect()
}

pub fn format_rows(rows: Vec<Row>) -> Vec<Value> {
    rows.into_iter()
        .map(|row| Value::Object(format_row(row)))
        .collect()
}
