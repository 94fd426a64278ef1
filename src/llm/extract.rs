//! Pulling SQL and JSON out of free-form model output.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

pub const SELECT_STARTERS: &[&str] = &["with", "select"];
pub const DML_STARTERS: &[&str] = &["insert", "update", "delete", "merge", "with"];

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?(</think>|$)").unwrap());
static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").unwrap());
static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[A-Za-z]*").unwrap());

/// Drop reasoning traces and markdown fences, keeping the fenced body when
/// there is one.
pub fn strip_code_fences(content: &str) -> String {
    let content = THINK_BLOCK.replace_all(content, "");
    if let Some(body) = FENCED_BLOCK.captures(&content).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }
    FENCE.replace_all(&content, "").trim().to_string()
}

/// The statement starting at the first of `starters` (matched as a whole
/// word, case-insensitively), cut after its first `;`.
pub fn extract_sql(content: &str, starters: &[&str]) -> Option<String> {
    let cleaned = strip_code_fences(content);
    let pattern = format!(r"(?i)\b({})\b", starters.join("|"));
    let start = Regex::new(&pattern).ok()?.find(&cleaned)?.start();

    let statement = &cleaned[start..];
    let statement = match statement.find(';') {
        Some(end) => &statement[..=end],
        None => statement,
    };
    let sql = statement.trim().to_string();
    debug!("Extracted SQL: {}", sql);
    Some(sql)
}

/// The first balanced-looking `{ ... }` object in the output.
pub fn extract_json(content: &str) -> Option<Value> {
    let cleaned = strip_code_fences(content);
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fenced_sql_is_unwrapped() {
        let content = "Here you go:\n```sql\nSELECT id FROM orders;\n```\nLet me know!";
        assert_eq!(
            extract_sql(content, SELECT_STARTERS).as_deref(),
            Some("SELECT id FROM orders;")
        );
    }

    #[test]
    fn sql_starts_at_first_keyword() {
        let content = "<think>the user wants totals</think>\nThe query is: with t as (select 1) select * from t";
        assert_eq!(
            extract_sql(content, SELECT_STARTERS).as_deref(),
            Some("with t as (select 1) select * from t")
        );
    }

    #[test]
    fn trailing_commentary_is_cut_at_semicolon() {
        let content = "UPDATE orders SET status = 'X' WHERE id = 4; This updates one row.";
        assert_eq!(
            extract_sql(content, DML_STARTERS).as_deref(),
            Some("UPDATE orders SET status = 'X' WHERE id = 4;")
        );
    }

    #[test]
    fn missing_statement_yields_none() {
        assert_eq!(extract_sql("I cannot answer that.", SELECT_STARTERS), None);
        assert_eq!(extract_sql("selection of rows", SELECT_STARTERS), None);
    }

    #[test]
    fn json_object_is_found_inside_prose() {
        let content = "Sure.\n```json\n{\"score\": 4, \"explanation\": \"fine\"}\n```";
        assert_eq!(
            extract_json(content),
            Some(json!({ "score": 4, "explanation": "fine" }))
        );
        assert_eq!(extract_json("no json here"), None);
    }
}
