//! Read-only guard for generated SQL.
//!
//! The default [`DenylistValidator`] is a keyword scan, not a parser: a
//! forbidden word anywhere in the cleaned text, string literals and
//! identifiers included, rejects the statement.

use regex::Regex;
use std::sync::LazyLock;

pub const READ_ONLY_VIOLATION: &str = "Only safe, read-only queries are allowed";
pub const DML_VIOLATION: &str = "Only INSERT, UPDATE, DELETE or MERGE statements are allowed";

static FORBIDDEN_IN_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(drop|delete|insert|update|alter|truncate|create|grant|revoke)\b").unwrap()
});
static FORBIDDEN_IN_DML: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(drop|alter|truncate|create|grant|revoke)\b").unwrap()
});
static WRITE_AFTER_CTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\)\s*(insert|update|delete|merge)\b").unwrap());

/// Trim, drop trailing semicolons and leading `--` comment lines.
pub fn clean_sql(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    trimmed
        .lines()
        .skip_while(|line| {
            let line = line.trim_start();
            line.is_empty() || line.starts_with("--")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Strategy seam so a real SQL parser can replace the keyword scan.
pub trait SqlValidator: Send + Sync {
    /// Returns the cleaned statement when it may run on the read path.
    fn validate_select(&self, sql: &str) -> Result<String, String>;

    /// Returns the cleaned statement when it may run on the write path.
    fn validate_dml(&self, sql: &str) -> Result<String, String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DenylistValidator;

impl SqlValidator for DenylistValidator {
    fn validate_select(&self, sql: &str) -> Result<String, String> {
        let cleaned = clean_sql(sql);
        let lowered = cleaned.to_lowercase();

        if !(lowered.starts_with("select") || lowered.starts_with("with")) {
            return Err(READ_ONLY_VIOLATION.to_string());
        }
        if FORBIDDEN_IN_SELECT.is_match(&cleaned) {
            return Err(READ_ONLY_VIOLATION.to_string());
        }
        Ok(cleaned)
    }

    fn validate_dml(&self, sql: &str) -> Result<String, String> {
        let cleaned = clean_sql(sql);
        let lowered = cleaned.to_lowercase();

        // A leading CTE must feed a write, not a plain SELECT
        let allowed = if lowered.starts_with("with") {
            WRITE_AFTER_CTE.is_match(&cleaned)
        } else {
            ["insert", "update", "delete", "merge"]
                .iter()
                .any(|kw| lowered.starts_with(kw))
        };
        if !allowed || FORBIDDEN_IN_DML.is_match(&cleaned) {
            return Err(DML_VIOLATION.to_string());
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_strips_comments_and_semicolons() {
        assert_eq!(
            clean_sql("  -- top customers\n-- by revenue\nSELECT * FROM t;;  \n"),
            "SELECT * FROM t"
        );
    }

    #[test]
    fn non_select_statements_are_rejected() {
        let validator = DenylistValidator;
        for sql in ["EXPLAIN SELECT 1", "show tables", "VALUES (1)", ""] {
            assert_eq!(
                validator.validate_select(sql).unwrap_err(),
                READ_ONLY_VIOLATION,
                "{}",
                sql
            );
        }
    }

    #[test]
    fn forbidden_keywords_are_rejected_after_select() {
        let validator = DenylistValidator;
        assert_eq!(
            validator.validate_select("SELECT 1; DROP TABLE x;").unwrap_err(),
            READ_ONLY_VIOLATION
        );
        assert!(validator
            .validate_select("with x as (select 1) delete from y")
            .is_err());
    }

    #[test]
    fn keywords_inside_literals_still_trip_the_scan() {
        let validator = DenylistValidator;
        assert!(validator
            .validate_select("SELECT * FROM audit WHERE action = 'update'")
            .is_err());
        // Only whole words count
        assert!(validator
            .validate_select("SELECT last_updated, created_at FROM orders")
            .is_ok());
    }

    #[test]
    fn select_and_cte_pass_cleaned() {
        let validator = DenylistValidator;
        assert_eq!(
            validator.validate_select("-- note\nwith t as (select 1 a) select a from t;").unwrap(),
            "with t as (select 1 a) select a from t"
        );
    }

    #[test]
    fn dml_path_accepts_writes_but_not_ddl() {
        let validator = DenylistValidator;
        assert!(validator.validate_dml("UPDATE orders SET status = 'x' WHERE id = 1;").is_ok());
        assert!(validator.validate_dml("DELETE FROM orders WHERE id = 1").is_ok());
        assert_eq!(
            validator.validate_dml("DROP TABLE orders").unwrap_err(),
            DML_VIOLATION
        );
        assert!(validator.validate_dml("SELECT 1").is_err());
    }

    #[test]
    fn dml_path_needs_a_write_after_a_cte() {
        let validator = DenylistValidator;
        assert!(validator
            .validate_dml("WITH stale AS (SELECT id FROM orders WHERE age > 90) DELETE FROM orders WHERE id IN (SELECT id FROM stale)")
            .is_ok());
        assert_eq!(
            validator
                .validate_dml("WITH t AS (SELECT 'delete' AS op FROM orders) SELECT * FROM t")
                .unwrap_err(),
            DML_VIOLATION
        );
    }
}
