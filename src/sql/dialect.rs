//! PostgreSQL → Oracle rewriting for generated SQL.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Oracle,
    Postgres,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Oracle => "Oracle",
            Dialect::Postgres => "PostgreSQL",
        }
    }

    /// Dialect-specific rules injected into every SQL-producing prompt.
    pub fn prompt_rules(&self) -> Vec<&'static str> {
        match self {
            Dialect::Oracle => vec![
                "Use Oracle SQL syntax.",
                "Constant expressions must select FROM DUAL.",
                "Limit rows with FETCH FIRST n ROWS ONLY, never LIMIT.",
                "Do not wrap identifiers in double quotes.",
                "Use TO_CHAR / TO_DATE / TRUNC for date handling.",
            ],
            Dialect::Postgres => vec![
                "Use PostgreSQL syntax.",
                "Constant expressions use a bare SELECT without FROM.",
                "Limit rows with LIMIT n.",
                "Use DATE_TRUNC / TO_CHAR / EXTRACT for date handling.",
            ],
        }
    }

    /// Last-resort query handed out when SQL generation fails outright.
    pub fn fallback_query(&self) -> &'static str {
        match self {
            Dialect::Oracle => {
                "SELECT 'Unable to generate a query for this request' AS message FROM DUAL"
            }
            Dialect::Postgres => "SELECT 'Unable to generate a query for this request' AS message",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const SYSTEM_TABLES: [&str; 3] = ["ALL_TABLES", "USER_TABLES", "DUAL"];

static POSITIONAL_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$(\d+)").unwrap());
static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(:?\d+)").unwrap());
static LIMIT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());
static SYSTEM_TABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ALL_TABLES|USER_TABLES|DUAL)\b").unwrap());
static PREFIXED_SYSTEM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?[A-Za-z_][A-Za-z0-9_$#]*"?\s*\.\s*(ALL_TABLES|USER_TABLES|DUAL)\b"#)
        .unwrap()
});
static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(FROM|JOIN)(\s+)([A-Za-z_][A-Za-z0-9_$#]*)(\s*\.)?").unwrap()
});
static CTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)([A-Za-z_][A-Za-z0-9_$#]*)\s*(?:\([^)]*\)\s*)?AS\s*\(")
        .unwrap()
});
static SUBQUERY_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(SELECT|WITH)\b").unwrap());

/// Does the statement look like it was written for PostgreSQL?
pub fn is_postgres_style(sql: &str) -> bool {
    sql.contains('"') || POSITIONAL_PARAM.is_match(sql) || LIMIT_KEYWORD.is_match(sql)
}

pub fn references_system_table(sql: &str) -> bool {
    SYSTEM_TABLE_REF.is_match(sql)
}

fn is_system_table(name: &str) -> bool {
    SYSTEM_TABLES.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// Rewrite PostgreSQL-flavoured SQL for an Oracle tenant owned by `user`.
///
/// Quotes are stripped, `$n` becomes `:n` and `LIMIT n` becomes
/// `FETCH FIRST n ROWS ONLY`. Queries against the data dictionary lose any
/// schema prefix; every other unqualified table after `FROM`/`JOIN` is
/// qualified with the upper-cased user. Running it on its own output is a
/// no-op.
pub fn adapt_sql_for_oracle(sql: &str, user: &str) -> String {
    let system_query = references_system_table(sql);
    let mut adapted = sql.to_string();

    if is_postgres_style(&adapted) && !system_query {
        adapted = adapted.replace('"', "");
        adapted = POSITIONAL_PARAM.replace_all(&adapted, ":$1").into_owned();
        adapted = LIMIT_CLAUSE
            .replace_all(&adapted, "FETCH FIRST $1 ROWS ONLY")
            .into_owned();
    }

    if system_query {
        return PREFIXED_SYSTEM_TABLE
            .replace_all(&adapted, "$1")
            .into_owned();
    }

    qualify_tables(&adapted, user)
}

/// Does a `FROM`/`JOIN` right after `prefix` introduce a table?
///
/// Not when it sits inside a string literal, nor inside a parenthesis that
/// opens a function call such as `EXTRACT(YEAR FROM d)` or
/// `TRIM(BOTH ' ' FROM name)`. Only subquery parentheses count.
fn introduces_table(prefix: &str) -> bool {
    let mut in_literal = false;
    let mut open_parens: Vec<usize> = Vec::new();

    for (i, c) in prefix.char_indices() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => open_parens.push(i),
            ')' if !in_literal => {
                open_parens.pop();
            }
            _ => {}
        }
    }

    if in_literal {
        return false;
    }
    match open_parens.last() {
        None => true,
        Some(&at) => SUBQUERY_START.is_match(&prefix[at + 1..]),
    }
}

fn qualify_tables(sql: &str, user: &str) -> String {
    let owner = user.trim().to_uppercase();
    if owner.is_empty() {
        return sql.to_string();
    }

    let cte_names: HashSet<String> = CTE_NAME
        .captures_iter(sql)
        .map(|caps| caps[1].to_uppercase())
        .collect();

    TABLE_REFERENCE
        .replace_all(sql, |caps: &Captures| {
            let whole = caps[0].to_string();
            let name = &caps[3];
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);

            let already_qualified = caps.get(4).is_some();
            if already_qualified
                || !introduces_table(&sql[..start])
                || is_system_table(name)
                || cte_names.contains(&name.to_uppercase())
            {
                return whole;
            }

            format!("{}{}{}.{}", &caps[1], &caps[2], owner, name)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn postgres_style_is_rewritten() {
        let sql = r#"SELECT "name", "total" FROM "orders" WHERE "region" = $1 LIMIT 10"#;
        assert_eq!(
            adapt_sql_for_oracle(sql, "sales"),
            "SELECT name, total FROM SALES.orders WHERE region = :1 FETCH FIRST 10 ROWS ONLY"
        );
    }

    #[test]
    fn joins_are_qualified_and_qualified_tables_left_alone() {
        let sql = "SELECT o.id FROM orders o JOIN hr.staff s ON s.id = o.staff_id LEFT JOIN items i ON i.order_id = o.id";
        assert_eq!(
            adapt_sql_for_oracle(sql, "sales"),
            "SELECT o.id FROM SALES.orders o JOIN hr.staff s ON s.id = o.staff_id LEFT JOIN SALES.items i ON i.order_id = o.id"
        );
    }

    #[test]
    fn system_tables_lose_injected_prefix() {
        assert_eq!(
            adapt_sql_for_oracle("SELECT table_name FROM SALES.USER_TABLES", "sales"),
            "SELECT table_name FROM USER_TABLES"
        );
        assert_eq!(
            adapt_sql_for_oracle("SELECT 1 FROM DUAL", "sales"),
            "SELECT 1 FROM DUAL"
        );
    }

    #[test]
    fn system_table_queries_keep_quotes() {
        let sql = r#"SELECT "TABLE_NAME" FROM ALL_TABLES"#;
        assert_eq!(adapt_sql_for_oracle(sql, "sales"), sql);
    }

    #[test]
    fn output_is_stable_under_reapplication() {
        let inputs = [
            r#"SELECT "name" FROM "orders" LIMIT 5"#,
            "SELECT * FROM orders o JOIN customers c ON c.id = o.customer_id",
            "WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent",
            "SELECT EXTRACT(YEAR FROM created_at) AS yr FROM orders",
            "SELECT sysdate FROM DUAL",
        ];
        for input in inputs {
            let once = adapt_sql_for_oracle(input, "sales");
            let twice = adapt_sql_for_oracle(&once, "sales");
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn cte_names_and_extract_are_not_prefixed() {
        assert_eq!(
            adapt_sql_for_oracle(
                "WITH recent AS (SELECT * FROM orders) SELECT EXTRACT(YEAR FROM created_at) FROM recent",
                "sales"
            ),
            "WITH recent AS (SELECT * FROM SALES.orders) SELECT EXTRACT(YEAR FROM created_at) FROM recent"
        );
    }

    #[test]
    fn string_literals_are_never_qualified() {
        assert_eq!(
            adapt_sql_for_oracle(
                "SELECT id FROM orders WHERE note = 'shipped from warehouse'",
                "sales"
            ),
            "SELECT id FROM SALES.orders WHERE note = 'shipped from warehouse'"
        );
        assert_eq!(
            adapt_sql_for_oracle(
                "SELECT 'it''s from here' AS t FROM orders JOIN lines l ON l.id = orders.id",
                "sales"
            ),
            "SELECT 'it''s from here' AS t FROM SALES.orders JOIN SALES.lines l ON l.id = orders.id"
        );
    }

    #[test]
    fn function_arguments_are_not_tables() {
        assert_eq!(
            adapt_sql_for_oracle(
                "SELECT TRIM(BOTH ' ' FROM customer_name) AS n FROM customers",
                "sales"
            ),
            "SELECT TRIM(BOTH ' ' FROM customer_name) AS n FROM SALES.customers"
        );
        assert_eq!(
            adapt_sql_for_oracle(
                "SELECT COUNT(*) FROM (SELECT id FROM orders WHERE id IN (1, 2)) t",
                "sales"
            ),
            "SELECT COUNT(*) FROM (SELECT id FROM SALES.orders WHERE id IN (1, 2)) t"
        );
    }

    #[test]
    fn bound_limit_becomes_fetch_first() {
        assert_eq!(
            adapt_sql_for_oracle("SELECT id FROM orders LIMIT $1", "sales"),
            "SELECT id FROM SALES.orders FETCH FIRST :1 ROWS ONLY"
        );
    }

    #[test]
    fn detection_heuristics() {
        assert!(is_postgres_style(r#"SELECT "a" FROM t"#));
        assert!(is_postgres_style("SELECT a FROM t WHERE id = $2"));
        assert!(is_postgres_style("select a from t limit 3"));
        assert!(!is_postgres_style("SELECT a FROM t FETCH FIRST 3 ROWS ONLY"));
        assert!(references_system_table("select * from user_tables"));
    }
}
