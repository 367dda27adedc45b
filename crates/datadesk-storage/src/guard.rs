//! Read-only statement allow-list.
//!
//! Model-generated SQL is parsed before it reaches SQLite. Only a single
//! query statement passes. Statements the parser cannot handle fall back to
//! a leading-keyword check, and real syntax errors are left for SQLite to
//! report.

use std::sync::OnceLock;

use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;

pub const READ_ONLY_MESSAGE: &str = "only read-only SELECT queries are allowed";

/// Check that `sql` is exactly one read-only query.
pub fn ensure_read_only(sql: &str) -> Result<(), String> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [] => Err("empty statement".to_string()),
            [_] => Err(READ_ONLY_MESSAGE.to_string()),
            _ => Err(format!("{} (one statement at a time)", READ_ONLY_MESSAGE)),
        },
        Err(e) => {
            debug!(error = %e, "SQL parser rejected statement, using keyword check");
            leading_keyword_check(sql)
        }
    }
}

fn leading_keyword_check(sql: &str) -> Result<(), String> {
    let stripped = comment_regex().replace_all(sql, " ");
    let keyword = stripped
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => Ok(()),
        "" => Err("empty statement".to_string()),
        _ => Err(READ_ONLY_MESSAGE.to_string()),
    }
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").expect("Invalid comment regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_and_cte_pass() {
        assert!(ensure_read_only("SELECT * FROM equipment").is_ok());
        assert!(ensure_read_only("select id from equipment where name = 'Press'").is_ok());
        assert!(ensure_read_only(
            "WITH t AS (SELECT id FROM equipment) SELECT count(*) FROM t"
        )
        .is_ok());
        assert!(ensure_read_only("SELECT 1;").is_ok());
    }

    #[test]
    fn test_writes_are_rejected() {
        for sql in [
            "DELETE FROM equipment",
            "UPDATE equipment SET name = 'x'",
            "INSERT INTO equipment VALUES (1)",
            "DROP TABLE equipment",
            "CREATE TABLE x (a INTEGER)",
            "ATTACH DATABASE 'x.db' AS x",
        ] {
            assert_eq!(ensure_read_only(sql), Err(READ_ONLY_MESSAGE.to_string()), "{sql}");
        }
    }

    #[test]
    fn test_stacked_statements_are_rejected() {
        let err = ensure_read_only("SELECT 1; DROP TABLE equipment").unwrap_err();
        assert!(err.starts_with(READ_ONLY_MESSAGE));
    }

    #[test]
    fn test_empty_statement() {
        assert!(ensure_read_only("").is_err());
        assert!(ensure_read_only("   ").is_err());
    }

    #[test]
    fn test_keyword_fallback_strips_comments() {
        assert!(leading_keyword_check("-- list\n/* all */ SELECT 1").is_ok());
        assert!(leading_keyword_check("(SELECT 1)").is_ok());
        assert!(leading_keyword_check("/* sneaky */ delete from t").is_err());
        assert!(leading_keyword_check("-- only a comment").is_err());
    }
}
