//! Read-only statement classification.
//!
//! A statement is read-only when its leading keyword, after comments and
//! literals are neutralized, is on the dialect's allow-list. Classification
//! is purely lexical; it does not look inside CTE bodies.

use super::tokenizer::{split_statements, strip_comments_and_strings};
use crate::dialect::Dialect;
use crate::error::GatewayError;

/// Lower-cased leading keyword of a statement, ignoring comments, literals
/// and opening parentheses. `None` for an empty statement.
pub(crate) fn leading_keyword(statement: &str) -> Option<String> {
    let cleaned = strip_comments_and_strings(statement);
    let rest = cleaned.trim_start_matches(|c: char| c == '(' || c.is_whitespace());
    if rest.is_empty() {
        return None;
    }

    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let keyword = if end == 0 {
        rest.split_whitespace().next().unwrap_or(rest)
    } else {
        &rest[..end]
    };
    Some(keyword.to_lowercase())
}

/// Classify a single statement.
///
/// Empty and comment-only statements are vacuously read-only so a trailing
/// semicolon never blocks a batch.
pub fn is_read_only_statement(statement: &str, dialect: Dialect) -> bool {
    match leading_keyword(statement) {
        None => true,
        Some(keyword) => dialect.readonly_keywords().contains(&keyword.as_str()),
    }
}

/// Whether every statement of a batch is read-only.
pub fn is_read_only_sql(sql: &str, dialect: Dialect) -> bool {
    split_statements(sql)
        .iter()
        .all(|s| is_read_only_statement(s, dialect))
}

/// Reject a batch unless every statement is read-only.
///
/// Runs before anything executes; the error names the first offending
/// keyword so the caller can see which statement was refused.
pub fn ensure_read_only(sql: &str, dialect: Dialect) -> Result<(), GatewayError> {
    for (index, statement) in split_statements(sql).iter().enumerate() {
        if !is_read_only_statement(statement, dialect) {
            let keyword = leading_keyword(statement).unwrap_or_default();
            return Err(GatewayError::readonly_violation(format!(
                "statement {} ('{}') is not allowed in read-only mode for {}. Allowed: {}",
                index + 1,
                keyword.to_uppercase(),
                dialect.display_name(),
                dialect.readonly_keywords().join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_variants() {
        for dialect in Dialect::ALL {
            assert!(is_read_only_statement("SELECT * FROM t", dialect));
            assert!(is_read_only_statement("  select 1", dialect));
            assert!(is_read_only_statement(
                "WITH x AS (SELECT 1) SELECT * FROM x",
                dialect
            ));
            assert!(is_read_only_statement("EXPLAIN SELECT 1", dialect));
        }
    }

    #[test]
    fn test_mutations_are_not_read_only() {
        for dialect in Dialect::ALL {
            assert!(!is_read_only_statement("INSERT INTO t VALUES (1)", dialect));
            assert!(!is_read_only_statement("UPDATE t SET a = 1", dialect));
            assert!(!is_read_only_statement("DELETE FROM t", dialect));
            assert!(!is_read_only_statement("DROP TABLE t", dialect));
        }
    }

    #[test]
    fn test_pragma_only_for_sqlite() {
        assert!(is_read_only_statement("PRAGMA table_info(t)", Dialect::Sqlite));
        assert!(!is_read_only_statement(
            "PRAGMA table_info(t)",
            Dialect::Postgres
        ));
        assert!(!is_read_only_statement("PRAGMA table_info(t)", Dialect::MySql));
        assert!(!is_read_only_statement(
            "PRAGMA table_info(t)",
            Dialect::SqlServer
        ));
    }

    #[test]
    fn test_dialect_extras() {
        assert!(is_read_only_statement("SHOW TABLES", Dialect::MySql));
        assert!(is_read_only_statement("DESCRIBE t", Dialect::MariaDb));
        assert!(is_read_only_statement("desc t", Dialect::TDengine));
        assert!(is_read_only_statement("SHOWPLAN SELECT 1", Dialect::SqlServer));
        assert!(!is_read_only_statement("SHOW TABLES", Dialect::SqlServer));
        assert!(!is_read_only_statement("DESCRIBE t", Dialect::Postgres));
    }

    #[test]
    fn test_parenthesized_query_is_read_only() {
        for dialect in Dialect::ALL {
            assert!(is_read_only_statement("(SELECT 1)", dialect));
            assert!(is_read_only_statement(
                "((SELECT a FROM t) UNION (SELECT b FROM u))",
                dialect
            ));
        }
        assert!(!is_read_only_statement("(DELETE FROM t)", Dialect::Postgres));
        assert_eq!(leading_keyword("select(1)").as_deref(), Some("select"));
        assert_eq!(leading_keyword("@x = 1").as_deref(), Some("@x"));
    }

    #[test]
    fn test_leading_comment_is_ignored() {
        assert!(is_read_only_statement(
            "-- DELETE\n/* DROP */ SELECT 1",
            Dialect::Postgres
        ));
        assert!(!is_read_only_statement(
            "/* SELECT */ DELETE FROM t",
            Dialect::Postgres
        ));
    }

    #[test]
    fn test_empty_statement_is_read_only() {
        assert!(is_read_only_statement("", Dialect::Postgres));
        assert!(is_read_only_statement("-- nothing", Dialect::Postgres));
        assert!(is_read_only_sql("SELECT 1;", Dialect::Postgres));
    }

    #[test]
    fn test_batch_requires_every_statement() {
        assert!(is_read_only_sql("SELECT 1; SELECT 2", Dialect::Postgres));
        assert!(!is_read_only_sql(
            "SELECT 1; DELETE FROM t",
            Dialect::Postgres
        ));
        // Keyword hidden inside a literal does not split or classify
        assert!(is_read_only_sql(
            "SELECT 'x; DELETE FROM t'",
            Dialect::Postgres
        ));
    }

    #[test]
    fn test_ensure_read_only_error() {
        let err = ensure_read_only("SELECT 1; insert into t values (1)", Dialect::Sqlite)
            .unwrap_err();
        assert_eq!(err.code(), "READONLY_VIOLATION");
        let msg = err.to_string();
        assert!(msg.contains("statement 2"));
        assert!(msg.contains("INSERT"));
        assert!(ensure_read_only("SELECT 1; PRAGMA foreign_keys", Dialect::Sqlite).is_ok());
    }
}
