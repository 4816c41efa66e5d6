//! Server-side row limiting.
//!
//! Query-shaped statements get their row cap pushed into the engine by
//! rewriting or appending the dialect's limit clause. Mutations, DDL,
//! non-`SELECT` read-only statements and CTE-prefixed queries pass through
//! untouched.

use super::readonly::{is_read_only_statement, leading_keyword};
use super::tokenizer::{split_statements, strip_comments};
use crate::dialect::Dialect;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

/// Trailing `LIMIT n`, `LIMIT m, n` or `LIMIT n OFFSET m`.
static TRAILING_LIMIT: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\blimit\s+(\d+)(?:\s*,\s*(\d+))?(\s+offset\s+\d+)?\s*$")
});

/// Trailing `LIMIT` whose count is not a literal (`LIMIT $1`, `LIMIT ?`, `LIMIT ALL`).
static TRAILING_NON_LITERAL_LIMIT: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\blimit\s+(?:\$\d+|\?|@\w+|all)(?:\s+offset\s+\S+)?\s*$")
});

/// Trailing `FETCH FIRST|NEXT n ROW[S] ONLY|WITH TIES` with a literal count.
static TRAILING_FETCH: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)(\bfetch\s+(?:next|first)\s+)(\d+)(\s+rows?\s+(?:only|with\s+ties)\s*)$")
});

/// Any trailing `FETCH` clause, including `FETCH FIRST ROW ONLY` and `FETCH FIRST $1 ROWS ONLY`.
static TRAILING_ANY_FETCH: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\bfetch\s+(?:next|first)\b[^;]*\brows?\s+(?:only|with\s+ties)\s*$")
});

/// Trailing row-locking clauses, which must follow `LIMIT`.
static TRAILING_LOCKING: Lazy<Regex> = Lazy::new(|| {
    compile(
        r#"(?i)(?:\s+(?:for\s+(?:update|share|no\s+key\s+update|key\s+share)(?:\s+of\s+[\w."`,\s]+?)?(?:\s+(?:nowait|skip\s+locked))?|lock\s+in\s+share\s+mode))+\s*$"#,
    )
});

/// `SELECT [DISTINCT|ALL] TOP n` / `TOP (n)` at the start of a statement.
static SQLSERVER_TOP: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)^(\s*select\s+(?:distinct\s+|all\s+)?)top\s*(\()?\s*(\d+)(?:\s*(\)))?(\s+percent\b)?")
});

/// Any `TOP` right after `SELECT`, literal or not.
static SQLSERVER_ANY_TOP: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^\s*select\s+(?:distinct\s+|all\s+)?top\b"));

/// `SELECT [DISTINCT|ALL]` prefix where `TOP n` is inserted.
static SQLSERVER_SELECT_PREFIX: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^(\s*select\s+(?:distinct\s+|all\s+)?)"));

/// Trailing `OFFSET m ROWS FETCH NEXT n ROWS ONLY`.
static SQLSERVER_FETCH: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)(\bfetch\s+(?:next|first)\s+)(\d+)(\s+rows?\s+only\s*)$")
});

/// Trailing `OFFSET m ROWS` without a `FETCH`.
static SQLSERVER_OFFSET: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\boffset\s+\S+\s+rows?\s*$"));

/// Apply a row cap to every statement of a batch.
///
/// With `max_rows` absent the batch is returned unchanged.
pub fn apply_max_rows(sql: &str, max_rows: Option<u32>, dialect: Dialect) -> String {
    let Some(max_rows) = max_rows else {
        return sql.to_string();
    };

    split_statements(sql)
        .iter()
        .map(|s| apply_max_rows_to_statement(s, max_rows, dialect))
        .collect::<Vec<_>>()
        .join(";\n")
}

/// Apply a row cap to a single statement.
///
/// The effective limit is `min(existing, max_rows)` when the statement
/// already carries a literal limit, otherwise `max_rows`.
pub fn apply_max_rows_to_statement(statement: &str, max_rows: u32, dialect: Dialect) -> String {
    if !is_row_limitable(statement, dialect) {
        return statement.to_string();
    }

    let code = strip_comments(statement);
    let code = code.trim();
    let max_rows = u64::from(max_rows);

    match dialect {
        Dialect::SqlServer => limit_sqlserver(code, max_rows),
        _ => limit_trailing(code, max_rows),
    }
}

/// Only plain `SELECT` statements that classify as read-only are rewritten.
///
/// CTE-prefixed queries are deliberately left alone.
fn is_row_limitable(statement: &str, dialect: Dialect) -> bool {
    is_read_only_statement(statement, dialect)
        && leading_keyword(statement).as_deref() == Some("select")
}

fn limit_trailing(code: &str, max_rows: u64) -> String {
    let (body, locking) = match TRAILING_LOCKING.find(code) {
        Some(m) => code.split_at(m.start()),
        None => (code, ""),
    };
    format!("{}{}", limit_body(body, max_rows), locking)
}

fn limit_body(code: &str, max_rows: u64) -> String {
    if let Some(caps) = TRAILING_FETCH.captures(code) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        return format!(
            "{}{}{}{}",
            &code[..whole.start],
            &caps[1],
            capped(&caps[2], max_rows),
            &caps[3]
        );
    }

    if TRAILING_ANY_FETCH.is_match(code) || TRAILING_NON_LITERAL_LIMIT.is_match(code) {
        return code.to_string();
    }

    if let Some(caps) = TRAILING_LIMIT.captures(code) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let clause = match caps.get(2) {
            // MySQL `LIMIT offset, count`
            Some(count) => format!(
                "LIMIT {}, {}",
                &caps[1],
                capped(count.as_str(), max_rows)
            ),
            None => format!(
                "LIMIT {}{}",
                capped(&caps[1], max_rows),
                caps.get(3).map_or("", |m| m.as_str())
            ),
        };
        return format!("{}{}", &code[..whole.start], clause);
    }

    format!("{} LIMIT {}", code, max_rows)
}

fn limit_sqlserver(code: &str, max_rows: u64) -> String {
    if SQLSERVER_FETCH.is_match(code) {
        return SQLSERVER_FETCH
            .replace(code, |c: &Captures| {
                format!("{}{}{}", &c[1], capped(&c[2], max_rows), &c[3])
            })
            .into_owned();
    }

    if SQLSERVER_OFFSET.is_match(code) {
        return format!("{} FETCH NEXT {} ROWS ONLY", code, max_rows);
    }

    if let Some(caps) = SQLSERVER_TOP.captures(code) {
        if caps.get(5).is_some() {
            // TOP n PERCENT cannot be compared to a row count
            return code.to_string();
        }
        return SQLSERVER_TOP
            .replace(code, |c: &Captures| {
                format!("{}TOP {}", &c[1], capped(&c[3], max_rows))
            })
            .into_owned();
    }

    if SQLSERVER_ANY_TOP.is_match(code) {
        return code.to_string();
    }

    SQLSERVER_SELECT_PREFIX
        .replace(code, |c: &Captures| format!("{}TOP {} ", &c[1], max_rows))
        .into_owned()
}

/// `min(existing, max_rows)`; an unparseable existing value yields `max_rows`.
fn capped(existing: &str, max_rows: u64) -> u64 {
    existing
        .parse::<u64>()
        .map_or(max_rows, |n| n.min(max_rows))
}
