//! Comment and string aware SQL analysis shared by every dialect.
//!
//! Nothing in this module parses SQL. It scans just enough structure
//! (quotes, comments, top-level semicolons) to drive read-only
//! classification, placeholder validation, row-limit rewriting and
//! identifier quoting without being fooled by literal text.

pub mod identifiers;
pub mod limit;
pub mod parameters;
pub mod readonly;
pub mod tokenizer;

pub use identifiers::{quote_identifier, quote_qualified, unquote_identifier};
pub use limit::{apply_max_rows, apply_max_rows_to_statement};
pub use parameters::{count_parameters, detect_parameter_style, validate_parameter_style};
pub use readonly::{ensure_read_only, is_read_only_statement, is_read_only_sql};
pub use tokenizer::{is_blank_statement, split_statements, strip_comments_and_strings};

/// Truncate SQL for logging purposes, respecting char boundaries.
pub fn truncate_for_log(sql: &str, max_len: usize) -> String {
    if sql.len() <= max_len {
        return sql.to_string();
    }
    let mut end = max_len;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &sql[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(
            truncate_for_log("this is a long string", 10),
            "this is a ..."
        );
        // Multi-byte characters are never split
        assert_eq!(truncate_for_log("ééééé", 3), "é...");
    }
}
