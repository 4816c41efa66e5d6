//! Quote and comment aware scanning of SQL text.
//!
//! The scanner recognizes four kinds of non-code regions: single-quoted
//! strings, double-quoted strings, `--` line comments and `/* */` block
//! comments. A doubled quote inside a string (`''` or `""`) is an escaped
//! quote, not a terminator. Unterminated regions run to the end of input.

use std::ops::Range;

/// Kind of a scanned region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Code,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

#[derive(Debug, Clone)]
struct Segment {
    kind: SegmentKind,
    range: Range<usize>,
}

/// Split SQL into contiguous code / literal / comment regions.
fn scan(sql: &str) -> Vec<Segment> {
    let bytes = sql.as_bytes();
    let mut segments = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    // All delimiters are ASCII, so byte indices always land on char boundaries.
    while i < bytes.len() {
        let (kind, end) = match bytes[i] {
            b'\'' => (SegmentKind::SingleQuoted, quoted_end(bytes, i, b'\'')),
            b'"' => (SegmentKind::DoubleQuoted, quoted_end(bytes, i, b'"')),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p);
                (SegmentKind::LineComment, end)
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = sql[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
                (SegmentKind::BlockComment, end)
            }
            _ => {
                i += 1;
                continue;
            }
        };

        push(&mut segments, SegmentKind::Code, code_start..i);
        push(&mut segments, kind, i..end);
        i = end;
        code_start = end;
    }

    push(&mut segments, SegmentKind::Code, code_start..bytes.len());
    segments
}

fn push(segments: &mut Vec<Segment>, kind: SegmentKind, range: Range<usize>) {
    if !range.is_empty() {
        segments.push(Segment { kind, range });
    }
}

/// End (exclusive) of a quoted region starting at `start`.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Produce a cleaned copy of `sql` with string literals and comments
/// replaced by a single space.
///
/// Statement structure and top-level semicolons are preserved. The result is
/// only used for keyword and placeholder detection, never executed.
///
/// ```
/// use sql_gateway::sql::strip_comments_and_strings;
///
/// let cleaned = strip_comments_and_strings("SELECT 'a;b' -- note\nFROM t;");
/// assert_eq!(cleaned, "SELECT    \nFROM t;");
/// ```
pub fn strip_comments_and_strings(sql: &str) -> String {
    let mut cleaned = String::with_capacity(sql.len());
    for segment in scan(sql) {
        match segment.kind {
            SegmentKind::Code => cleaned.push_str(&sql[segment.range]),
            _ => cleaned.push(' '),
        }
    }
    cleaned
}

/// Remove comments but keep string literals intact.
///
/// Used when a statement has to be rewritten: the result is still
/// executable, and appending a clause can never land inside a trailing
/// line comment. Closed optimizer hints (`/*+ ... */`) and MySQL
/// executable comments (`/*! ... */`) are kept, since the server acts on them.
pub fn strip_comments(sql: &str) -> String {
    let mut stripped = String::with_capacity(sql.len());
    for segment in scan(sql) {
        let text = &sql[segment.range];
        match segment.kind {
            SegmentKind::BlockComment if is_server_comment(text) => stripped.push_str(text),
            SegmentKind::LineComment | SegmentKind::BlockComment => stripped.push(' '),
            _ => stripped.push_str(text),
        }
    }
    stripped
}

fn is_server_comment(comment: &str) -> bool {
    comment.len() >= 5
        && (comment.starts_with("/*+") || comment.starts_with("/*!"))
        && comment.ends_with("*/")
}

/// Split a batch on top-level semicolons.
///
/// Semicolons inside strings or comments do not split. Each returned
/// statement is the original text (comments and literals intact) trimmed of
/// surrounding whitespace; empty fragments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut start = 0;

    for segment in scan(sql) {
        if segment.kind != SegmentKind::Code {
            continue;
        }
        for (offset, _) in sql[segment.range.clone()].match_indices(';') {
            let end = segment.range.start + offset;
            push_statement(&mut statements, &sql[start..end]);
            start = end + 1;
        }
    }
    push_statement(&mut statements, &sql[start..]);

    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Whether a statement contains nothing but whitespace and comments.
pub fn is_blank_statement(statement: &str) -> bool {
    scan(statement).iter().all(|s| match s.kind {
        SegmentKind::Code => statement[s.range.clone()].trim().is_empty(),
        SegmentKind::LineComment | SegmentKind::BlockComment => true,
        SegmentKind::SingleQuoted | SegmentKind::DoubleQuoted => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_single_quoted() {
        assert_eq!(
            strip_comments_and_strings("SELECT 'price is $1' FROM t WHERE id = $1"),
            "SELECT   FROM t WHERE id = $1"
        );
    }

    #[test]
    fn test_strip_doubled_quote_escape() {
        let cleaned = strip_comments_and_strings("SELECT 'it''s ? here', ? FROM t");
        assert_eq!(cleaned, "SELECT  , ? FROM t");
        assert_eq!(cleaned.matches('?').count(), 1);
    }

    #[test]
    fn test_strip_double_quoted() {
        assert_eq!(
            strip_comments_and_strings(r#"SELECT "a""?b" FROM t"#),
            "SELECT   FROM t"
        );
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(
            strip_comments_and_strings("SELECT 1 -- $1 comment\nFROM t /* ? */ WHERE x"),
            "SELECT 1  \nFROM t   WHERE x"
        );
    }

    #[test]
    fn test_strip_unterminated_regions() {
        assert_eq!(strip_comments_and_strings("SELECT 'abc"), "SELECT  ");
        assert_eq!(strip_comments_and_strings("SELECT 1 /* open"), "SELECT 1  ");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let sql = "SELECT 'a;b', \"c\" -- x\n FROM t /* y */; DELETE FROM t";
        let once = strip_comments_and_strings(sql);
        assert_eq!(strip_comments_and_strings(&once), once);
    }

    #[test]
    fn test_strip_comments_keeps_literals() {
        assert_eq!(
            strip_comments("SELECT '--x' FROM t -- trailing"),
            "SELECT '--x' FROM t  "
        );
        assert_eq!(strip_comments("/* a */SELECT \"b\""), " SELECT \"b\"");
    }

    #[test]
    fn test_strip_comments_keeps_server_hints() {
        assert_eq!(
            strip_comments("SELECT /*+ MAX_EXECUTION_TIME(1000) */ * FROM t /* note */"),
            "SELECT /*+ MAX_EXECUTION_TIME(1000) */ * FROM t  "
        );
        assert_eq!(
            strip_comments("SELECT /*!40001 SQL_NO_CACHE */ 1"),
            "SELECT /*!40001 SQL_NO_CACHE */ 1"
        );
        // Unterminated hint is dropped like any other open comment
        assert_eq!(strip_comments("SELECT 1 /*+ x"), "SELECT 1  ");
    }

    #[test]
    fn test_split_statements() {
        assert_eq!(
            split_statements("SELECT 1; SELECT 2;"),
            vec!["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn test_split_ignores_quoted_and_commented_semicolons() {
        let statements =
            split_statements("INSERT INTO t VALUES ('a;b'); -- c;d\nSELECT \"x;y\" FROM t /* ; */");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO t VALUES ('a;b')");
        assert_eq!(statements[1], "-- c;d\nSELECT \"x;y\" FROM t /* ; */");
    }

    #[test]
    fn test_split_drops_empty_fragments() {
        assert_eq!(split_statements(" ; ;SELECT 1;; "), vec!["SELECT 1"]);
        assert!(split_statements("").is_empty());
    }

    #[test]
    fn test_is_blank_statement() {
        assert!(is_blank_statement("-- just a comment"));
        assert!(is_blank_statement("/* a */  -- b"));
        assert!(is_blank_statement("   "));
        assert!(!is_blank_statement("SELECT 1 -- trailing"));
        assert!(!is_blank_statement("'literal'"));
    }

    #[test]
    fn test_multibyte_text_is_preserved() {
        assert_eq!(
            strip_comments_and_strings("SELECT 'héllo', ünïcode FROM t"),
            "SELECT  , ünïcode FROM t"
        );
        assert_eq!(
            split_statements("SELECT 'é;'; SELECT ü"),
            vec!["SELECT 'é;'", "SELECT ü"]
        );
    }
}
