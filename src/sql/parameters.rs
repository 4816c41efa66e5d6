//! Placeholder detection and validation.
//!
//! Each dialect binds exactly one placeholder grammar. Detection always runs
//! on the cleaned SQL so placeholders inside literals or comments are never
//! counted.

use super::tokenizer::strip_comments_and_strings;
use crate::dialect::{Dialect, ParameterStyle};
use crate::error::GatewayError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Regex patterns for placeholder detection.
///
/// These patterns are compiled once at first use (lazy static) for performance.
/// All patterns are hardcoded constants that have been verified to be valid regex.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

// `col$1` and other identifiers containing `$` are not placeholders.
static NUMBERED_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"(?:^|[^$\w])\$(\d+)"));

// `@@` system variables and `x@p1` inside words are not placeholders.
static NAMED_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"(?i)(?:^|[^@\w])@p(\d+)\b"));

static POSITIONAL_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"\?"));

/// Detect which placeholder style a statement uses.
///
/// Numbered is checked before named before positional.
pub fn detect_parameter_style(sql: &str) -> ParameterStyle {
    detect_cleaned(&strip_comments_and_strings(sql))
}

fn detect_cleaned(cleaned: &str) -> ParameterStyle {
    if NUMBERED_PATTERN.is_match(cleaned) {
        ParameterStyle::Numbered
    } else if NAMED_PATTERN.is_match(cleaned) {
        ParameterStyle::Named
    } else if POSITIONAL_PATTERN.is_match(cleaned) {
        ParameterStyle::Positional
    } else {
        ParameterStyle::None
    }
}

/// Ensure the statement's placeholders match the dialect's grammar.
///
/// A statement without placeholders always passes.
pub fn validate_parameter_style(sql: &str, dialect: Dialect) -> Result<(), GatewayError> {
    let detected = detect_parameter_style(sql);
    let expected = dialect.parameter_style();

    if detected == ParameterStyle::None || detected == expected {
        return Ok(());
    }

    Err(GatewayError::parameter(format!(
        "Invalid parameter syntax for {}: found {} placeholders ({}), expected {} placeholders ({})",
        dialect.display_name(),
        detected,
        detected.example(),
        expected,
        expected.example()
    )))
}

/// Count the argument slots a statement requires.
///
/// Numbered and named placeholders must reference indices sequential from
/// 1. An index may repeat, but a gap is an error naming the first missing
/// index. Positional placeholders are independent slots.
pub fn count_parameters(sql: &str) -> Result<usize, GatewayError> {
    let cleaned = strip_comments_and_strings(sql);

    match detect_cleaned(&cleaned) {
        ParameterStyle::None => Ok(0),
        ParameterStyle::Positional => Ok(POSITIONAL_PATTERN.find_iter(&cleaned).count()),
        ParameterStyle::Numbered => sequential_count(&NUMBERED_PATTERN, &cleaned, "$"),
        ParameterStyle::Named => sequential_count(&NAMED_PATTERN, &cleaned, "@p"),
    }
}

fn sequential_count(pattern: &Regex, cleaned: &str, prefix: &str) -> Result<usize, GatewayError> {
    let mut indices = BTreeSet::new();
    for caps in pattern.captures_iter(cleaned) {
        let index = caps[1].parse::<usize>().map_err(|_| {
            GatewayError::parameter(format!("Parameter index {}{} is too large", prefix, &caps[1]))
        })?;
        if index == 0 {
            return Err(GatewayError::parameter(format!(
                "Parameter indices start at 1, found {}0",
                prefix
            )));
        }
        indices.insert(index);
    }

    let max = indices.last().copied().unwrap_or(0);
    if let Some(missing) = (1..=max).find(|i| !indices.contains(i)) {
        return Err(GatewayError::parameter(format!(
            "Parameters must be sequential starting at {}1: {}{} is missing",
            prefix, prefix, missing
        )));
    }

    Ok(max)
}

/// Validate caller-supplied parameter values against a single statement.
///
/// Checks dialect support, placeholder style, and that exactly one value is
/// supplied per argument slot.
pub fn check_parameters(sql: &str, dialect: Dialect, supplied: usize) -> Result<(), GatewayError> {
    if !dialect.supports_parameters() {
        return Err(GatewayError::unsupported(format!(
            "{} does not support parameterized queries",
            dialect.display_name()
        )));
    }

    validate_parameter_style(sql, dialect)?;

    let expected = count_parameters(sql)?;
    if expected != supplied {
        return Err(GatewayError::parameter(format!(
            "Statement expects {} parameter(s) but {} were provided",
            expected, supplied
        )));
    }

    Ok(())
}
