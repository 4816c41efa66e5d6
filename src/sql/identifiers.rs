//! Dialect-aware identifier quoting.
//!
//! Only used for identifiers that came back from an earlier metadata call
//! (schema, table, column names known to exist) when introspection SQL has
//! to be built dynamically. Arbitrary user text never goes through here.

use crate::dialect::Dialect;
use crate::error::GatewayError;

/// Opening and closing quote characters for a dialect.
fn delimiters(dialect: Dialect) -> (char, char) {
    match dialect {
        Dialect::Postgres | Dialect::Sqlite => ('"', '"'),
        Dialect::MySql | Dialect::MariaDb | Dialect::TDengine => ('`', '`'),
        Dialect::SqlServer => ('[', ']'),
    }
}

/// Quote a single identifier using the dialect's escape convention.
///
/// The closing delimiter is escaped by doubling it.
///
/// ```
/// use sql_gateway::dialect::Dialect;
/// use sql_gateway::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("Users", Dialect::Postgres).unwrap(), "\"Users\"");
/// assert_eq!(quote_identifier("Table[1]", Dialect::SqlServer).unwrap(), "[Table[1]]]");
/// assert_eq!(quote_identifier("a`b", Dialect::MySql).unwrap(), "`a``b`");
/// ```
pub fn quote_identifier(identifier: &str, dialect: Dialect) -> Result<String, GatewayError> {
    if identifier.is_empty() {
        return Err(GatewayError::invalid_identifier("Identifier cannot be empty"));
    }

    if identifier.chars().any(char::is_control) {
        return Err(GatewayError::invalid_identifier(format!(
            "Identifier contains NUL or control characters: {:?}",
            identifier
        )));
    }

    let (open, close) = delimiters(dialect);
    let escaped = identifier.replace(close, &format!("{close}{close}"));

    Ok(format!("{open}{escaped}{close}"))
}

/// Quote `schema.table`, each part independently.
pub fn quote_qualified(
    table: &str,
    schema: Option<&str>,
    dialect: Dialect,
) -> Result<String, GatewayError> {
    let table = quote_identifier(table, dialect)?;
    match schema {
        Some(schema) => Ok(format!("{}.{}", quote_identifier(schema, dialect)?, table)),
        None => Ok(table),
    }
}

/// Reverse [`quote_identifier`].
///
/// Input that is not wrapped in the dialect's delimiters is returned as is.
pub fn unquote_identifier(quoted: &str, dialect: Dialect) -> String {
    let (open, close) = delimiters(dialect);

    let inner = quoted
        .strip_prefix(open)
        .and_then(|rest| rest.strip_suffix(close));

    match inner {
        Some(inner) => inner.replace(&format!("{close}{close}"), &close.to_string()),
        None => quoted.to_string(),
    }
}
