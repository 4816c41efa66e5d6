//! Supported SQL dialects and their per-dialect grammar facts.
//!
//! The dialect set is closed: every place that needs dialect-specific
//! behavior matches on [`Dialect`] instead of consulting a runtime registry.

use crate::constants::{
    DEFAULT_MYSQL_PORT, DEFAULT_POSTGRES_PORT, DEFAULT_SQLSERVER_PORT, DEFAULT_TDENGINE_PORT,
};
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

/// A supported SQL engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    MariaDb,
    SqlServer,
    Sqlite,
    TDengine,
}

/// Placeholder grammar accepted by a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterStyle {
    /// `$1`, `$2`, ...
    Numbered,
    /// `?`
    Positional,
    /// `@p1`, `@p2`, ...
    Named,
    /// No placeholders present.
    None,
}

impl ParameterStyle {
    /// Short example of the placeholder syntax, used in error messages.
    pub fn example(&self) -> &'static str {
        match self {
            Self::Numbered => "$1, $2",
            Self::Positional => "?, ?",
            Self::Named => "@p1, @p2",
            Self::None => "(none)",
        }
    }
}

impl std::fmt::Display for ParameterStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Numbered => "numbered",
            Self::Positional => "positional",
            Self::Named => "named",
            Self::None => "none",
        };
        write!(f, "{}", name)
    }
}

impl Dialect {
    /// All dialects in registration order.
    ///
    /// DSN detection walks this list and the first match wins.
    pub const ALL: [Dialect; 6] = [
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::MariaDb,
        Dialect::SqlServer,
        Dialect::Sqlite,
        Dialect::TDengine,
    ];

    /// Stable connector id.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::SqlServer => "sqlserver",
            Self::Sqlite => "sqlite",
            Self::TDengine => "tdengine",
        }
    }

    /// Human readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::MariaDb => "MariaDB",
            Self::SqlServer => "SQL Server",
            Self::Sqlite => "SQLite",
            Self::TDengine => "TDengine",
        }
    }

    /// URL schemes accepted in connection strings.
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgres", "postgresql"],
            Self::MySql => &["mysql"],
            Self::MariaDb => &["mariadb"],
            Self::SqlServer => &["sqlserver"],
            Self::Sqlite => &["sqlite"],
            Self::TDengine => &["tdengine"],
        }
    }

    /// Whether `dsn` is a connection string this dialect can handle.
    pub fn is_valid_dsn(&self, dsn: &str) -> bool {
        let Some((scheme, _)) = dsn.trim().split_once("://") else {
            return false;
        };
        self.schemes()
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    /// Find the first dialect whose DSN predicate matches.
    pub fn from_dsn(dsn: &str) -> Result<Self, GatewayError> {
        Self::ALL
            .into_iter()
            .find(|d| d.is_valid_dsn(dsn))
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "Unrecognized connection string scheme. Expected one of: {}",
                    Self::ALL
                        .iter()
                        .map(|d| format!("{}://", d.schemes()[0]))
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Default TCP port, if the dialect is network based.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(DEFAULT_POSTGRES_PORT),
            Self::MySql | Self::MariaDb => Some(DEFAULT_MYSQL_PORT),
            Self::SqlServer => Some(DEFAULT_SQLSERVER_PORT),
            Self::TDengine => Some(DEFAULT_TDENGINE_PORT),
            Self::Sqlite => None,
        }
    }

    /// The only placeholder grammar this dialect accepts.
    pub fn parameter_style(&self) -> ParameterStyle {
        match self {
            Self::Postgres => ParameterStyle::Numbered,
            Self::SqlServer => ParameterStyle::Named,
            Self::MySql | Self::MariaDb | Self::Sqlite | Self::TDengine => {
                ParameterStyle::Positional
            }
        }
    }

    /// Whether the dialect can bind statement parameters at all.
    pub fn supports_parameters(&self) -> bool {
        !matches!(self, Self::TDengine)
    }

    /// Leading keywords that mark a statement as read-only.
    pub fn readonly_keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["select", "with", "explain", "analyze", "show"],
            Self::MySql | Self::MariaDb => &[
                "select", "with", "explain", "analyze", "show", "describe", "desc",
            ],
            Self::Sqlite => &["select", "with", "explain", "analyze", "pragma"],
            Self::SqlServer => &["select", "with", "explain", "showplan"],
            Self::TDengine => &["select", "with", "explain", "show", "describe", "desc"],
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Error returned when parsing a dialect name fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDialectError(String);

impl std::fmt::Display for ParseDialectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid database type: '{}'", self.0)
    }
}

impl std::error::Error for ParseDialectError {}

impl std::str::FromStr for Dialect {
    type Err = ParseDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "mariadb" => Ok(Dialect::MariaDb),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "sqlite" => Ok(Dialect::Sqlite),
            "tdengine" => Ok(Dialect::TDengine),
            _ => Err(ParseDialectError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dsn() {
        assert_eq!(
            Dialect::from_dsn("postgres://u:p@h:5432/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_dsn("postgresql://u@h/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(Dialect::from_dsn("mysql://u@h/db").unwrap(), Dialect::MySql);
        assert_eq!(
            Dialect::from_dsn("mariadb://u@h/db").unwrap(),
            Dialect::MariaDb
        );
        assert_eq!(
            Dialect::from_dsn("sqlserver://u:p@h/db").unwrap(),
            Dialect::SqlServer
        );
        assert_eq!(
            Dialect::from_dsn("sqlite:///:memory:").unwrap(),
            Dialect::Sqlite
        );
        assert_eq!(
            Dialect::from_dsn("tdengine://root:taosdata@h:6041/db").unwrap(),
            Dialect::TDengine
        );
    }

    #[test]
    fn test_from_dsn_unknown_scheme() {
        let err = Dialect::from_dsn("oracle://h/db").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(Dialect::from_dsn("no scheme here").is_err());
    }

    #[test]
    fn test_parameter_styles() {
        assert_eq!(Dialect::Postgres.parameter_style(), ParameterStyle::Numbered);
        assert_eq!(Dialect::SqlServer.parameter_style(), ParameterStyle::Named);
        assert_eq!(Dialect::Sqlite.parameter_style(), ParameterStyle::Positional);
        assert_eq!(Dialect::TDengine.parameter_style(), ParameterStyle::Positional);
        assert!(!Dialect::TDengine.supports_parameters());
        assert!(Dialect::MariaDb.supports_parameters());
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
