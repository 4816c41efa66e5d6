//! Error types for the SQL gateway.
//!
//! This module defines the semantic error taxonomy shared by the SQL safety
//! layer, every connector and the connector manager. Each variant carries a
//! stable machine-readable code so callers can distinguish, for example, a
//! read-only violation from a generic execution failure.

use thiserror::Error;

/// Domain errors for the SQL gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed connection string or missing required field
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or authentication failure while connecting
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Driver-reported SQL error
    #[error("Query execution error: {message}")]
    Execution {
        message: String,
        sql_error_code: Option<i32>,
        sql_state: Option<String>,
    },

    /// A statement in a read-only batch is not on the dialect's allow-list
    #[error("Read-only violation: {0}")]
    ReadonlyViolation(String),

    /// Placeholder style or count does not match the supplied parameters
    #[error("Parameter validation failed: {0}")]
    ParameterValidation(String),

    /// Identifier rejected by the quoter
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Unknown source id
    #[error("Source '{id}' not found. Available sources: {}", available.join(", "))]
    SourceNotFound { id: String, available: Vec<String> },

    /// Connect or query phase exceeded its time budget
    #[error("Timeout: {phase} exceeded {timeout_seconds} seconds")]
    Timeout {
        phase: &'static str,
        timeout_seconds: u64,
    },

    /// The dialect lacks a capability the caller asked for
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Connector used before `connect()` or after `disconnect()`
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// SSH tunnel could not be established
    #[error("SSH tunnel error: {0}")]
    Tunnel(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution {
            message: msg.into(),
            sql_error_code: None,
            sql_state: None,
        }
    }

    /// Create a query execution error with SQL error details.
    pub fn execution_with_code(msg: impl Into<String>, code: i32, state: Option<String>) -> Self {
        Self::Execution {
            message: msg.into(),
            sql_error_code: Some(code),
            sql_state: state,
        }
    }

    /// Create a read-only violation error.
    pub fn readonly_violation(msg: impl Into<String>) -> Self {
        Self::ReadonlyViolation(msg.into())
    }

    /// Create a parameter validation error.
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::ParameterValidation(msg.into())
    }

    /// Create an invalid identifier error.
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Create a source-not-found error listing the ids that do exist.
    pub fn source_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        Self::SourceNotFound {
            id: id.into(),
            available,
        }
    }

    /// Create a timeout error for the connect phase.
    pub fn connect_timeout(seconds: u64) -> Self {
        Self::Timeout {
            phase: "connection",
            timeout_seconds: seconds,
        }
    }

    /// Create a timeout error for the query phase.
    pub fn query_timeout(seconds: u64) -> Self {
        Self::Timeout {
            phase: "query",
            timeout_seconds: seconds,
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a not connected error.
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Create a tunnel error.
    pub fn tunnel(msg: impl Into<String>) -> Self {
        Self::Tunnel(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Copy of this error for another observer of the same failure.
    ///
    /// A boxed source cannot be cloned, so it is folded into the message.
    pub fn replicate(&self) -> Self {
        match self {
            Self::Config(m) => Self::Config(m.clone()),
            Self::Connection { message, source } => Self::Connection {
                message: match source {
                    Some(source) => format!("{}: {}", message, source),
                    None => message.clone(),
                },
                source: None,
            },
            Self::Execution {
                message,
                sql_error_code,
                sql_state,
            } => Self::Execution {
                message: message.clone(),
                sql_error_code: *sql_error_code,
                sql_state: sql_state.clone(),
            },
            Self::ReadonlyViolation(m) => Self::ReadonlyViolation(m.clone()),
            Self::ParameterValidation(m) => Self::ParameterValidation(m.clone()),
            Self::InvalidIdentifier(m) => Self::InvalidIdentifier(m.clone()),
            Self::SourceNotFound { id, available } => Self::SourceNotFound {
                id: id.clone(),
                available: available.clone(),
            },
            Self::Timeout {
                phase,
                timeout_seconds,
            } => Self::Timeout {
                phase: *phase,
                timeout_seconds: *timeout_seconds,
            },
            Self::Unsupported(m) => Self::Unsupported(m.clone()),
            Self::NotConnected(m) => Self::NotConnected(m.clone()),
            Self::Tunnel(m) => Self::Tunnel(m.clone()),
            Self::Internal(m) => Self::Internal(m.clone()),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::ReadonlyViolation(_) => "READONLY_VIOLATION",
            Self::ParameterValidation(_) => "PARAMETER_VALIDATION_ERROR",
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::SourceNotFound { .. } => "SOURCE_NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::NotConnected(_) => "NOT_CONNECTED",
            Self::Tunnel(_) => "TUNNEL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is transient and may succeed if the caller retries.
    ///
    /// The gateway itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Tunnel(_)
        )
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check the connection string and source configuration"),
            Self::Connection { .. } => {
                Some("Check server hostname, port, credentials, and network connectivity")
            }
            Self::ReadonlyViolation(_) => {
                Some("Only read-only statements are allowed for this source")
            }
            Self::ParameterValidation(_) => {
                Some("Use the placeholder style of the dialect and supply one value per parameter")
            }
            Self::SourceNotFound { .. } => Some("Use one of the configured source ids"),
            Self::Timeout { .. } => Some("Try a simpler query or increase the timeout limit"),
            Self::Tunnel(_) => Some("Check the SSH host, port, and credentials"),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        use sqlx::Error;

        match e {
            Error::Configuration(err) => GatewayError::config(err.to_string()),
            Error::Database(db_err) => {
                let state = db_err.code().map(|c| c.into_owned());
                GatewayError::Execution {
                    message: db_err.message().to_string(),
                    sql_error_code: None,
                    sql_state: state,
                }
            }
            Error::Io(err) => GatewayError::connection_with_source("IO error", err),
            Error::Tls(err) => GatewayError::connection(format!("TLS error: {}", err)),
            Error::Protocol(msg) => GatewayError::connection(format!("Protocol error: {}", msg)),
            Error::PoolTimedOut => GatewayError::connection("Timed out waiting for a connection"),
            Error::PoolClosed => GatewayError::not_connected("connection closed"),
            other => GatewayError::execution(other.to_string()),
        }
    }
}

impl From<tiberius::error::Error> for GatewayError {
    fn from(e: tiberius::error::Error) -> Self {
        use tiberius::error::Error;

        match &e {
            Error::Server(token) => GatewayError::execution_with_code(
                token.message().to_string(),
                token.code() as i32,
                None,
            ),
            Error::Io { .. } => GatewayError::connection(format!("IO error: {}", e)),
            Error::Tls(_) => GatewayError::connection(format!("TLS error: {}", e)),
            Error::Protocol(_) => GatewayError::connection(format!("Protocol error: {}", e)),
            Error::Routing { .. } => GatewayError::connection(e.to_string()),
            Error::Conversion(_) => {
                GatewayError::execution(format!("Type conversion error: {}", e))
            }
            _ => GatewayError::execution(e.to_string()),
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(e: url::ParseError) -> Self {
        GatewayError::config(format!("Invalid connection string: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let readonly = GatewayError::readonly_violation("INSERT");
        let exec = GatewayError::execution("syntax error");
        assert_eq!(readonly.code(), "READONLY_VIOLATION");
        assert_eq!(exec.code(), "EXECUTION_ERROR");
        assert_ne!(readonly.code(), exec.code());
    }

    #[test]
    fn test_source_not_found_lists_ids() {
        let err = GatewayError::source_not_found("x", vec!["a".into(), "b".into()]);
        let msg = err.to_string();
        assert!(msg.contains("'x'"));
        assert!(msg.contains("a, b"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(GatewayError::query_timeout(30).is_transient());
        assert!(GatewayError::connection("refused").is_transient());
        assert!(!GatewayError::config("bad dsn").is_transient());
        assert!(!GatewayError::readonly_violation("DROP").is_transient());
    }

    #[test]
    fn test_error_suggestions() {
        assert!(GatewayError::parameter("gap").suggestion().is_some());
        assert!(GatewayError::internal("unknown").suggestion().is_none());
    }

    #[test]
    fn test_replicate_keeps_code_and_source_text() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = GatewayError::connection_with_source("Failed to connect to db:5432", io);
        let copy = err.replicate();
        assert_eq!(copy.code(), err.code());
        assert!(copy.to_string().contains("refused"));

        let timeout = GatewayError::connect_timeout(3).replicate();
        assert_eq!(timeout.to_string(), GatewayError::connect_timeout(3).to_string());
    }

    #[test]
    fn test_timeout_message_names_phase() {
        assert!(GatewayError::connect_timeout(5)
            .to_string()
            .contains("connection exceeded 5 seconds"));
    }
}
