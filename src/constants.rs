//! Centralized constants for the SQL gateway.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout as Duration.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS);

/// HTTP request timeout for REST-based dialects when no query timeout is set.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Default Ports
// =============================================================================

/// Default PostgreSQL port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default MySQL / MariaDB port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Default SQL Server port.
pub const DEFAULT_SQLSERVER_PORT: u16 = 1433;

/// Default TDengine REST (taosAdapter) port.
pub const DEFAULT_TDENGINE_PORT: u16 = 6041;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

// =============================================================================
// Source Constants
// =============================================================================

/// Source id used when a single source is configured without an explicit id.
pub const DEFAULT_SOURCE_ID: &str = "default";

/// Default schema for PostgreSQL introspection.
pub const POSTGRES_DEFAULT_SCHEMA: &str = "public";

/// Default schema for SQL Server introspection.
pub const SQLSERVER_DEFAULT_SCHEMA: &str = "dbo";

/// The only schema an SQLite connection exposes.
pub const SQLITE_MAIN_SCHEMA: &str = "main";

/// Path appended to the TDengine base URL for SQL over REST.
pub const TDENGINE_REST_PATH: &str = "/rest/sql";

/// Loopback address that SSH tunnels bind to.
pub const TUNNEL_LOOPBACK_HOST: &str = "127.0.0.1";

// =============================================================================
// Logging Constants
// =============================================================================

/// Maximum SQL length written to logs before truncation.
pub const MAX_LOGGED_SQL_LENGTH: usize = 200;
