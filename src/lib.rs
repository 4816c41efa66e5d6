//! # SQL Gateway
//!
//! A uniform query and introspection surface over several SQL dialects:
//! PostgreSQL, MySQL, MariaDB, SQL Server, SQLite and TDengine.
//!
//! This crate provides:
//! - **SQL safety layer**: comment and string aware tokenizing, read-only
//!   classification, placeholder validation, row limiting and identifier
//!   quoting, all per dialect
//! - **Connectors**: one live connection per source behind the
//!   [`Connector`] trait
//! - **Connector manager**: named sources with eager or lazy connection,
//!   deduplicated connect attempts and SSH tunnel fronting
//!
//! ## Example
//!
//! ```no_run
//! use sql_gateway::{ConnectorManager, SourceConfig};
//!
//! # async fn run() -> Result<(), sql_gateway::GatewayError> {
//! let manager = ConnectorManager::with_defaults(vec![SourceConfig::from_dsn(
//!     "local",
//!     "sqlite:///:memory:",
//! )])?;
//! manager.start().await?;
//!
//! let result = manager.execute(None, "SELECT 1 AS one", &[]).await?;
//! assert_eq!(result.row_count, 1);
//!
//! manager.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod dialect;
pub mod dsn;
pub mod error;
pub mod manager;
pub mod sql;
pub mod tunnel;

pub use config::{GatewayConfig, SourceConfig, SshTunnelConfig};
pub use database::{
    create_connector, Connector, ConnectorConfig, ConnectorFactory, ExecuteOptions, SqlResult,
    SqlValue,
};
pub use dialect::{Dialect, ParameterStyle};
pub use error::GatewayError;
pub use manager::{ConnectionState, ConnectorManager};
pub use tunnel::{Tunnel, TunnelProvider, TunnelTarget};
