//! Database connectivity and query execution.

pub mod connector;
mod decode;
pub mod mysql;
pub mod postgres;
pub mod registry;
pub mod sqlite;
pub mod sqlserver;
pub mod tdengine;
pub mod types;

pub use connector::{init_statements, plan_batch, Connector, PlannedStatement};
pub use decode::TypeMapper;
pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;
pub use registry::{connector_for_dsn, create_connector, ConnectorFactory, DefaultConnectorFactory};
pub use sqlite::SqliteConnector;
pub use sqlserver::SqlServerConnector;
pub use tdengine::TDengineConnector;
pub use types::{
    ConnectorConfig, ExecuteOptions, ResultRow, SqlResult, SqlValue, StoredProcedure,
    TableColumn, TableIndex,
};
