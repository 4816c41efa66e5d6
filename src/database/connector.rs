//! The connector interface every dialect implements, plus the batch
//! planning shared by all of them.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::constants::MAX_LOGGED_SQL_LENGTH;
use crate::database::types::{
    ConnectorConfig, ExecuteOptions, SqlResult, SqlValue, StoredProcedure, TableColumn,
    TableIndex,
};
use crate::dialect::Dialect;
use crate::error::GatewayError;
use crate::sql::parameters::check_parameters;
use crate::sql::{
    apply_max_rows_to_statement, ensure_read_only, is_blank_statement, is_read_only_statement,
    split_statements, truncate_for_log,
};

/// One live connection to one logical source.
///
/// Instances come from [`create_connector`](crate::database::create_connector)
/// unconnected; the owner assigns a source id, calls [`connect`](Self::connect)
/// once, and [`disconnect`](Self::disconnect) when done. Access to the native
/// connection is serialized inside the implementation, so a connector can be
/// shared behind an `Arc`.
#[async_trait]
pub trait Connector: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Stable connector id such as `postgres`.
    fn id(&self) -> &'static str {
        self.dialect().id()
    }

    /// Human-readable dialect name.
    fn name(&self) -> &'static str {
        self.dialect().display_name()
    }

    /// Source id assigned by the owner; empty until assigned.
    fn source_id(&self) -> &str;

    fn set_source_id(&mut self, source_id: &str);

    async fn is_connected(&self) -> bool;

    /// Open the native connection and run `init_script`, if any.
    async fn connect(
        &self,
        dsn: &str,
        init_script: Option<&str>,
        config: &ConnectorConfig,
    ) -> Result<(), GatewayError>;

    /// Close the native connection. Closing a closed connector is a no-op.
    async fn disconnect(&self) -> Result<(), GatewayError>;

    async fn get_schemas(&self) -> Result<Vec<String>, GatewayError>;

    /// Table names in `schema`, or in the dialect's default schema.
    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>, GatewayError>;

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> Result<bool, GatewayError> {
        Ok(self.get_tables(schema).await?.iter().any(|t| t == table))
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableColumn>, GatewayError>;

    async fn get_table_indexes(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableIndex>, GatewayError>;

    async fn get_stored_procedures(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<String>, GatewayError>;

    async fn get_stored_procedure_detail(
        &self,
        procedure: &str,
        schema: Option<&str>,
    ) -> Result<StoredProcedure, GatewayError>;

    /// Execute a batch.
    ///
    /// Statements run strictly in order. Rows are collected from query-shaped
    /// statements only; `row_count` accumulates returned and affected rows.
    async fn execute_sql(
        &self,
        sql: &str,
        options: &ExecuteOptions,
        parameters: &[SqlValue],
    ) -> Result<SqlResult, GatewayError>;
}

/// A statement ready for the native driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    /// SQL after row limiting.
    pub sql: String,

    /// Whether the statement returns rows.
    pub returns_rows: bool,
}

/// Turn a batch into the statements a connector should run.
///
/// Every check happens here, before anything executes: the read-only gate,
/// parameter support and shape, and row limiting per statement.
pub fn plan_batch(
    sql: &str,
    dialect: Dialect,
    options: &ExecuteOptions,
    parameters: &[SqlValue],
) -> Result<Vec<PlannedStatement>, GatewayError> {
    if options.readonly {
        ensure_read_only(sql, dialect)?;
    }

    let statements: Vec<String> = split_statements(sql)
        .into_iter()
        .filter(|s| !is_blank_statement(s))
        .collect();

    if !parameters.is_empty() {
        if !dialect.supports_parameters() {
            return Err(GatewayError::unsupported(format!(
                "{} does not support parameterized queries",
                dialect.display_name()
            )));
        }
        if statements.len() != 1 {
            return Err(GatewayError::parameter(format!(
                "Parameters can only be used with a single statement, found {}",
                statements.len()
            )));
        }
        check_parameters(&statements[0], dialect, parameters.len())?;
    }

    Ok(statements
        .into_iter()
        .map(|statement| {
            let returns_rows = is_read_only_statement(&statement, dialect);
            let sql = match options.max_rows {
                Some(max_rows) if returns_rows => {
                    apply_max_rows_to_statement(&statement, max_rows, dialect)
                }
                _ => statement,
            };
            PlannedStatement { sql, returns_rows }
        })
        .collect())
}

/// Statements of an init script, in order, blanks dropped.
pub fn init_statements(script: &str) -> Vec<String> {
    split_statements(script)
        .into_iter()
        .filter(|s| !is_blank_statement(s))
        .collect()
}

/// Log a statement about to run, truncated.
pub(crate) fn log_statement(source_id: &str, dialect: Dialect, sql: &str) {
    debug!(
        source_id,
        dialect = dialect.id(),
        sql = %truncate_for_log(sql, MAX_LOGGED_SQL_LENGTH),
        "Executing statement"
    );
}

/// Bound a connect attempt.
pub(crate) async fn with_connect_timeout<T, F>(
    config: &ConnectorConfig,
    future: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::time::timeout(config.connection_timeout(), future)
        .await
        .map_err(|_| GatewayError::connect_timeout(config.connection_timeout_seconds))?
}

/// Bound one execute phase; unbounded when no query timeout is set.
pub(crate) async fn with_query_timeout<T, F>(
    timeout: Option<Duration>,
    future: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .map_err(|_| GatewayError::query_timeout(duration.as_secs()))?,
        None => future.await,
    }
}

/// Error for a connector used before `connect()`.
pub(crate) fn not_connected(dialect: Dialect, source_id: &str) -> GatewayError {
    GatewayError::not_connected(format!(
        "{} connector for source '{}' is not connected",
        dialect.display_name(),
        source_id
    ))
}
