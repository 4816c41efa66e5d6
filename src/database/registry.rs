//! Dialect to connector dispatch.

use crate::database::connector::Connector;
use crate::database::mysql::MySqlConnector;
use crate::database::postgres::PostgresConnector;
use crate::database::sqlite::SqliteConnector;
use crate::database::sqlserver::SqlServerConnector;
use crate::database::tdengine::TDengineConnector;
use crate::dialect::Dialect;
use crate::error::GatewayError;

/// Create a fresh, unconnected connector for `dialect`.
pub fn create_connector(dialect: Dialect) -> Box<dyn Connector> {
    match dialect {
        Dialect::Postgres => Box::new(PostgresConnector::new()),
        Dialect::MySql => Box::new(MySqlConnector::mysql()),
        Dialect::MariaDb => Box::new(MySqlConnector::mariadb()),
        Dialect::SqlServer => Box::new(SqlServerConnector::new()),
        Dialect::Sqlite => Box::new(SqliteConnector::new()),
        Dialect::TDengine => Box::new(TDengineConnector::new()),
    }
}

/// Create a connector for whichever dialect accepts `dsn`.
pub fn connector_for_dsn(dsn: &str) -> Result<Box<dyn Connector>, GatewayError> {
    Ok(create_connector(Dialect::from_dsn(dsn)?))
}

/// Source of per-source connector instances.
///
/// Every call must return a new instance; connectors are never shared
/// between sources.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, dialect: Dialect) -> Box<dyn Connector>;
}

/// Factory backed by [`create_connector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnectorFactory;

impl ConnectorFactory for DefaultConnectorFactory {
    fn create(&self, dialect: Dialect) -> Box<dyn Connector> {
        create_connector(dialect)
    }
}
