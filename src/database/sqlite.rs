//! SQLite connector over a single sqlx connection.
//!
//! DSNs are `sqlite:///path/to/file.db` or `sqlite:///:memory:`. Catalog
//! queries go through `PRAGMA`s, which cannot take bound parameters, so
//! every name is quoted before it is spliced in.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Connection, Executor, Row, Sqlite, SqliteConnection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::SQLITE_MAIN_SCHEMA;
use crate::database::connector::{
    init_statements, log_statement, not_connected, plan_batch, with_connect_timeout,
    with_query_timeout, Connector,
};
use crate::database::decode::sqlite_row;
use crate::database::types::{
    ConnectorConfig, ExecuteOptions, SqlResult, SqlValue, StoredProcedure, TableColumn,
    TableIndex,
};
use crate::dialect::Dialect;
use crate::error::GatewayError;
use crate::sql::quote_identifier;

/// Where an SQLite DSN points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl SqliteTarget {
    fn from_dsn(dsn: &str) -> Result<Self, GatewayError> {
        let rest = dsn
            .split_once("://")
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("sqlite"))
            .map(|(_, rest)| rest)
            .ok_or_else(|| GatewayError::config(format!("Invalid SQLite DSN '{}'", dsn)))?;

        // Query parameters are not used
        let path = rest.split('?').next().unwrap_or_default();

        match path.trim_start_matches('/') {
            "" => Err(GatewayError::config(format!(
                "SQLite DSN '{}' has no database path",
                dsn
            ))),
            ":memory:" => Ok(SqliteTarget::Memory),
            _ => Ok(SqliteTarget::File(PathBuf::from(path))),
        }
    }

    fn connect_options(&self, readonly: bool) -> Result<SqliteConnectOptions, GatewayError> {
        match self {
            SqliteTarget::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| GatewayError::config(e.to_string())),
            SqliteTarget::File(path) => Ok(SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(!readonly)
                .read_only(readonly)),
        }
    }
}

struct Session {
    conn: SqliteConnection,
    query_timeout: Option<Duration>,
}

/// SQLite connector.
#[derive(Default)]
pub struct SqliteConnector {
    source_id: String,
    session: Mutex<Option<Session>>,
}

impl SqliteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn session<'a>(&self, session: &'a mut Option<Session>) -> Result<&'a mut Session, GatewayError> {
        session
            .as_mut()
            .ok_or_else(|| not_connected(Dialect::Sqlite, &self.source_id))
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<SqliteRow>, GatewayError> {
        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard)?;

        let conn = &mut session.conn;
        with_query_timeout(session.query_timeout, async move {
            Ok(sqlx::query(sql).fetch_all(conn).await?)
        })
        .await
    }

    fn schema(schema: Option<&str>) -> Result<String, GatewayError> {
        quote_identifier(schema.unwrap_or(SQLITE_MAIN_SCHEMA), Dialect::Sqlite)
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Decimal(v) => query.bind(v.to_string()),
        SqlValue::Uuid(v) => query.bind(v.hyphenated().to_string()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeUtc(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(v.to_string()),
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn set_source_id(&mut self, source_id: &str) {
        self.source_id = source_id.to_string();
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn connect(
        &self,
        dsn: &str,
        init_script: Option<&str>,
        config: &ConnectorConfig,
    ) -> Result<(), GatewayError> {
        let target = SqliteTarget::from_dsn(dsn)?;
        let options = target.connect_options(config.readonly)?;

        let mut conn = with_connect_timeout(config, async {
            SqliteConnection::connect_with(&options).await.map_err(|e| {
                GatewayError::connection_with_source(format!("Failed to open {}", dsn), e)
            })
        })
        .await?;

        if let Some(script) = init_script {
            for statement in init_statements(script) {
                log_statement(&self.source_id, Dialect::Sqlite, &statement);
                conn.execute(statement.as_str()).await?;
            }
        }

        // An in-memory database cannot be opened read-only; lock it after seeding.
        if config.readonly && target == SqliteTarget::Memory {
            conn.execute("PRAGMA query_only = ON").await?;
        }

        info!(source_id = %self.source_id, database = ?target, "SQLite connected");

        *self.session.lock().await = Some(Session {
            conn,
            query_timeout: config.query_timeout(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        if let Some(session) = self.session.lock().await.take() {
            session.conn.close().await?;
            debug!(source_id = %self.source_id, "SQLite disconnected");
        }
        Ok(())
    }

    async fn get_schemas(&self) -> Result<Vec<String>, GatewayError> {
        self.fetch("SELECT name FROM pragma_database_list ORDER BY seq")
            .await?
            .iter()
            .map(|row| -> Result<String, GatewayError> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>, GatewayError> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            Self::schema(schema)?
        );
        self.fetch(&sql)
            .await?
            .iter()
            .map(|row| -> Result<String, GatewayError> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableColumn>, GatewayError> {
        let sql = format!(
            "PRAGMA {}.table_info({})",
            Self::schema(schema)?,
            quote_identifier(table, Dialect::Sqlite)?
        );
        self.fetch(&sql)
            .await?
            .iter()
            .map(|row| -> Result<_, GatewayError> {
                Ok(TableColumn {
                    column_name: row.try_get("name")?,
                    data_type: row.try_get("type")?,
                    is_nullable: row.try_get::<i64, _>("notnull")? == 0
                        && row.try_get::<i64, _>("pk")? == 0,
                    column_default: row.try_get("dflt_value")?,
                    description: None,
                })
            })
            .collect()
    }

    async fn get_table_indexes(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableIndex>, GatewayError> {
        let schema = Self::schema(schema)?;
        let list_sql = format!(
            "PRAGMA {}.index_list({})",
            schema,
            quote_identifier(table, Dialect::Sqlite)?
        );

        let mut indexes = Vec::new();
        for row in self.fetch(&list_sql).await? {
            let index_name: String = row.try_get("name")?;
            let info_sql = format!(
                "PRAGMA {}.index_info({})",
                schema,
                quote_identifier(&index_name, Dialect::Sqlite)?
            );
            let column_names = self
                .fetch(&info_sql)
                .await?
                .iter()
                .map(|r| -> Result<String, GatewayError> { Ok(r.try_get("name")?) })
                .collect::<Result<Vec<_>, _>>()?;

            indexes.push(TableIndex {
                is_unique: row.try_get::<i64, _>("unique")? != 0,
                is_primary: row.try_get::<String, _>("origin")? == "pk",
                index_name,
                column_names,
            });
        }

        Ok(indexes)
    }

    async fn get_stored_procedures(
        &self,
        _schema: Option<&str>,
    ) -> Result<Vec<String>, GatewayError> {
        // SQLite has no stored procedures
        Ok(Vec::new())
    }

    async fn get_stored_procedure_detail(
        &self,
        _procedure: &str,
        _schema: Option<&str>,
    ) -> Result<StoredProcedure, GatewayError> {
        Err(GatewayError::unsupported(
            "SQLite does not support stored procedures",
        ))
    }

    async fn execute_sql(
        &self,
        sql: &str,
        options: &ExecuteOptions,
        parameters: &[SqlValue],
    ) -> Result<SqlResult, GatewayError> {
        let plan = plan_batch(sql, Dialect::Sqlite, options, parameters)?;

        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard)?;
        let mut result = SqlResult::default();

        for statement in &plan {
            log_statement(&self.source_id, Dialect::Sqlite, &statement.sql);

            let mut query = sqlx::query(&statement.sql).persistent(false);
            for value in parameters {
                query = bind_value(query, value);
            }

            let conn = &mut session.conn;
            let outcome = if statement.returns_rows {
                with_query_timeout(session.query_timeout, async move {
                    let rows = query.fetch_all(conn).await?;
                    Ok(SqlResult::from_rows(rows.iter().map(sqlite_row).collect()))
                })
                .await?
            } else {
                with_query_timeout(session.query_timeout, async move {
                    Ok(SqlResult::affected(query.execute(conn).await?.rows_affected()))
                })
                .await?
            };
            result.absorb(outcome);
        }

        Ok(result)
    }
}
