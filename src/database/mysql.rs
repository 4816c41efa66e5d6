//! MySQL and MariaDB connector over a single sqlx connection.
//!
//! Both dialects share the wire protocol and catalog layout; the instance
//! only remembers which of the two it was created for.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Connection, Execute, Executor, MySql, MySqlConnection, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::database::connector::{
    init_statements, log_statement, not_connected, plan_batch, with_connect_timeout,
    with_query_timeout, Connector,
};
use crate::database::decode::mysql_row;
use crate::database::types::{
    ConnectorConfig, ExecuteOptions, SqlResult, SqlValue, StoredProcedure, TableColumn,
    TableIndex,
};
use crate::dialect::Dialect;
use crate::dsn::obfuscate_dsn;
use crate::error::GatewayError;

const SCHEMAS_SQL: &str = "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA \
     WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys') \
     ORDER BY SCHEMA_NAME";

// A NULL schema falls back to the connection's current database.
const TABLES_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) ORDER BY TABLE_NAME";

const TABLE_EXISTS_SQL: &str = "SELECT COUNT(*) FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?";

const COLUMNS_SQL: &str = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), \
     CAST(IS_NULLABLE AS CHAR), CAST(COLUMN_DEFAULT AS CHAR), CAST(COLUMN_COMMENT AS CHAR) \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

const INDEXES_SQL: &str = "SELECT CAST(INDEX_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR), \
     CAST(NON_UNIQUE AS SIGNED) \
     FROM information_schema.STATISTICS \
     WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
     ORDER BY INDEX_NAME, SEQ_IN_INDEX";

const PROCEDURES_SQL: &str = "SELECT CAST(ROUTINE_NAME AS CHAR) FROM information_schema.ROUTINES \
     WHERE ROUTINE_SCHEMA = COALESCE(?, DATABASE()) ORDER BY ROUTINE_NAME";

const PROCEDURE_DETAIL_SQL: &str = "SELECT CAST(r.ROUTINE_NAME AS CHAR), \
     CAST(LOWER(r.ROUTINE_TYPE) AS CHAR), CAST(r.ROUTINE_BODY AS CHAR), \
     CAST((SELECT GROUP_CONCAT(CONCAT_WS(' ', p.PARAMETER_MODE, p.PARAMETER_NAME, p.DTD_IDENTIFIER) \
           ORDER BY p.ORDINAL_POSITION SEPARATOR ', ') \
      FROM information_schema.PARAMETERS p \
      WHERE p.SPECIFIC_SCHEMA = r.ROUTINE_SCHEMA AND p.SPECIFIC_NAME = r.ROUTINE_NAME \
      AND p.ORDINAL_POSITION > 0) AS CHAR), \
     CAST(CASE WHEN r.ROUTINE_TYPE = 'FUNCTION' THEN r.DTD_IDENTIFIER END AS CHAR), \
     CAST(r.ROUTINE_DEFINITION AS CHAR) \
     FROM information_schema.ROUTINES r \
     WHERE r.ROUTINE_SCHEMA = COALESCE(?, DATABASE()) AND r.ROUTINE_NAME = ? \
     LIMIT 1";

struct Session {
    conn: MySqlConnection,
    query_timeout: Option<Duration>,
}

/// MySQL / MariaDB connector.
pub struct MySqlConnector {
    dialect: Dialect,
    source_id: String,
    session: Mutex<Option<Session>>,
}

impl MySqlConnector {
    pub fn mysql() -> Self {
        Self::with_dialect(Dialect::MySql)
    }

    pub fn mariadb() -> Self {
        Self::with_dialect(Dialect::MariaDb)
    }

    fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            source_id: String::new(),
            session: Mutex::new(None),
        }
    }

    fn session<'a>(&self, session: &'a mut Option<Session>) -> Result<&'a mut Session, GatewayError> {
        session
            .as_mut()
            .ok_or_else(|| not_connected(self.dialect, &self.source_id))
    }

    async fn fetch(&self, sql: &str, binds: &[Option<&str>]) -> Result<Vec<MySqlRow>, GatewayError> {
        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard)?;

        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(*value);
        }

        let conn = &mut session.conn;
        with_query_timeout(session.query_timeout, async move {
            Ok(query.fetch_all(conn).await?)
        })
        .await
    }

    fn options_from_dsn(&self, dsn: &str) -> Result<MySqlConnectOptions, GatewayError> {
        // sqlx only knows the mysql scheme
        let normalized = match dsn.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("mariadb") => {
                format!("mysql://{}", rest)
            }
            _ => dsn.to_string(),
        };

        MySqlConnectOptions::from_str(&normalized).map_err(|e| {
            GatewayError::config(format!(
                "Invalid {} DSN '{}': {}",
                self.dialect.display_name(),
                obfuscate_dsn(dsn),
                e
            ))
        })
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
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
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::Uuid(v) => query.bind(v.hyphenated().to_string()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeUtc(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[async_trait]
impl Connector for MySqlConnector {
    fn dialect(&self) -> Dialect {
        self.dialect
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
        let options = self.options_from_dsn(dsn)?;

        let mut conn = with_connect_timeout(config, async {
            MySqlConnection::connect_with(&options).await.map_err(|e| {
                GatewayError::connection_with_source(
                    format!("Failed to connect to {}", obfuscate_dsn(dsn)),
                    e,
                )
            })
        })
        .await?;

        if config.readonly {
            conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
        }

        if let Some(script) = init_script {
            for statement in init_statements(script) {
                log_statement(&self.source_id, self.dialect, &statement);
                conn.execute(statement.as_str()).await?;
            }
        }

        info!(
            source_id = %self.source_id,
            dsn = %obfuscate_dsn(dsn),
            "{} connected",
            self.dialect.display_name()
        );

        *self.session.lock().await = Some(Session {
            conn,
            query_timeout: config.query_timeout(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        if let Some(session) = self.session.lock().await.take() {
            session.conn.close().await?;
            debug!(source_id = %self.source_id, "{} disconnected", self.dialect.display_name());
        }
        Ok(())
    }

    async fn get_schemas(&self) -> Result<Vec<String>, GatewayError> {
        self.fetch(SCHEMAS_SQL, &[])
            .await?
            .iter()
            .map(|row| -> Result<String, GatewayError> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>, GatewayError> {
        self.fetch(TABLES_SQL, &[schema])
            .await?
            .iter()
            .map(|row| -> Result<String, GatewayError> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> Result<bool, GatewayError> {
        let rows = self.fetch(TABLE_EXISTS_SQL, &[schema, Some(table)]).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<i64, _>(0)? > 0),
            None => Ok(false),
        }
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableColumn>, GatewayError> {
        self.fetch(COLUMNS_SQL, &[schema, Some(table)])
            .await?
            .iter()
            .map(|row| -> Result<_, GatewayError> {
                Ok(TableColumn {
                    column_name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    is_nullable: row.try_get::<String, _>(2)? == "YES",
                    column_default: row.try_get(3)?,
                    description: non_empty(row.try_get(4)?),
                })
            })
            .collect()
    }

    async fn get_table_indexes(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableIndex>, GatewayError> {
        let rows = self.fetch(INDEXES_SQL, &[schema, Some(table)]).await?;

        // One row per indexed column; fold them per index in catalog order.
        let mut indexes: IndexMap<String, TableIndex> = IndexMap::new();
        for row in &rows {
            let index_name: String = row.try_get(0)?;
            let column_name: String = row.try_get(1)?;
            let non_unique: i64 = row.try_get(2)?;

            indexes
                .entry(index_name.clone())
                .or_insert_with(|| TableIndex {
                    is_primary: index_name == "PRIMARY",
                    index_name,
                    column_names: Vec::new(),
                    is_unique: non_unique == 0,
                })
                .column_names
                .push(column_name);
        }

        Ok(indexes.into_values().collect())
    }

    async fn get_stored_procedures(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<String>, GatewayError> {
        self.fetch(PROCEDURES_SQL, &[schema])
            .await?
            .iter()
            .map(|row| -> Result<String, GatewayError> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn get_stored_procedure_detail(
        &self,
        procedure: &str,
        schema: Option<&str>,
    ) -> Result<StoredProcedure, GatewayError> {
        let rows = self
            .fetch(PROCEDURE_DETAIL_SQL, &[schema, Some(procedure)])
            .await?;
        let row = rows.first().ok_or_else(|| {
            GatewayError::execution(format!("Stored procedure '{}' not found", procedure))
        })?;

        Ok(StoredProcedure {
            procedure_name: row.try_get(0)?,
            procedure_type: row.try_get(1)?,
            language: row.try_get(2)?,
            parameter_list: row.try_get(3)?,
            return_type: row.try_get(4)?,
            definition: row.try_get(5)?,
        })
    }

    async fn execute_sql(
        &self,
        sql: &str,
        options: &ExecuteOptions,
        parameters: &[SqlValue],
    ) -> Result<SqlResult, GatewayError> {
        let plan = plan_batch(sql, self.dialect, options, parameters)?;

        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard)?;
        let mut result = SqlResult::default();

        for statement in &plan {
            log_statement(&self.source_id, self.dialect, &statement.sql);

            let conn = &mut session.conn;
            let outcome = if parameters.is_empty() {
                // Text protocol: CREATE PROCEDURE, LOCK TABLES and friends
                // cannot be prepared.
                run_statement(
                    conn,
                    statement.sql.as_str(),
                    statement.returns_rows,
                    session.query_timeout,
                )
                .await?
            } else {
                let mut query = sqlx::query(&statement.sql).persistent(false);
                for value in parameters {
                    query = bind_value(query, value);
                }
                run_statement(conn, query, statement.returns_rows, session.query_timeout).await?
            };
            result.absorb(outcome);
        }

        Ok(result)
    }
}

async fn run_statement<'q, E>(
    conn: &mut MySqlConnection,
    query: E,
    returns_rows: bool,
    timeout: Option<Duration>,
) -> Result<SqlResult, GatewayError>
where
    E: Execute<'q, MySql> + 'q,
{
    with_query_timeout(timeout, async move {
        if returns_rows {
            let rows = conn.fetch_all(query).await?;
            Ok(SqlResult::from_rows(rows.iter().map(mysql_row).collect()))
        } else {
            Ok(SqlResult::affected(conn.execute(query).await?.rows_affected()))
        }
    })
    .await
}
