//! PostgreSQL connector over a single sqlx connection.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, Executor, PgConnection, Postgres, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::POSTGRES_DEFAULT_SCHEMA;
use crate::database::connector::{
    init_statements, log_statement, not_connected, plan_batch, with_connect_timeout,
    with_query_timeout, Connector,
};
use crate::database::decode::pg_row;
use crate::database::types::{
    ConnectorConfig, ExecuteOptions, SqlResult, SqlValue, StoredProcedure, TableColumn,
    TableIndex,
};
use crate::dialect::Dialect;
use crate::dsn::obfuscate_dsn;
use crate::error::GatewayError;

const SCHEMAS_SQL: &str = "SELECT schema_name::text FROM information_schema.schemata \
     WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
     AND schema_name NOT LIKE 'pg_temp_%' AND schema_name NOT LIKE 'pg_toast_temp_%' \
     ORDER BY schema_name";

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = $1 ORDER BY table_name";

const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2)";

const COLUMNS_SQL: &str = "SELECT c.column_name::text, c.data_type::text, \
     c.is_nullable::text, c.column_default::text, \
     col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position::int) \
     FROM information_schema.columns c \
     WHERE c.table_schema = $1 AND c.table_name = $2 \
     ORDER BY c.ordinal_position";

const INDEXES_SQL: &str = "SELECT i.relname::text, \
     array_agg(a.attname::text ORDER BY k.ord), \
     ix.indisunique, ix.indisprimary \
     FROM pg_class t \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_index ix ON ix.indrelid = t.oid \
     JOIN pg_class i ON i.oid = ix.indexrelid \
     JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
     WHERE n.nspname = $1 AND t.relname = $2 \
     GROUP BY i.relname, ix.indisunique, ix.indisprimary \
     ORDER BY i.relname";

const PROCEDURES_SQL: &str = "SELECT p.proname::text FROM pg_proc p \
     JOIN pg_namespace n ON n.oid = p.pronamespace \
     WHERE n.nspname = $1 AND p.prokind IN ('f', 'p') \
     ORDER BY p.proname";

const PROCEDURE_DETAIL_SQL: &str = "SELECT p.proname::text, \
     CASE p.prokind WHEN 'p' THEN 'procedure' ELSE 'function' END, \
     l.lanname::text, \
     pg_get_function_arguments(p.oid), \
     CASE WHEN p.prokind = 'p' THEN NULL ELSE pg_get_function_result(p.oid) END, \
     p.prosrc \
     FROM pg_proc p \
     JOIN pg_namespace n ON n.oid = p.pronamespace \
     JOIN pg_language l ON l.oid = p.prolang \
     WHERE n.nspname = $1 AND p.proname = $2 \
     LIMIT 1";

struct Session {
    conn: PgConnection,
    query_timeout: Option<Duration>,
}

/// PostgreSQL connector.
#[derive(Default)]
pub struct PostgresConnector {
    source_id: String,
    session: Mutex<Option<Session>>,
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn session<'a>(&self, session: &'a mut Option<Session>) -> Result<&'a mut Session, GatewayError> {
        session
            .as_mut()
            .ok_or_else(|| not_connected(Dialect::Postgres, &self.source_id))
    }

    async fn fetch(&self, sql: &str, binds: &[&str]) -> Result<Vec<PgRow>, GatewayError> {
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
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
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
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeUtc(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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
        let options = PgConnectOptions::from_str(dsn).map_err(|e| {
            GatewayError::config(format!("Invalid PostgreSQL DSN '{}': {}", obfuscate_dsn(dsn), e))
        })?;

        let mut conn = with_connect_timeout(config, async {
            PgConnection::connect_with(&options).await.map_err(|e| {
                GatewayError::connection_with_source(
                    format!("Failed to connect to {}", obfuscate_dsn(dsn)),
                    e,
                )
            })
        })
        .await?;

        if config.readonly {
            conn.execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
                .await?;
        }

        if let Some(script) = init_script {
            for statement in init_statements(script) {
                log_statement(&self.source_id, Dialect::Postgres, &statement);
                conn.execute(statement.as_str()).await?;
            }
        }

        info!(source_id = %self.source_id, dsn = %obfuscate_dsn(dsn), "PostgreSQL connected");

        *self.session.lock().await = Some(Session {
            conn,
            query_timeout: config.query_timeout(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        if let Some(session) = self.session.lock().await.take() {
            session.conn.close().await?;
            debug!(source_id = %self.source_id, "PostgreSQL disconnected");
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
        let schema = schema.unwrap_or(POSTGRES_DEFAULT_SCHEMA);
        self.fetch(TABLES_SQL, &[schema])
            .await?
            .iter()
            .map(|row| -> Result<String, GatewayError> { Ok(row.try_get(0)?) })
            .collect()
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> Result<bool, GatewayError> {
        let schema = schema.unwrap_or(POSTGRES_DEFAULT_SCHEMA);
        let rows = self.fetch(TABLE_EXISTS_SQL, &[schema, table]).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<bool, _>(0)?),
            None => Ok(false),
        }
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableColumn>, GatewayError> {
        let schema = schema.unwrap_or(POSTGRES_DEFAULT_SCHEMA);
        self.fetch(COLUMNS_SQL, &[schema, table])
            .await?
            .iter()
            .map(|row| -> Result<_, GatewayError> {
                Ok(TableColumn {
                    column_name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    is_nullable: row.try_get::<String, _>(2)? == "YES",
                    column_default: row.try_get(3)?,
                    description: row.try_get(4)?,
                })
            })
            .collect()
    }

    async fn get_table_indexes(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableIndex>, GatewayError> {
        let schema = schema.unwrap_or(POSTGRES_DEFAULT_SCHEMA);
        self.fetch(INDEXES_SQL, &[schema, table])
            .await?
            .iter()
            .map(|row| -> Result<_, GatewayError> {
                Ok(TableIndex {
                    index_name: row.try_get(0)?,
                    column_names: row.try_get(1)?,
                    is_unique: row.try_get(2)?,
                    is_primary: row.try_get(3)?,
                })
            })
            .collect()
    }

    async fn get_stored_procedures(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<String>, GatewayError> {
        let schema = schema.unwrap_or(POSTGRES_DEFAULT_SCHEMA);
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
        let schema = schema.unwrap_or(POSTGRES_DEFAULT_SCHEMA);
        let rows = self.fetch(PROCEDURE_DETAIL_SQL, &[schema, procedure]).await?;
        let row = rows.first().ok_or_else(|| {
            GatewayError::execution(format!(
                "Stored procedure '{}' not found in schema '{}'",
                procedure, schema
            ))
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
        let plan = plan_batch(sql, Dialect::Postgres, options, parameters)?;

        let mut guard = self.session.lock().await;
        let session = self.session(&mut guard)?;
        let mut result = SqlResult::default();

        for statement in &plan {
            log_statement(&self.source_id, Dialect::Postgres, &statement.sql);

            let mut query = sqlx::query(&statement.sql).persistent(false);
            for value in parameters {
                query = bind_value(query, value);
            }

            let conn = &mut session.conn;
            let outcome = if statement.returns_rows {
                with_query_timeout(session.query_timeout, async move {
                    let rows = query.fetch_all(conn).await?;
                    Ok(SqlResult::from_rows(rows.iter().map(pg_row).collect()))
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
