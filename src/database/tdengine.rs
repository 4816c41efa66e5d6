//! TDengine connector over the taosAdapter REST interface.
//!
//! Every statement is one `POST /rest/sql[/db]` with the SQL as the body and
//! HTTP basic auth. The endpoint is stateless, so "connected" means a
//! verified client plus the resolved endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_TDENGINE_PORT, TDENGINE_REST_PATH};
use crate::database::connector::{
    init_statements, log_statement, not_connected, plan_batch, with_connect_timeout,
    with_query_timeout, Connector,
};
use crate::database::types::{
    ConnectorConfig, ExecuteOptions, ResultRow, SqlResult, SqlValue, StoredProcedure,
    TableColumn, TableIndex,
};
use crate::dialect::Dialect;
use crate::dsn::{obfuscate_dsn, ConnectionUrl};
use crate::error::GatewayError;
use crate::sql::quote_identifier;

const DEFAULT_USER: &str = "root";
const DEFAULT_PASSWORD: &str = "taosdata";

/// Body returned by `/rest/sql`.
#[derive(Debug, Deserialize)]
struct RestResponse {
    code: i32,
    #[serde(default)]
    desc: Option<String>,
    /// `[name, type, length]` per column.
    #[serde(default)]
    column_meta: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

impl RestResponse {
    fn into_result(self) -> Result<RestResult, GatewayError> {
        if self.code != 0 {
            return Err(GatewayError::execution_with_code(
                self.desc
                    .unwrap_or_else(|| format!("TDengine error code {}", self.code)),
                self.code,
                None,
            ));
        }

        let columns = self
            .column_meta
            .iter()
            .map(|meta| match meta.first() {
                Some(serde_json::Value::String(name)) => name.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect();

        Ok(RestResult {
            columns,
            data: self.data,
        })
    }
}

/// A successful REST response.
#[derive(Debug)]
struct RestResult {
    columns: Vec<String>,
    data: Vec<Vec<serde_json::Value>>,
}

impl RestResult {
    fn rows(self) -> Vec<ResultRow> {
        let columns = self.columns;
        self.data
            .into_iter()
            .map(|values| {
                let mut row = ResultRow::new();
                for (column, value) in columns.iter().zip(values) {
                    row.insert(column.as_str(), SqlValue::from(value));
                }
                row
            })
            .collect()
    }

    /// Affected-row count reported by a mutation (`[[n]]`).
    fn affected_rows(&self) -> u64 {
        self.data
            .first()
            .and_then(|row| row.first())
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }

    /// First column of every row as text.
    fn first_column(&self) -> Vec<String> {
        self.data
            .iter()
            .filter_map(|row| row.first())
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()
    }
}

/// Endpoint and credentials parsed from a `tdengine://` DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RestEndpoint {
    base_url: String,
    database: Option<String>,
    user: String,
    password: String,
}

impl RestEndpoint {
    fn from_dsn(dsn: &str) -> Result<Self, GatewayError> {
        let url = ConnectionUrl::parse(dsn)?;
        let host = url.require_host()?;
        let port = url.port().unwrap_or(DEFAULT_TDENGINE_PORT);
        let scheme = match url.param("sslmode").as_deref() {
            Some("require") => "https",
            _ => "http",
        };
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        Ok(Self {
            base_url: format!("{}://{}:{}{}", scheme, host, port, TDENGINE_REST_PATH),
            database: url.database(),
            user: url.user().unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: url
                .password()
                .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
        })
    }

    fn url(&self) -> String {
        match self.database {
            Some(ref db) => format!("{}/{}", self.base_url, db),
            None => self.base_url.clone(),
        }
    }
}

struct Session {
    client: reqwest::Client,
    endpoint: RestEndpoint,
    query_timeout: Option<Duration>,
    /// Whole-request limit the HTTP client enforces.
    request_timeout: Duration,
    connection_timeout_seconds: u64,
}

impl Session {
    async fn post(&self, sql: &str) -> Result<RestResult, GatewayError> {
        let request = self
            .client
            .post(self.endpoint.url())
            .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
            .body(sql.to_string());

        with_query_timeout(self.query_timeout, async move {
            let response = request.send().await.map_err(|e| self.http_error(e))?;
            let response: RestResponse = response.json().await.map_err(|e| self.http_error(e))?;
            response.into_result()
        })
        .await
    }

    fn http_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            if e.is_connect() {
                GatewayError::connect_timeout(self.connection_timeout_seconds)
            } else {
                GatewayError::query_timeout(self.request_timeout.as_secs())
            }
        } else if e.is_connect() {
            GatewayError::connection_with_source("HTTP connection failed", e)
        } else if e.is_decode() {
            GatewayError::execution(format!("Malformed REST response: {}", e))
        } else {
            GatewayError::execution(e.to_string())
        }
    }

    fn database<'a>(&'a self, schema: Option<&'a str>) -> Result<&'a str, GatewayError> {
        schema
            .or(self.endpoint.database.as_deref())
            .ok_or_else(|| {
                GatewayError::config("No TDengine database given and none set in the DSN")
            })
    }
}

/// TDengine connector.
#[derive(Default)]
pub struct TDengineConnector {
    source_id: String,
    session: Mutex<Option<Session>>,
}

impl TDengineConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn session<'a>(&self, session: &'a Option<Session>) -> Result<&'a Session, GatewayError> {
        session
            .as_ref()
            .ok_or_else(|| not_connected(Dialect::TDengine, &self.source_id))
    }
}

#[async_trait]
impl Connector for TDengineConnector {
    fn dialect(&self) -> Dialect {
        Dialect::TDengine
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
        let endpoint = RestEndpoint::from_dsn(dsn)?;
        let request_timeout = config
            .query_timeout()
            .unwrap_or(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout())
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::connection_with_source("Failed to build HTTP client", e))?;

        let session = Session {
            client,
            endpoint,
            query_timeout: config.query_timeout(),
            request_timeout,
            connection_timeout_seconds: config.connection_timeout_seconds,
        };

        let version = with_connect_timeout(config, session.post("SELECT SERVER_VERSION()"))
            .await?
            .first_column();
        if config.readonly {
            debug!(source_id = %self.source_id, "TDengine has no read-only session mode");
        }

        if let Some(script) = init_script {
            for statement in init_statements(script) {
                log_statement(&self.source_id, Dialect::TDengine, &statement);
                session.post(&statement).await?;
            }
        }

        info!(
            source_id = %self.source_id,
            dsn = %obfuscate_dsn(dsn),
            version = ?version.first(),
            "TDengine connected"
        );

        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        if self.session.lock().await.take().is_some() {
            debug!(source_id = %self.source_id, "TDengine disconnected");
        }
        Ok(())
    }

    async fn get_schemas(&self) -> Result<Vec<String>, GatewayError> {
        let guard = self.session.lock().await;
        let session = self.session(&guard)?;
        Ok(session.post("SHOW DATABASES").await?.first_column())
    }

    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>, GatewayError> {
        let guard = self.session.lock().await;
        let session = self.session(&guard)?;
        let database = quote_identifier(session.database(schema)?, Dialect::TDengine)?;

        let mut tables = session
            .post(&format!("SHOW {}.STABLES", database))
            .await?
            .first_column();
        tables.extend(
            session
                .post(&format!("SHOW {}.TABLES", database))
                .await?
                .first_column(),
        );
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<TableColumn>, GatewayError> {
        let guard = self.session.lock().await;
        let session = self.session(&guard)?;
        let database = quote_identifier(session.database(schema)?, Dialect::TDengine)?;
        let table = quote_identifier(table, Dialect::TDengine)?;

        // field, type, length, note
        let described = session
            .post(&format!("DESCRIBE {}.{}", database, table))
            .await?;

        Ok(described
            .data
            .iter()
            .enumerate()
            .filter_map(|(position, row)| {
                let text = |idx: usize| row.get(idx).and_then(|v| v.as_str()).unwrap_or_default();
                let name = text(0);
                if name.is_empty() {
                    return None;
                }
                let note = text(3);
                Some(TableColumn {
                    column_name: name.to_string(),
                    data_type: text(1).to_string(),
                    // The leading timestamp is the primary key
                    is_nullable: position > 0,
                    column_default: None,
                    description: (!note.is_empty()).then(|| note.to_string()),
                })
            })
            .collect())
    }

    async fn get_table_indexes(
        &self,
        _table: &str,
        _schema: Option<&str>,
    ) -> Result<Vec<TableIndex>, GatewayError> {
        Ok(Vec::new())
    }

    async fn get_stored_procedures(
        &self,
        _schema: Option<&str>,
    ) -> Result<Vec<String>, GatewayError> {
        Ok(Vec::new())
    }

    async fn get_stored_procedure_detail(
        &self,
        _procedure: &str,
        _schema: Option<&str>,
    ) -> Result<StoredProcedure, GatewayError> {
        Err(GatewayError::unsupported(
            "TDengine does not support stored procedures",
        ))
    }

    async fn execute_sql(
        &self,
        sql: &str,
        options: &ExecuteOptions,
        parameters: &[SqlValue],
    ) -> Result<SqlResult, GatewayError> {
        let plan = plan_batch(sql, Dialect::TDengine, options, parameters)?;

        let guard = self.session.lock().await;
        let session = self.session(&guard)?;
        let mut result = SqlResult::default();

        for statement in &plan {
            log_statement(&self.source_id, Dialect::TDengine, &statement.sql);
            let response = session.post(&statement.sql).await?;
            let outcome = if statement.returns_rows {
                SqlResult::from_rows(response.rows())
            } else {
                SqlResult::affected(response.affected_rows())
            };
            result.absorb(outcome);
        }

        Ok(result)
    }
}
