//! Values, results and introspection descriptors shared by every dialect.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::DEFAULT_CONNECTION_TIMEOUT_SECS;

/// A SQL value that can be serialized to JSON.
///
/// Also used for bound parameters; each driver maps the variant onto its
/// native encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert to a display string.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::String(v) => v.clone(),
            SqlValue::Bytes(v) => format!("0x{}", hex::encode(v)),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Date(v) => v.to_string(),
            SqlValue::Time(v) => v.to_string(),
            SqlValue::DateTime(v) => v.to_string(),
            SqlValue::DateTimeUtc(v) => v.to_rfc3339(),
            SqlValue::Json(v) => v.to_string(),
        }
    }

    /// Borrow the value as text when it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any integer variant to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => SqlValue::I64(i),
                (None, Some(f)) => SqlValue::F64(f),
                (None, None) => SqlValue::String(n.to_string()),
            },
            Value::String(s) => SqlValue::String(s),
            other => SqlValue::Json(other),
        }
    }
}

/// A single row of query results, keyed by column name in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(flatten)]
    pub columns: IndexMap<String, SqlValue>,
}

impl ResultRow {
    /// Create a new result row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    /// Insert a value, keeping first-seen column order.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.insert(column.into(), value);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Result of executing a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlResult {
    /// Rows from query-shaped statements, in execution order.
    pub rows: Vec<ResultRow>,

    /// Rows returned for queries plus rows affected for mutations,
    /// cumulative across the batch.
    pub row_count: u64,
}

impl SqlResult {
    /// Fold one statement's outcome into the batch result.
    pub fn absorb(&mut self, other: SqlResult) {
        self.rows.extend(other.rows);
        self.row_count += other.row_count;
    }

    /// Result of a query: the count is the number of rows returned.
    pub fn from_rows(rows: Vec<ResultRow>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }

    /// Result of a mutation: no rows, only the affected count.
    pub fn affected(row_count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count,
        }
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Cap on rows returned by each query-shaped statement.
    pub max_rows: Option<u32>,

    /// Reject the batch unless every statement is read-only.
    pub readonly: bool,
}

/// Options applied when a connector establishes its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connection_timeout_seconds: u64,

    /// `None` leaves statements unbounded.
    pub query_timeout_seconds: Option<u64>,

    /// Open the engine session read-only where the driver supports it.
    pub readonly: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connection_timeout_seconds: DEFAULT_CONNECTION_TIMEOUT_SECS,
            query_timeout_seconds: None,
            readonly: false,
        }
    }
}

impl ConnectorConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_seconds.map(Duration::from_secs)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub description: Option<String>,
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableIndex {
    pub index_name: String,
    pub column_names: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

/// Stored procedure or function metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProcedure {
    pub procedure_name: String,

    /// `procedure` or `function`.
    pub procedure_type: String,

    pub language: Option<String>,
    pub parameter_list: Option<String>,
    pub return_type: Option<String>,
    pub definition: Option<String>,
}

/// Hex encoding helper (minimal implementation to avoid extra dependency).
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_display() {
        assert_eq!(SqlValue::Null.to_display_string(), "NULL");
        assert_eq!(SqlValue::I32(42).to_display_string(), "42");
        assert_eq!(
            SqlValue::String("hello".to_string()).to_display_string(),
            "hello"
        );
        assert_eq!(SqlValue::Bool(true).to_display_string(), "true");
        assert_eq!(
            SqlValue::Bytes(vec![0xDE, 0xAD]).to_display_string(),
            "0xDEAD"
        );
    }

    #[test]
    fn test_sql_value_from_json() {
        assert_eq!(SqlValue::from(serde_json::json!(7)), SqlValue::I64(7));
        assert_eq!(SqlValue::from(serde_json::json!(1.5)), SqlValue::F64(1.5));
        assert_eq!(
            SqlValue::from(serde_json::json!("x")),
            SqlValue::String("x".into())
        );
        assert_eq!(SqlValue::from(serde_json::Value::Null), SqlValue::Null);
        assert!(matches!(
            SqlValue::from(serde_json::json!({"a": 1})),
            SqlValue::Json(_)
        ));
    }

    #[test]
    fn test_row_keeps_column_order() {
        let mut row = ResultRow::new();
        row.insert("z", SqlValue::I64(1));
        row.insert("a", SqlValue::I64(2));
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_result_absorb_is_cumulative() {
        let mut result = SqlResult::default();
        result.absorb(SqlResult::affected(3));
        let mut row = ResultRow::new();
        row.insert("id", SqlValue::I64(1));
        result.absorb(SqlResult::from_rows(vec![row]));
        assert_eq!(result.row_count, 4);
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn test_connector_config_defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(
            config.connection_timeout(),
            Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS)
        );
        assert!(config.query_timeout().is_none());
        assert!(!config.readonly);
    }
}
