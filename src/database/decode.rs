//! Native row to [`ResultRow`] conversion for every driver.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::types::{PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::types::ipnet::IpNet;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};
use uuid::Uuid;

use crate::database::types::{ResultRow, SqlValue};

/// Decode one column as `T`.
///
/// `None` means the column is not of type `T`, so callers can fall through
/// to the next candidate; SQL NULL decodes to `SqlValue::Null`.
fn decode<'r, R, T>(row: &'r R, idx: usize, wrap: impl FnOnce(T) -> SqlValue) -> Option<SqlValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Some(wrap(v)),
        Ok(None) => Some(SqlValue::Null),
        Err(_) => None,
    }
}

/// Decoding by the common Rust types, shared by the sqlx drivers.
fn decode_fallback<'r, R>(row: &'r R, idx: usize) -> Option<SqlValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    decode(row, idx, SqlValue::String)
        .or_else(|| decode(row, idx, SqlValue::I64))
        .or_else(|| decode(row, idx, SqlValue::F64))
        .or_else(|| {
            decode(row, idx, |v: Vec<u8>| match String::from_utf8(v) {
                Ok(s) => SqlValue::String(s),
                Err(e) => SqlValue::Bytes(e.into_bytes()),
            })
        })
}

/// The value's wire bytes, as text when they are UTF-8.
///
/// Enum labels arrive as plain text; other types without a mapping keep
/// their raw encoding rather than turning into NULL.
fn pg_raw(row: &PgRow, idx: usize) -> SqlValue {
    let Ok(raw) = row.try_get_raw(idx) else {
        return SqlValue::Null;
    };
    if raw.is_null() {
        return SqlValue::Null;
    }
    match raw.as_bytes() {
        Ok(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => SqlValue::String(text.to_string()),
            Err(_) => SqlValue::Bytes(bytes.to_vec()),
        },
        Err(_) => SqlValue::Null,
    }
}

/// Postgres output style: `1 year 2 mons 3 days 04:05:06.5`.
fn format_interval(interval: &PgInterval) -> String {
    fn unit(n: i64, singular: &str, plural: &str) -> String {
        format!("{} {}", n, if n == 1 { singular } else { plural })
    }

    let mut parts = Vec::new();
    let years = i64::from(interval.months / 12);
    let months = i64::from(interval.months % 12);
    if years != 0 {
        parts.push(unit(years, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months, "mon", "mons"));
    }
    if interval.days != 0 {
        parts.push(unit(i64::from(interval.days), "day", "days"));
    }

    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let seconds = micros / 1_000_000;
        let fraction = micros % 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            seconds / 3600,
            seconds / 60 % 60,
            seconds % 60
        );
        if fraction != 0 {
            let digits = format!("{:06}", fraction);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }

    parts.join(" ")
}

/// INET prints a host address without its full-length prefix; CIDR always
/// keeps the prefix.
fn format_network(network: &IpNet, is_inet: bool) -> String {
    if is_inet && network.prefix_len() == network.max_prefix_len() {
        network.addr().to_string()
    } else {
        network.to_string()
    }
}

fn collect_row<R: Row>(row: &R, extract: impl Fn(&R, usize, &str) -> SqlValue) -> ResultRow {
    let mut result = ResultRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = extract(row, idx, column.type_info().name());
        result.insert(column.name(), value);
    }
    result
}

/// Convert a Postgres row, dispatching on the column's type name.
pub fn pg_row(row: &PgRow) -> ResultRow {
    collect_row(row, |row, idx, type_name| {
        let value = match type_name {
            "BOOL" => decode(row, idx, SqlValue::Bool),
            "INT2" => decode(row, idx, SqlValue::I16),
            "INT4" => decode(row, idx, SqlValue::I32),
            "INT8" => decode(row, idx, SqlValue::I64),
            "OID" => decode(row, idx, |v: sqlx::postgres::types::Oid| {
                SqlValue::I64(i64::from(v.0))
            }),
            "FLOAT4" => decode(row, idx, SqlValue::F32),
            "FLOAT8" => decode(row, idx, SqlValue::F64),
            "NUMERIC" => decode(row, idx, SqlValue::Decimal),
            "UUID" => decode(row, idx, SqlValue::Uuid),
            "DATE" => decode(row, idx, SqlValue::Date),
            "TIME" => decode(row, idx, SqlValue::Time),
            "TIMESTAMP" => decode(row, idx, SqlValue::DateTime),
            "TIMESTAMPTZ" => decode(row, idx, SqlValue::DateTimeUtc),
            "JSON" | "JSONB" => decode(row, idx, SqlValue::Json),
            "BYTEA" => decode(row, idx, SqlValue::Bytes),
            "TEXT[]" | "VARCHAR[]" | "NAME[]" => decode(row, idx, |v: Vec<String>| {
                SqlValue::Json(serde_json::Value::from(v))
            }),
            "INT4[]" => decode(row, idx, |v: Vec<i32>| {
                SqlValue::Json(serde_json::Value::from(v))
            }),
            "INT8[]" => decode(row, idx, |v: Vec<i64>| {
                SqlValue::Json(serde_json::Value::from(v))
            }),
            "INTERVAL" => decode(row, idx, |v: PgInterval| {
                SqlValue::String(format_interval(&v))
            }),
            "INET" | "CIDR" => decode(row, idx, |v: IpNet| {
                SqlValue::String(format_network(&v, type_name == "INET"))
            }),
            "TIMETZ" => decode(row, idx, |v: PgTimeTz<NaiveTime, FixedOffset>| {
                SqlValue::String(format!("{}{}", v.time, v.offset))
            }),
            "MONEY" => decode(row, idx, |v: PgMoney| SqlValue::Decimal(v.to_decimal(2))),
            _ => None,
        };
        value
            .or_else(|| decode_fallback(row, idx))
            .unwrap_or_else(|| pg_raw(row, idx))
    })
}

/// Convert a MySQL / MariaDB row.
pub fn mysql_row(row: &MySqlRow) -> ResultRow {
    collect_row(row, |row, idx, type_name| {
        let value = if type_name.ends_with("UNSIGNED") {
            decode(row, idx, |v: u64| match i64::try_from(v) {
                Ok(i) => SqlValue::I64(i),
                Err(_) => SqlValue::String(v.to_string()),
            })
        } else {
            match type_name {
                "BOOLEAN" => decode(row, idx, SqlValue::Bool),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    decode(row, idx, SqlValue::I64)
                }
                "YEAR" => decode(row, idx, |v: u16| SqlValue::I32(i32::from(v))),
                "FLOAT" => decode(row, idx, SqlValue::F32),
                "DOUBLE" => decode(row, idx, SqlValue::F64),
                "DECIMAL" => decode(row, idx, SqlValue::Decimal),
                "DATE" => decode(row, idx, SqlValue::Date),
                "TIME" => decode(row, idx, SqlValue::Time),
                "DATETIME" => decode(row, idx, SqlValue::DateTime),
                "TIMESTAMP" => decode(row, idx, SqlValue::DateTimeUtc),
                "JSON" => decode(row, idx, SqlValue::Json),
                _ => None,
            }
        };
        value
            .or_else(|| decode_fallback(row, idx))
            .unwrap_or(SqlValue::Null)
    })
}

/// Convert an SQLite row.
///
/// SQLite is dynamically typed, so only a declared `BOOLEAN` is honored;
/// everything else decodes by storage class.
pub fn sqlite_row(row: &SqliteRow) -> ResultRow {
    collect_row(row, |row, idx, type_name| {
        let value = match type_name {
            "BOOLEAN" => decode(row, idx, SqlValue::Bool),
            _ => None,
        };
        value
            .or_else(|| decode_fallback(row, idx))
            .unwrap_or(SqlValue::Null)
    })
}

/// Type mapper for SQL Server rows.
pub struct TypeMapper;

impl TypeMapper {
    /// Convert a full tiberius row.
    pub fn row(row: &tiberius::Row) -> ResultRow {
        let mut result = ResultRow::new();
        for (idx, column) in row.columns().iter().enumerate() {
            result.insert(column.name(), Self::extract_column(row, idx));
        }
        result
    }

    /// Extract a value from a Tiberius row column.
    pub fn extract_column(row: &tiberius::Row, idx: usize) -> SqlValue {
        if row.columns().get(idx).is_none() {
            return SqlValue::Null;
        }

        // Try each type in order of likelihood
        if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
            return SqlValue::String(v.to_string());
        }

        if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
            return SqlValue::I32(v);
        }
        if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
            return SqlValue::I64(v);
        }
        if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
            return SqlValue::I16(v);
        }
        // TINYINT is unsigned in SQL Server
        if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
            return SqlValue::I16(i16::from(v));
        }

        if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
            return SqlValue::F64(v);
        }
        if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
            return SqlValue::F32(v);
        }

        if let Some(v) = row.try_get::<Decimal, _>(idx).ok().flatten() {
            return SqlValue::Decimal(v);
        }

        if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
            return SqlValue::Bool(v);
        }

        if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
            return SqlValue::Uuid(v);
        }

        if let Some(v) = row.try_get::<DateTime<Utc>, _>(idx).ok().flatten() {
            return SqlValue::DateTimeUtc(v);
        }
        if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
            return SqlValue::DateTime(v);
        }
        if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
            return SqlValue::Date(v);
        }
        if let Some(v) = row.try_get::<NaiveTime, _>(idx).ok().flatten() {
            return SqlValue::Time(v);
        }

        if let Some(v) = row.try_get::<&[u8], _>(idx).ok().flatten() {
            return SqlValue::Bytes(v.to_vec());
        }

        // NULL or an unsupported type
        SqlValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Connection, SqliteConnection};

    #[test]
    fn test_format_interval() {
        let interval = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(format_interval(&interval(0, 1, 0)), "1 day");
        assert_eq!(format_interval(&interval(14, 3, 0)), "1 year 2 mons 3 days");
        assert_eq!(
            format_interval(&interval(0, 0, 3_723_500_000)),
            "01:02:03.5"
        );
        assert_eq!(format_interval(&interval(0, -2, -1_000_000)), "-2 days -00:00:01");
        assert_eq!(format_interval(&interval(0, 0, 0)), "00:00:00");
    }

    #[test]
    fn test_format_network() {
        let host: IpNet = "10.0.0.1/32".parse().unwrap();
        assert_eq!(format_network(&host, true), "10.0.0.1");
        assert_eq!(format_network(&host, false), "10.0.0.1/32");

        let subnet: IpNet = "192.168.0.0/24".parse().unwrap();
        assert_eq!(format_network(&subnet, true), "192.168.0.0/24");
    }

    #[tokio::test]
    async fn test_sqlite_row_decodes_storage_classes() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let row = sqlx::query("SELECT 1 AS i, 2.5 AS f, 'x' AS s, NULL AS n, x'00ff' AS b")
            .fetch_one(&mut conn)
            .await
            .unwrap();

        let result = sqlite_row(&row);
        let columns: Vec<&String> = result.columns.keys().collect();
        assert_eq!(columns, ["i", "f", "s", "n", "b"]);
        assert_eq!(result.get("i"), Some(&SqlValue::I64(1)));
        assert_eq!(result.get("f"), Some(&SqlValue::F64(2.5)));
        assert_eq!(result.get("s"), Some(&SqlValue::String("x".into())));
        assert_eq!(result.get("n"), Some(&SqlValue::Null));
        assert_eq!(result.get("b"), Some(&SqlValue::Bytes(vec![0x00, 0xff])));
    }
}
