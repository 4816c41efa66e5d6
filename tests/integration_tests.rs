//! Integration tests for the SQL gateway.
//!
//! The SQLite tests run everywhere against in-memory databases. The
//! PostgreSQL, MySQL and SQL Server tests support two modes:
//! 1. **Testcontainers** (default): Automatically spins up a container
//! 2. **External server**: Connect to an existing server via `PG_DSN` /
//!    `MYSQL_DSN` / `MSSQL_DSN`
//!
//! ## Running the container tests (requires Docker):
//! ```bash
//! cargo test --test integration_tests -- --ignored --test-threads=1
//! ```
//!
//! Note: the SQL Server container requires ~2GB RAM and takes 30-60 seconds to start.

use serial_test::serial;
use sql_gateway::database::{ExecuteOptions, SqlValue};
use sql_gateway::{ConnectionState, ConnectorManager, Dialect, SourceConfig};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mssql_server::MssqlServer;
use testcontainers_modules::mysql::Mysql;
use testcontainers_modules::postgres::Postgres;

/// Default SA password for testcontainers.
const DEFAULT_SA_PASSWORD: &str = "yourStrong(!)Password";

const SEED_SCRIPT: &str = "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL); \
     CREATE UNIQUE INDEX items_name ON items (name); \
     INSERT INTO items (name) VALUES ('apple'), ('banana'), ('cherry')";

fn sqlite_source(id: &str) -> SourceConfig {
    SourceConfig {
        init_script: Some(SEED_SCRIPT.to_string()),
        ..SourceConfig::from_dsn(id, "sqlite:///:memory:")
    }
}

async fn started(sources: Vec<SourceConfig>) -> ConnectorManager {
    let manager = ConnectorManager::with_defaults(sources).expect("valid sources");
    manager.start().await.expect("startup");
    manager
}

// =============================================================================
// SQLite End-to-End Tests
// =============================================================================

mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_sees_earlier_statements() {
        let manager = started(vec![sqlite_source("local")]).await;

        let result = manager
            .execute(
                None,
                "INSERT INTO items (name) VALUES ('damson'); SELECT COUNT(*) AS n FROM items",
                &[],
            )
            .await
            .unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("n"), Some(&SqlValue::I64(4)));
        // one affected plus one returned
        assert_eq!(result.row_count, 2);

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_source_max_rows_caps_queries_only() {
        let manager = started(vec![SourceConfig {
            max_rows: Some(2),
            ..sqlite_source("capped")
        }])
        .await;

        let result = manager
            .execute(None, "SELECT name FROM items ORDER BY id LIMIT 10", &[])
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(
            result.rows[0].get("name"),
            Some(&SqlValue::String("apple".into()))
        );

        let inserted = manager
            .execute(
                None,
                "INSERT INTO items (name) SELECT name || '-2' FROM items",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(inserted.row_count, 3);
        assert!(inserted.rows.is_empty());

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_readonly_source_rejects_whole_batch() {
        let manager = started(vec![SourceConfig {
            readonly: true,
            ..sqlite_source("ro")
        }])
        .await;

        let err = manager
            .execute(None, "SELECT 1; DELETE FROM items", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "READONLY_VIOLATION");

        let connector = manager.get_connector(None).await.unwrap();
        let count = connector
            .execute_sql(
                "SELECT COUNT(*) AS n FROM items",
                &ExecuteOptions::default(),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(count.rows[0].get("n"), Some(&SqlValue::I64(3)));

        let pragma = manager
            .execute(None, "PRAGMA table_info(items)", &[])
            .await
            .unwrap();
        assert_eq!(pragma.rows.len(), 2);

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_parameters() {
        let manager = started(vec![sqlite_source("params")]).await;

        let result = manager
            .execute(
                None,
                "SELECT id FROM items WHERE name = ? OR name = ? ORDER BY id",
                &[
                    SqlValue::String("banana".into()),
                    SqlValue::String("cherry".into()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);

        let err = manager
            .execute(
                None,
                "SELECT id FROM items WHERE name = $1",
                &[SqlValue::String("banana".into())],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PARAMETER_VALIDATION_ERROR");

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_introspection() {
        let manager = started(vec![sqlite_source("meta")]).await;
        let connector = manager.get_connector(Some("meta")).await.unwrap();

        assert_eq!(connector.get_schemas().await.unwrap(), vec!["main"]);
        assert_eq!(connector.get_tables(None).await.unwrap(), vec!["items"]);
        assert!(connector.table_exists("items", None).await.unwrap());
        assert!(!connector.table_exists("missing", None).await.unwrap());

        let columns = connector.get_table_schema("items", None).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, ["id", "name"]);
        assert!(!columns[1].is_nullable);

        let indexes = connector.get_table_indexes("items", None).await.unwrap();
        let unique = indexes
            .iter()
            .find(|i| i.index_name == "items_name")
            .expect("unique index");
        assert!(unique.is_unique);
        assert_eq!(unique.column_names, vec!["name"]);

        let err = connector
            .get_stored_procedure_detail("anything", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED");

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_awkward_identifiers_are_quoted() {
        let manager = started(vec![SourceConfig {
            init_script: Some(r#"CREATE TABLE "odd ""name""" (x INTEGER)"#.to_string()),
            ..SourceConfig::from_dsn("odd", "sqlite:///:memory:")
        }])
        .await;
        let connector = manager.get_connector(None).await.unwrap();

        assert_eq!(
            connector.get_tables(None).await.unwrap(),
            vec![r#"odd "name""#]
        );
        let columns = connector
            .get_table_schema(r#"odd "name""#, None)
            .await
            .unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].column_name, "x");

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_sources_are_isolated() {
        let manager = started(vec![sqlite_source("one"), sqlite_source("two")]).await;

        manager
            .execute(Some("one"), "DELETE FROM items", &[])
            .await
            .unwrap();

        let one = manager
            .execute(Some("one"), "SELECT COUNT(*) AS n FROM items", &[])
            .await
            .unwrap();
        let two = manager
            .execute(Some("two"), "SELECT COUNT(*) AS n FROM items", &[])
            .await
            .unwrap();
        assert_eq!(one.rows[0].get("n"), Some(&SqlValue::I64(0)));
        assert_eq!(two.rows[0].get("n"), Some(&SqlValue::I64(3)));

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_lazy_source_connects_once_on_first_use() {
        let manager = started(vec![SourceConfig {
            lazy: true,
            ..sqlite_source("lazy")
        }])
        .await;
        assert_eq!(manager.state("lazy"), Some(ConnectionState::Pending));

        let (a, b) = tokio::join!(
            manager.get_connector(Some("lazy")),
            manager.get_connector(Some("lazy"))
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.dialect(), Dialect::Sqlite);

        // A second connect would have re-run the seed script and failed
        let count = manager
            .execute(None, "SELECT COUNT(*) AS n FROM items", &[])
            .await
            .unwrap();
        assert_eq!(count.rows[0].get("n"), Some(&SqlValue::I64(3)));

        manager.disconnect().await;
        assert!(!a.is_connected().await);
    }

    #[tokio::test]
    async fn test_failing_init_script_aborts_startup() {
        let manager = ConnectorManager::with_defaults(vec![
            sqlite_source("good"),
            SourceConfig {
                init_script: Some("CREATE TABLE broken (".to_string()),
                ..SourceConfig::from_dsn("bad", "sqlite:///:memory:")
            },
        ])
        .unwrap();

        let err = manager.start().await.unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");
        assert!(!manager.is_connected("good"));
    }

    #[tokio::test]
    async fn test_file_database_readonly_session() {
        let path = std::env::temp_dir().join(format!("sql-gateway-{}.db", uuid::Uuid::new_v4()));
        let dsn = format!("sqlite://{}", path.display());

        let writer = started(vec![SourceConfig {
            init_script: Some("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1)".into()),
            ..SourceConfig::from_dsn("writer", dsn.clone())
        }])
        .await;
        writer.disconnect().await;

        let reader = started(vec![SourceConfig {
            readonly: true,
            ..SourceConfig::from_dsn("reader", dsn)
        }])
        .await;
        let connector = reader.get_connector(None).await.unwrap();
        let rows = connector
            .execute_sql("SELECT v FROM t", &ExecuteOptions::default(), &[])
            .await
            .unwrap();
        assert_eq!(rows.rows[0].get("v"), Some(&SqlValue::I64(1)));

        // The session itself refuses writes even without the statement gate
        let err = connector
            .execute_sql("INSERT INTO t VALUES (2)", &ExecuteOptions::default(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");
        reader.disconnect().await;

        let _ = std::fs::remove_file(path);
    }
}

// =============================================================================
// PostgreSQL Tests
// =============================================================================

mod postgres_tests {
    use super::*;

    struct TestPostgres {
        #[allow(dead_code)] // Held for lifetime management (Drop trait on Container)
        container: Option<ContainerAsync<Postgres>>,
        dsn: String,
    }

    impl TestPostgres {
        async fn new() -> Self {
            if let Ok(dsn) = std::env::var("PG_DSN") {
                eprintln!("Using external PostgreSQL");
                return Self {
                    container: None,
                    dsn,
                };
            }

            let container = Postgres::default()
                .with_tag("16-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");
            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            Self {
                container: Some(container),
                dsn: format!("postgres://postgres:postgres@{}:{}/postgres", host, port),
            }
        }
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_postgres_end_to_end() {
        let pg = TestPostgres::new().await;
        let manager = started(vec![SourceConfig {
            init_script: Some(
                "DROP TABLE IF EXISTS gateway_items; \
                 CREATE TABLE gateway_items (id SERIAL PRIMARY KEY, name TEXT NOT NULL, price NUMERIC(10,2)); \
                 INSERT INTO gateway_items (name, price) VALUES ('a', 1.50), ('b', 2.00), ('c', 3.25)"
                    .into(),
            ),
            max_rows: Some(2),
            ..SourceConfig::from_dsn("pg", pg.dsn.clone())
        }])
        .await;

        let limited = manager
            .execute(None, "SELECT * FROM gateway_items ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(limited.rows.len(), 2);

        let found = manager
            .execute(
                None,
                "SELECT name FROM gateway_items WHERE name = $1 AND 'literal $2' <> ''",
                &[SqlValue::String("c".into())],
            )
            .await
            .unwrap();
        assert_eq!(found.rows[0].get("name"), Some(&SqlValue::String("c".into())));

        let connector = manager.get_connector(None).await.unwrap();
        assert!(connector.table_exists("gateway_items", None).await.unwrap());
        let indexes = connector
            .get_table_indexes("gateway_items", None)
            .await
            .unwrap();
        assert!(indexes.iter().any(|i| i.is_primary));

        manager.disconnect().await;
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_postgres_types_without_direct_mapping_keep_their_values() {
        let pg = TestPostgres::new().await;
        let manager = started(vec![SourceConfig {
            init_script: Some(
                "DROP TYPE IF EXISTS gateway_mood; \
                 CREATE TYPE gateway_mood AS ENUM ('happy', 'sad')"
                    .into(),
            ),
            ..SourceConfig::from_dsn("pg", pg.dsn.clone())
        }])
        .await;

        let result = manager
            .execute(
                None,
                "SELECT INTERVAL '1 day' AS iv, '10.0.0.1'::inet AS ip, \
                 TIME WITH TIME ZONE '10:00+02' AS tz, 'happy'::gateway_mood AS mood, \
                 12.50::money AS cash, NULL::inet AS missing",
                &[],
            )
            .await
            .unwrap();

        let row = &result.rows[0];
        assert_eq!(row.get("iv"), Some(&SqlValue::String("1 day".into())));
        assert_eq!(row.get("ip"), Some(&SqlValue::String("10.0.0.1".into())));
        assert_eq!(row.get("tz"), Some(&SqlValue::String("10:00:00+02:00".into())));
        assert_eq!(row.get("mood"), Some(&SqlValue::String("happy".into())));
        assert_eq!(
            row.get("cash"),
            Some(&SqlValue::Decimal(rust_decimal::Decimal::new(1250, 2)))
        );
        assert_eq!(row.get("missing"), Some(&SqlValue::Null));

        manager.disconnect().await;
    }
}

// =============================================================================
// MySQL Tests
// =============================================================================

mod mysql_tests {
    use super::*;

    struct TestMysql {
        #[allow(dead_code)] // Held for lifetime management (Drop trait on Container)
        container: Option<ContainerAsync<Mysql>>,
        dsn: String,
    }

    impl TestMysql {
        async fn new() -> Self {
            if let Ok(dsn) = std::env::var("MYSQL_DSN") {
                eprintln!("Using external MySQL");
                return Self {
                    container: None,
                    dsn,
                };
            }

            let container = Mysql::default()
                .start()
                .await
                .expect("Failed to start MySQL container");
            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(3306)
                .await
                .expect("Failed to get port");

            Self {
                container: Some(container),
                dsn: format!("mysql://root@{}:{}/test", host, port),
            }
        }
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_mysql_end_to_end() {
        let mysql = TestMysql::new().await;
        let manager = started(vec![
            SourceConfig {
                init_script: Some(
                    "DROP TABLE IF EXISTS gateway_items; \
                     CREATE TABLE gateway_items (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(50) NOT NULL); \
                     INSERT INTO gateway_items (name) VALUES ('a'), ('b'), ('c')"
                        .into(),
                ),
                max_rows: Some(2),
                ..SourceConfig::from_dsn("rw", mysql.dsn.clone())
            },
            SourceConfig {
                readonly: true,
                ..SourceConfig::from_dsn("ro", mysql.dsn.clone())
            },
        ])
        .await;

        let limited = manager
            .execute(Some("rw"), "SELECT * FROM gateway_items ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(limited.rows.len(), 2);

        let found = manager
            .execute(
                Some("rw"),
                "SELECT name FROM gateway_items WHERE name = ? AND '?' <> ''",
                &[SqlValue::String("c".into())],
            )
            .await
            .unwrap();
        assert_eq!(found.rows[0].get("name"), Some(&SqlValue::String("c".into())));

        // Not supported by the prepared statement protocol
        manager
            .execute(
                Some("rw"),
                "DROP PROCEDURE IF EXISTS gateway_touch; \
                 CREATE PROCEDURE gateway_touch() SELECT COUNT(*) FROM gateway_items",
                &[],
            )
            .await
            .unwrap();
        let connector = manager.get_connector(Some("rw")).await.unwrap();
        assert!(connector
            .get_stored_procedures(None)
            .await
            .unwrap()
            .contains(&"gateway_touch".to_string()));

        let err = manager
            .execute(Some("ro"), "DELETE FROM gateway_items", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "READONLY_VIOLATION");
        let count = manager
            .execute(Some("ro"), "SELECT COUNT(*) AS n FROM gateway_items", &[])
            .await
            .unwrap();
        assert_eq!(count.rows[0].get("n"), Some(&SqlValue::I64(3)));

        manager.disconnect().await;
    }
}

// =============================================================================
// SQL Server Tests
// =============================================================================

mod sqlserver_tests {
    use super::*;

    struct TestSqlServer {
        #[allow(dead_code)] // Held for lifetime management (Drop trait on Container)
        container: Option<Box<ContainerAsync<MssqlServer>>>,
        dsn: String,
    }

    impl TestSqlServer {
        async fn new() -> Self {
            if let Ok(dsn) = std::env::var("MSSQL_DSN") {
                eprintln!("Using external SQL Server");
                return Self {
                    container: None,
                    dsn,
                };
            }

            let container = MssqlServer::default()
                .with_accept_eula()
                .with_tag("2022-latest")
                .start()
                .await
                .expect("Failed to start SQL Server container");
            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(1433)
                .await
                .expect("Failed to get port");

            // Wait a bit for SQL Server to fully initialize
            tokio::time::sleep(Duration::from_secs(5)).await;

            let password: String = url::form_urlencoded::byte_serialize(DEFAULT_SA_PASSWORD.as_bytes()).collect();
            Self {
                container: Some(Box::new(container)),
                dsn: format!(
                    "sqlserver://sa:{}@{}:{}/master?trustServerCertificate=true",
                    password, host, port
                ),
            }
        }
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    #[serial]
    async fn test_sqlserver_end_to_end() {
        let server = TestSqlServer::new().await;
        let manager = started(vec![SourceConfig {
            max_rows: Some(1),
            ..SourceConfig::from_dsn("mssql", server.dsn.clone())
        }])
        .await;

        let limited = manager
            .execute(
                None,
                "SELECT TOP 5 name FROM sys.objects ORDER BY name",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(limited.rows.len(), 1);

        let echoed = manager
            .execute(None, "SELECT @p1 AS v", &[SqlValue::I32(42)])
            .await
            .unwrap();
        assert_eq!(echoed.rows[0].get("v"), Some(&SqlValue::I32(42)));

        let price = rust_decimal::Decimal::new(1250, 2);
        let echoed = manager
            .execute(None, "SELECT @P1 AS d", &[SqlValue::Decimal(price)])
            .await
            .unwrap();
        assert_eq!(echoed.rows[0].get("d"), Some(&SqlValue::Decimal(price)));

        let connector = manager.get_connector(None).await.unwrap();
        assert!(connector.get_schemas().await.unwrap().contains(&"dbo".to_string()));

        manager.disconnect().await;
    }
}
