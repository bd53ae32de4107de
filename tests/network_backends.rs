//! Network Backend Integration Tests for asyncdb
//!
//! Run against live servers with `cargo test -- --ignored`. Connection
//! settings come from `ASYNCDB_TEST_{PG,MYSQL}_{HOST,PORT,USER,PASSWORD,DATABASE}`
//! and default to a local server with stock credentials.

use std::time::Duration;

use asyncdb::{
    AsyncDatabase, ClientOptions, Credentials, DatabaseError, ErrorCategory, MySqlBackend,
    Params, PostgresBackend, RetryPolicy,
};
use serde_json::json;

// =============================================================================
// Test Helpers
// =============================================================================

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn credentials(prefix: &str, port: u16, user: &str, database: &str) -> Credentials {
    let port = env_or(&format!("{prefix}_PORT"), &port.to_string())
        .parse()
        .expect("port must be a number");
    Credentials::new(
        env_or(&format!("{prefix}_USER"), user),
        env_or(&format!("{prefix}_PASSWORD"), user),
        env_or(&format!("{prefix}_HOST"), "localhost"),
    )
    .with_port(port)
    .with_database(env_or(&format!("{prefix}_DATABASE"), database))
}

fn options() -> ClientOptions {
    ClientOptions::default()
        .with_retry(RetryPolicy::new(1).with_initial_delay(Duration::from_millis(10)))
}

fn postgres() -> AsyncDatabase {
    let credentials = credentials("ASYNCDB_TEST_PG", 5432, "postgres", "postgres");
    AsyncDatabase::new(PostgresBackend::new(&credentials).unwrap(), options()).unwrap()
}

fn mysql() -> AsyncDatabase {
    let credentials = credentials("ASYNCDB_TEST_MYSQL", 3306, "root", "mysql");
    AsyncDatabase::new(MySqlBackend::new(&credentials).unwrap(), options()).unwrap()
}

/// Unique table name so concurrent runs do not collide.
fn table(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{prefix}_{}_{nanos}", std::process::id())
}

// =============================================================================
// PostgreSQL Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn test_postgres_untyped_values_take_column_types() {
    let db = postgres();
    let events = table("events");
    db.execute(
        &format!(
            "CREATE TABLE {events} (id BIGINT PRIMARY KEY, retries INT, at TIMESTAMPTZ, \
             payload JSONB, trace UUID, label VARCHAR(20))"
        ),
        Params::None,
        false,
    )
    .await
    .unwrap();

    let affected = db
        .execute(
            &format!(
                "INSERT INTO {events} (id, retries, at, payload, trace, label) \
                 VALUES (:id, :retries, :at, :payload, :trace, :label)"
            ),
            json!({
                "id": 1,
                "retries": null,
                "at": "2024-05-01T10:00:00Z",
                "payload": {"tags": ["a", "b"]},
                "trace": "4b1c7c1e-4a8f-4c4a-9c3e-2f8b8f6a9d10",
                "label": "deploy",
            }),
            false,
        )
        .await
        .unwrap()
        .rows_affected();
    assert_eq!(affected, Some(1));

    let row = db
        .fetch_one(
            &format!(
                "SELECT retries, at = :at AS same_instant, payload ->> 'tags' AS tags, \
                 trace::text AS trace, label FROM {events} WHERE at > :since"
            ),
            json!({"at": "2024-05-01T12:00:00+02:00", "since": "2024-01-01"}),
        )
        .await
        .unwrap()
        .expect("inserted row matches");
    assert_eq!(row["retries"], json!(null));
    assert_eq!(row["same_instant"], json!(true));
    assert_eq!(row["tags"], json!(r#"["a", "b"]"#));
    assert_eq!(row["trace"], json!("4b1c7c1e-4a8f-4c4a-9c3e-2f8b8f6a9d10"));
    assert_eq!(row["label"], json!("deploy"));

    db.execute(&format!("DROP TABLE {events}"), Params::None, false)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn test_postgres_unique_violation_is_query_execution() {
    let db = postgres();
    let users = table("users");
    db.execute(&format!("CREATE TABLE {users} (id INT PRIMARY KEY)"), Params::None, false)
        .await
        .unwrap();

    let insert = format!("INSERT INTO {users} (id) VALUES ($1)");
    db.execute(&insert, json!([1]), false).await.unwrap();
    let err = db.execute(&insert, json!([1]), false).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::QueryExecution);
    assert_eq!(err.native_code(), Some("23505"));

    db.execute(&format!("DROP TABLE {users}"), Params::None, false)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn test_postgres_terminated_backend_is_connection_loss() {
    let db = postgres();

    let err = db
        .fetch_all("SELECT pg_terminate_backend(pg_backend_pid())", Params::None)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::RetryExhausted);
    assert_eq!(err.attempts(), Some(2));
    assert_eq!(
        err.last_cause().map(DatabaseError::category),
        Some(ErrorCategory::Connection)
    );

    // The pool replaces the dead connection.
    db.ping().await.unwrap();
}

// =============================================================================
// MySQL Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires a MySQL server"]
async fn test_mysql_native_errors_are_query_execution() {
    let db = mysql();
    let users = table("users");
    db.execute(&format!("CREATE TABLE {users} (id INT PRIMARY KEY)"), Params::None, false)
        .await
        .unwrap();

    let insert = format!("INSERT INTO {users} (id) VALUES (:id)");
    db.execute(&insert, json!({"id": 1}), false).await.unwrap();
    let err = db.execute(&insert, json!({"id": 1}), false).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::QueryExecution);
    assert_eq!(err.native_code(), Some("23000"));

    let err = db
        .fetch_all("SELECT * FROM asyncdb_no_such_table", Params::None)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::QueryExecution);
    assert_eq!(err.native_code(), Some("42S02"));

    db.execute(&format!("DROP TABLE {users}"), Params::None, false)
        .await
        .unwrap();
}
