//! Server-side parameter typing for PostgreSQL.
//!
//! `sqlx` binds nulls and strings as `TEXT`, which PostgreSQL refuses to
//! store in integer, timestamp, JSON or UUID columns. Before running such a
//! statement the session prepares it under a throwaway name, reads the
//! parameter types the server inferred, and casts the untyped values to them.

use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::{AnyConnection, Executor as _, Row as _};

use crate::database::params::Statement;

static DESCRIBE_SEQ: AtomicU64 = AtomicU64::new(0);

/// SQL with casts for untyped values, or `None` when none are needed or the
/// server could not describe the statement.
pub(super) async fn typed_sql(conn: &mut AnyConnection, statement: &Statement) -> Option<String> {
    if !statement.has_untyped_values() {
        return None;
    }

    // Prepared statements outlive savepoint rollback; unique names keep a
    // failed describe from blocking the next one.
    let name = format!(
        "asyncdb_describe_{}",
        DESCRIBE_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let script = describe_script(&name, statement.sql());

    match conn.fetch_all(sqlx::raw_sql(&script)).await {
        Ok(rows) => {
            let types = rows
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<Vec<_>, _>>()
                .ok()?;
            Some(statement.with_casts(&types))
        }
        Err(err) => {
            tracing::debug!("Parameter types not inferred, binding as sent: {}", err);
            let undo = format!("ROLLBACK TO SAVEPOINT {name};\nRELEASE SAVEPOINT {name}");
            if let Err(err) = conn.execute(sqlx::raw_sql(&undo)).await {
                tracing::warn!("Failed to undo parameter type inference: {}", err);
            }
            None
        }
    }
}

/// One simple-query round trip: prepare inside a savepoint, list the
/// parameter types in order, drop the statement, release the savepoint.
fn describe_script(name: &str, sql: &str) -> String {
    let body = sql.trim_end().trim_end_matches(';');
    format!(
        "SAVEPOINT {name};\n\
         PREPARE {name} AS {body}\n;\n\
         SELECT p.t::text FROM pg_prepared_statements s, \
         unnest(s.parameter_types) WITH ORDINALITY AS p(t, n) \
         WHERE s.name = '{name}' ORDER BY p.n;\n\
         DEALLOCATE {name};\n\
         RELEASE SAVEPOINT {name}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_script() {
        let script = describe_script("asyncdb_describe_7", "INSERT INTO t (a) VALUES ($1); \n");
        assert_eq!(
            script,
            "SAVEPOINT asyncdb_describe_7;\n\
             PREPARE asyncdb_describe_7 AS INSERT INTO t (a) VALUES ($1)\n;\n\
             SELECT p.t::text FROM pg_prepared_statements s, \
             unnest(s.parameter_types) WITH ORDINALITY AS p(t, n) \
             WHERE s.name = 'asyncdb_describe_7' ORDER BY p.n;\n\
             DEALLOCATE asyncdb_describe_7;\n\
             RELEASE SAVEPOINT asyncdb_describe_7"
        );
    }

    #[test]
    fn test_trailing_comment_stays_on_its_own_line() {
        let script = describe_script("d", "SELECT $1 -- note");
        assert!(script.contains("PREPARE d AS SELECT $1 -- note\n;\n"));
    }
}
