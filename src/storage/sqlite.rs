use crate::catalog::types::{ColumnType, Row, Value};
use crate::storage::{Param, Statement, StatementExecutor, StoreError};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, params_from_iter};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Statement executor over one shared SQLite connection.
///
/// Calls from independent threads serialize on the connection; row-level
/// atomicity and the uniqueness constraints come from SQLite itself.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExecutor").finish_non_exhaustive()
    }
}

impl SqliteExecutor {
    pub fn open_in_memory(busy_timeout_ms: u64) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::from_connection(conn, busy_timeout_ms)
    }

    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        Self::from_connection(conn, busy_timeout_ms)
    }

    pub fn from_connection(conn: Connection, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .map_err(map_sqlite_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StatementExecutor for SqliteExecutor {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock();
        query_on(&conn, statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        execute_on(&conn, statement)
    }

    fn execute_batch(&self, statements: &[Statement]) -> Result<u64, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_sqlite_error)?;
        let mut affected = 0u64;
        for (index, statement) in statements.iter().enumerate() {
            match execute_on(&tx, statement) {
                Ok(rows) => affected += rows,
                // Dropping the transaction rolls back earlier statements.
                Err(source) => {
                    return Err(StoreError::Batch {
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }
        tx.commit().map_err(map_sqlite_error)?;
        debug!(statements = statements.len(), affected, "sqlite batch committed");
        Ok(affected)
    }

    fn execute_ddl(&self, sql: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(sql).map_err(map_sqlite_error)
    }
}

fn query_on(conn: &Connection, statement: &Statement) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare_cached(&statement.sql).map_err(map_sqlite_error)?;
    let mut rows = stmt
        .query(params_from_iter(statement.params.iter().map(bind)))
        .map_err(map_sqlite_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqlite_error)? {
        let mut values = Vec::with_capacity(statement.columns.len());
        for (column, expected) in statement.columns.iter().enumerate() {
            let raw = row.get_ref(column).map_err(map_sqlite_error)?;
            values.push(decode(column, *expected, raw)?);
        }
        out.push(Row::from_values(values));
    }
    Ok(out)
}

fn execute_on(conn: &Connection, statement: &Statement) -> Result<u64, StoreError> {
    let mut stmt = conn.prepare_cached(&statement.sql).map_err(map_sqlite_error)?;
    let affected = stmt
        .execute(params_from_iter(statement.params.iter().map(bind)))
        .map_err(map_sqlite_error)?;
    Ok(affected as u64)
}

fn bind(param: &Param) -> SqlValue {
    match param.value() {
        Value::Integer(v) => SqlValue::Integer(i64::from(*v)),
        Value::Long(v) | Value::Timestamp(v) => SqlValue::Integer(*v),
        Value::Boolean(v) => SqlValue::Integer(i64::from(*v)),
        Value::String(v) => SqlValue::Text(v.to_string()),
        Value::Decimal(v) => SqlValue::Text(v.normalize().to_string()),
    }
}

fn decode(column: usize, expected: ColumnType, raw: ValueRef<'_>) -> Result<Value, StoreError> {
    let fail = |message: String| StoreError::Decode {
        column,
        expected,
        message,
    };
    match (expected, raw) {
        (ColumnType::Integer, ValueRef::Integer(v)) => i32::try_from(v)
            .map(Value::Integer)
            .map_err(|_| fail(format!("{v} out of range"))),
        (ColumnType::Long, ValueRef::Integer(v)) => Ok(Value::Long(v)),
        (ColumnType::Timestamp, ValueRef::Integer(v)) => Ok(Value::Timestamp(v)),
        (ColumnType::Boolean, ValueRef::Integer(v)) => Ok(Value::Boolean(v != 0)),
        (ColumnType::String, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
            .map(Value::from)
            .map_err(|err| fail(err.to_string())),
        (ColumnType::Decimal, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
            .map_err(|err| fail(err.to_string()))
            .and_then(|s| Decimal::from_str(s).map_err(|err| fail(err.to_string())))
            .map(Value::Decimal),
        (ColumnType::Decimal, ValueRef::Integer(v)) => Ok(Value::Decimal(Decimal::from(v))),
        (_, other) => Err(fail(format!("unexpected {:?}", other.data_type()))),
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::ConstraintViolation(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteExecutor;
    use crate::catalog::types::{ColumnType, Value};
    use crate::storage::{Param, StatKey, Statement, StatementExecutor, StoreError};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn executor() -> SqliteExecutor {
        let exec = SqliteExecutor::open_in_memory(1_000).expect("open");
        exec.execute_ddl("CREATE TABLE t (id TEXT NOT NULL PRIMARY KEY, n INTEGER NOT NULL, d TEXT NOT NULL)")
            .expect("ddl");
        exec
    }

    fn insert(id: &str, n: i32, d: &str) -> Statement {
        Statement::new("INSERT INTO t (id, n, d) VALUES (?, ?, ?)".into(), StatKey::PrimaryIndexWrite)
            .bind(Param::typed("id", ColumnType::String, &Value::from(id)).expect("id"))
            .bind(Param::typed("n", ColumnType::Integer, &Value::from(n)).expect("n"))
            .bind(
                Param::typed(
                    "d",
                    ColumnType::Decimal,
                    &Value::from(Decimal::from_str(d).expect("decimal")),
                )
                .expect("d"),
            )
    }

    fn select_all() -> Statement {
        Statement::new("SELECT id, n, d FROM t ORDER BY id".into(), StatKey::PrimaryIndexRead)
            .returning(&[ColumnType::String, ColumnType::Integer, ColumnType::Decimal])
    }

    #[test]
    fn rows_decode_to_declared_kinds() {
        let exec = executor();
        assert_eq!(exec.execute(&insert("NA", 3, "2.50")).expect("insert"), 1);
        let rows = exec.query(&select_all()).expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], Value::from("NA"));
        assert_eq!(rows[0].values[1], Value::Integer(3));
        assert_eq!(
            rows[0].values[2],
            Value::from(Decimal::from_str("2.5").expect("decimal"))
        );
    }

    #[test]
    fn duplicate_primary_key_is_a_constraint_violation() {
        let exec = executor();
        exec.execute(&insert("NA", 1, "1")).expect("first");
        let err = exec.execute(&insert("NA", 2, "1")).expect_err("duplicate");
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn failed_batch_rolls_back_and_reports_index() {
        let exec = executor();
        let err = exec
            .execute_batch(&[insert("EU", 1, "1"), insert("EU", 2, "1")])
            .expect_err("duplicate in batch");
        match err {
            StoreError::Batch { index, source } => {
                assert_eq!(index, 1);
                assert!(source.is_constraint_violation());
            }
            other => panic!("unexpected {other}"),
        }
        assert!(exec.query(&select_all()).expect("select").is_empty());
    }

    #[test]
    fn mismatched_storage_class_fails_decode() {
        let exec = executor();
        exec.execute(&insert("NA", 1, "1")).expect("insert");
        let wrong = Statement::new("SELECT id FROM t".into(), StatKey::PrimaryIndexRead)
            .returning(&[ColumnType::Long]);
        let err = exec.query(&wrong).expect_err("text is not long");
        assert!(matches!(err, StoreError::Decode { column: 0, .. }));
    }
}
