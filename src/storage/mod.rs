pub mod instrumented;
pub mod sql;
pub mod sqlite;
pub mod type_map;

use crate::catalog::types::{ColumnType, Row, Value};
use crate::error::DirectoryError;
use smallvec::SmallVec;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("cannot decode column {column} as {expected}: {message}")]
    Decode {
        column: usize,
        expected: ColumnType,
        message: String,
    },
    #[error("statement {index} of batch failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::ConstraintViolation(_) => true,
            StoreError::Batch { source, .. } => source.is_constraint_violation(),
            _ => false,
        }
    }
}

/// Accounting bucket of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatKey {
    PrimaryIndexRead,
    PrimaryIndexWrite,
    PrimaryIndexDelete,
    SecondaryIndexRead,
    SecondaryIndexWrite,
    SecondaryIndexDelete,
    Metadata,
}

impl StatKey {
    pub const ALL: [StatKey; 7] = [
        StatKey::PrimaryIndexRead,
        StatKey::PrimaryIndexWrite,
        StatKey::PrimaryIndexDelete,
        StatKey::SecondaryIndexRead,
        StatKey::SecondaryIndexWrite,
        StatKey::SecondaryIndexDelete,
        StatKey::Metadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatKey::PrimaryIndexRead => "PRIMARY_INDEX_READ",
            StatKey::PrimaryIndexWrite => "PRIMARY_INDEX_WRITE",
            StatKey::PrimaryIndexDelete => "PRIMARY_INDEX_DELETE",
            StatKey::SecondaryIndexRead => "SECONDARY_INDEX_READ",
            StatKey::SecondaryIndexWrite => "SECONDARY_INDEX_WRITE",
            StatKey::SecondaryIndexDelete => "SECONDARY_INDEX_DELETE",
            StatKey::Metadata => "METADATA",
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// A value bound to the declared type of the column it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    column_type: ColumnType,
    value: Value,
}

impl Param {
    pub fn typed(
        column: &str,
        column_type: ColumnType,
        value: &Value,
    ) -> Result<Self, DirectoryError> {
        if value.column_type() != column_type {
            return Err(DirectoryError::TypeMismatch {
                column: column.to_string(),
                expected: column_type.to_string(),
                actual: value.column_type().to_string(),
            });
        }
        Ok(Self {
            column_type,
            value: value.clone(),
        })
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A parameterized statement: SQL text, typed parameters in placeholder
/// order, and the declared types of the result columns (empty for writes).
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: Arc<str>,
    pub params: SmallVec<[Param; 4]>,
    pub columns: SmallVec<[ColumnType; 2]>,
    pub stat: StatKey,
}

impl Statement {
    pub fn new(sql: Arc<str>, stat: StatKey) -> Self {
        Self {
            sql,
            params: SmallVec::new(),
            columns: SmallVec::new(),
            stat,
        }
    }

    pub fn bind(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn returning(mut self, columns: &[ColumnType]) -> Self {
        self.columns.extend_from_slice(columns);
        self
    }
}

/// The typed statement executor the directory runs against.
///
/// Implementations must be safe for concurrent use by independent callers.
/// `execute_batch` submits every statement as one grouped request and
/// reports the first failure; rollback of earlier statements follows the
/// backend's transactional capability.
pub trait StatementExecutor: Send + Sync {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError>;

    /// Returns the number of affected rows.
    fn execute(&self, statement: &Statement) -> Result<u64, StoreError>;

    fn execute_batch(&self, statements: &[Statement]) -> Result<u64, StoreError>;

    /// Runs schema statements that take no parameters.
    fn execute_ddl(&self, sql: &str) -> Result<(), StoreError>;
}

impl<T: StatementExecutor + ?Sized> StatementExecutor for Arc<T> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        (**self).query(statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        (**self).execute(statement)
    }

    fn execute_batch(&self, statements: &[Statement]) -> Result<u64, StoreError> {
        (**self).execute_batch(statements)
    }

    fn execute_ddl(&self, sql: &str) -> Result<(), StoreError> {
        (**self).execute_ddl(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::{Param, StatKey, Statement, StoreError};
    use crate::catalog::types::{ColumnType, Value};
    use crate::error::DirectoryErrorCode;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(Value::Integer),
            any::<i64>().prop_map(Value::Long),
            "\\PC{0,16}".prop_map(Value::from),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Timestamp),
        ]
    }

    fn arb_column_type() -> impl Strategy<Value = ColumnType> {
        prop_oneof![
            Just(ColumnType::Integer),
            Just(ColumnType::Long),
            Just(ColumnType::String),
            Just(ColumnType::Boolean),
            Just(ColumnType::Timestamp),
            Just(ColumnType::Decimal),
        ]
    }

    proptest! {
        #[test]
        fn typed_param_accepts_only_matching_kind(value in arb_value(), ty in arb_column_type()) {
            let result = Param::typed("id", ty, &value);
            if value.column_type() == ty {
                let param = result.expect("matching kind");
                prop_assert_eq!(param.value(), &value);
            } else {
                let err = result.expect_err("mismatched kind");
                prop_assert_eq!(err.code(), DirectoryErrorCode::TypeMismatch);
            }
        }
    }

    #[test]
    fn statement_keeps_placeholder_order() {
        let stmt = Statement::new("UPDATE t SET a = ? WHERE b = ?".into(), StatKey::PrimaryIndexWrite)
            .bind(Param::typed("a", ColumnType::Boolean, &Value::Boolean(true)).expect("a"))
            .bind(Param::typed("b", ColumnType::String, &Value::from("NA")).expect("b"));
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.params[0].column_type(), ColumnType::Boolean);
        assert_eq!(stmt.params[1].value(), &Value::from("NA"));
        assert!(stmt.columns.is_empty());
    }

    #[test]
    fn constraint_violation_is_seen_through_batches() {
        let err = StoreError::Batch {
            index: 1,
            source: Box::new(StoreError::ConstraintViolation("UNIQUE".into())),
        };
        assert!(err.is_constraint_violation());
        assert!(!StoreError::Backend("io".into()).is_constraint_violation());
    }

    #[test]
    fn stat_key_slots_are_dense() {
        for (pos, key) in StatKey::ALL.iter().enumerate() {
            assert_eq!(key.slot(), pos);
        }
    }
}
