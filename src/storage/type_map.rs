use crate::catalog::types::ColumnType;

/// Maps each primitive kind to the backing store's native column type.
pub trait StorageTypeMap: Send + Sync {
    fn storage_type(&self, column_type: ColumnType) -> &'static str;

    fn dialect(&self) -> &'static str;
}

/// SQLite storage classes. Booleans and timestamps are stored as integers,
/// decimals as their normalized text form.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTypeMap;

impl StorageTypeMap for SqliteTypeMap {
    fn storage_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Integer
            | ColumnType::Long
            | ColumnType::Boolean
            | ColumnType::Timestamp => "INTEGER",
            ColumnType::String | ColumnType::Decimal => "TEXT",
        }
    }

    fn dialect(&self) -> &'static str {
        "sqlite"
    }
}

/// ANSI SQL column types, for stores that enforce declared widths.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiTypeMap;

impl StorageTypeMap for AnsiTypeMap {
    fn storage_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Integer => "INTEGER",
            ColumnType::Long => "BIGINT",
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Decimal => "DECIMAL(38,10)",
        }
    }

    fn dialect(&self) -> &'static str {
        "ansi"
    }
}

#[cfg(test)]
mod tests {
    use super::{AnsiTypeMap, SqliteTypeMap, StorageTypeMap};
    use crate::catalog::types::ColumnType;

    #[test]
    fn sqlite_folds_numeric_kinds_into_integer() {
        let map = SqliteTypeMap;
        assert_eq!(map.storage_type(ColumnType::Boolean), "INTEGER");
        assert_eq!(map.storage_type(ColumnType::Timestamp), "INTEGER");
        assert_eq!(map.storage_type(ColumnType::Decimal), "TEXT");
    }

    #[test]
    fn ansi_keeps_distinct_types() {
        let map = AnsiTypeMap;
        assert_eq!(map.storage_type(ColumnType::Long), "BIGINT");
        assert_eq!(map.storage_type(ColumnType::String), "VARCHAR(255)");
        assert_eq!(map.dialect(), "ansi");
    }
}
