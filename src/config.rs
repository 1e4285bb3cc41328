use crate::error::DirectoryError;
use crate::storage::type_map::{AnsiTypeMap, SqliteTypeMap, StorageTypeMap};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreLocation {
    #[default]
    InMemory,
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    Sqlite,
    Ansi,
}

impl SqlDialect {
    pub fn type_map(self) -> Arc<dyn StorageTypeMap> {
        match self {
            SqlDialect::Sqlite => Arc::new(SqliteTypeMap),
            SqlDialect::Ansi => Arc::new(AnsiTypeMap),
        }
    }
}

/// Runtime configuration for a directory.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub store: StoreLocation,
    /// Column types used in generated DDL. The bundled SQLite executor
    /// always uses [`SqlDialect::Sqlite`].
    pub dialect: SqlDialect,
    pub busy_timeout_ms: u64,
    pub instrumented: bool,
    pub auto_install: bool,
    pub sql_cache_capacity: usize,
    pub max_batch_mutations: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            store: StoreLocation::InMemory,
            dialect: SqlDialect::Sqlite,
            busy_timeout_ms: 5_000,
            instrumented: false,
            auto_install: true,
            sql_cache_capacity: 256,
            max_batch_mutations: 10_000,
        }
    }
}

impl DirectoryConfig {
    pub fn development() -> Self {
        Self {
            store: StoreLocation::InMemory,
            instrumented: true,
            busy_timeout_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreLocation::File(path.into()),
            ..Self::default()
        }
    }

    pub fn with_instrumentation(mut self, instrumented: bool) -> Self {
        self.instrumented = instrumented;
        self
    }

    pub fn with_auto_install(mut self, auto_install: bool) -> Self {
        self.auto_install = auto_install;
        self
    }

    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    pub fn with_sql_cache_capacity(mut self, capacity: usize) -> Self {
        self.sql_cache_capacity = capacity;
        self
    }

    pub fn with_max_batch_mutations(mut self, max: usize) -> Self {
        self.max_batch_mutations = max;
        self
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.sql_cache_capacity == 0 {
            return Err(DirectoryError::InvalidConfig {
                message: "sql_cache_capacity must be > 0".into(),
            });
        }
        if self.max_batch_mutations == 0 {
            return Err(DirectoryError::InvalidConfig {
                message: "max_batch_mutations must be > 0".into(),
            });
        }
        if matches!(&self.store, StoreLocation::File(path) if path.as_os_str().is_empty()) {
            return Err(DirectoryError::InvalidConfig {
                message: "store path must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectoryConfig, StoreLocation};
    use crate::error::DirectoryErrorCode;

    #[test]
    fn profiles_differ_only_where_named() {
        let dev = DirectoryConfig::development();
        assert!(dev.instrumented);
        assert_eq!(dev.store, StoreLocation::InMemory);

        let disk = DirectoryConfig::persistent("/tmp/dir.db");
        assert!(!disk.instrumented);
        assert_eq!(disk.store, StoreLocation::File("/tmp/dir.db".into()));
        assert_eq!(disk.max_batch_mutations, DirectoryConfig::default().max_batch_mutations);
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let err = DirectoryConfig::default()
            .with_sql_cache_capacity(0)
            .validate()
            .expect_err("zero cache");
        assert_eq!(err.code(), DirectoryErrorCode::InvalidConfig);
        assert!(
            DirectoryConfig::default()
                .with_max_batch_mutations(0)
                .validate()
                .is_err()
        );
        DirectoryConfig::development().validate().expect("valid");
    }
}
