use crate::lock::LockLevel;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    PartitionDimension,
    Resource,
    SecondaryIndex,
    Node,
    PrimaryIndexKey,
    ResourceId,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::PartitionDimension => write!(f, "partition dimension"),
            EntityKind::Resource => write!(f, "resource"),
            EntityKind::SecondaryIndex => write!(f, "secondary index"),
            EntityKind::Node => write!(f, "node"),
            EntityKind::PrimaryIndexKey => write!(f, "primary index key"),
            EntityKind::ResourceId => write!(f, "resource id"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryErrorCode {
    KeyNotFound,
    DirectoryCorruption,
    LockViolation,
    ConfigurationConflict,
    BackingStore,
    DuplicateKey,
    TypeMismatch,
    InvalidConfig,
    Validation,
    BatchFailed,
}

impl DirectoryErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DirectoryErrorCode::KeyNotFound => "key_not_found",
            DirectoryErrorCode::DirectoryCorruption => "directory_corruption",
            DirectoryErrorCode::LockViolation => "lock_violation",
            DirectoryErrorCode::ConfigurationConflict => "configuration_conflict",
            DirectoryErrorCode::BackingStore => "backing_store",
            DirectoryErrorCode::DuplicateKey => "duplicate_key",
            DirectoryErrorCode::TypeMismatch => "type_mismatch",
            DirectoryErrorCode::InvalidConfig => "invalid_config",
            DirectoryErrorCode::Validation => "validation",
            DirectoryErrorCode::BatchFailed => "batch_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{entity} {key} not found")]
    KeyNotFound { entity: EntityKind, key: String },
    #[error("directory corruption: {message}")]
    DirectoryCorruption { message: String },
    #[error("{level} is read-only; write to {key} rejected")]
    LockViolation { level: LockLevel, key: String },
    #[error("configuration conflict: {message}")]
    ConfigurationConflict { message: String },
    #[error("backing store failure: {0}")]
    BackingStore(#[from] StoreError),
    #[error("primary index key {key} already exists")]
    DuplicateKey { key: String },
    #[error("type mismatch: column '{column}' expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("batch aborted at mutation {index}: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<DirectoryError>,
    },
}

impl DirectoryError {
    pub fn code(&self) -> DirectoryErrorCode {
        match self {
            DirectoryError::KeyNotFound { .. } => DirectoryErrorCode::KeyNotFound,
            DirectoryError::DirectoryCorruption { .. } => DirectoryErrorCode::DirectoryCorruption,
            DirectoryError::LockViolation { .. } => DirectoryErrorCode::LockViolation,
            DirectoryError::ConfigurationConflict { .. } => {
                DirectoryErrorCode::ConfigurationConflict
            }
            DirectoryError::BackingStore(_) => DirectoryErrorCode::BackingStore,
            DirectoryError::DuplicateKey { .. } => DirectoryErrorCode::DuplicateKey,
            DirectoryError::TypeMismatch { .. } => DirectoryErrorCode::TypeMismatch,
            DirectoryError::InvalidConfig { .. } => DirectoryErrorCode::InvalidConfig,
            DirectoryError::Validation(_) => DirectoryErrorCode::Validation,
            DirectoryError::BatchFailed { .. } => DirectoryErrorCode::BatchFailed,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// The error that caused a batch to abort, or `self` otherwise.
    pub fn root(&self) -> &DirectoryError {
        match self {
            DirectoryError::BatchFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn not_found(entity: EntityKind, key: impl ToString) -> Self {
        DirectoryError::KeyNotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        DirectoryError::DirectoryCorruption {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectoryError, DirectoryErrorCode, EntityKind};
    use crate::lock::LockLevel;

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(DirectoryErrorCode::KeyNotFound.as_str(), "key_not_found");
        assert_eq!(
            DirectoryErrorCode::DirectoryCorruption.as_str(),
            "directory_corruption"
        );
        assert_eq!(DirectoryErrorCode::LockViolation.as_str(), "lock_violation");
    }

    #[test]
    fn not_found_and_lock_violation_are_distinct() {
        let missing = DirectoryError::not_found(EntityKind::ResourceId, 100);
        let locked = DirectoryError::LockViolation {
            level: LockLevel::Node(1.into()),
            key: "'NA'".into(),
        };
        assert_eq!(missing.code(), DirectoryErrorCode::KeyNotFound);
        assert_eq!(locked.code(), DirectoryErrorCode::LockViolation);
        assert_eq!(missing.to_string(), "resource id 100 not found");
        assert_eq!(
            locked.to_string(),
            "node 1 is read-only; write to 'NA' rejected"
        );
    }

    #[test]
    fn root_unwraps_batch_failures() {
        let err = DirectoryError::BatchFailed {
            index: 2,
            source: Box::new(DirectoryError::corruption("two owners")),
        };
        assert_eq!(err.code_str(), "batch_failed");
        assert_eq!(err.root().code(), DirectoryErrorCode::DirectoryCorruption);
    }
}
