pub mod catalog;
pub mod config;
pub mod declarative;
pub mod directory;
pub mod error;
pub mod lock;
pub mod storage;

pub use crate::catalog::types::{ColumnType, Row, Status, Value};
pub use crate::catalog::{
    KeySemaphore, Node, NodeId, PartitionDimension, Resource, SecondaryIndex, any_read_only,
};
pub use crate::config::{DirectoryConfig, SqlDialect, StoreLocation};
pub use crate::declarative::{EntityDescriptor, IndexDescriptor, TopologyBuilder};
pub use crate::directory::Directory;
pub use crate::directory::assign::{Assigner, HashAssigner};
pub use crate::directory::batch::{BatchWriter, IndexMutation};
pub use crate::error::{DirectoryError, DirectoryErrorCode, EntityKind};
pub use crate::lock::{LockCascade, LockLevel};
pub use crate::storage::instrumented::{
    DirectoryStatistics, InstrumentedExecutor, StatSnapshot, StatementTelemetryEvent,
    StatementTelemetryHook,
};
pub use crate::storage::sqlite::SqliteExecutor;
pub use crate::storage::{Param, StatKey, Statement, StatementExecutor, StoreError};
