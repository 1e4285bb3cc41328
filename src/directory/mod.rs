pub mod assign;
pub mod batch;

use crate::catalog::persist::MetadataStore;
use crate::catalog::types::{ColumnType, Status, Value};
use crate::catalog::{
    KeySemaphore, Node, NodeId, PartitionDimension, Resource, SecondaryIndex, any_read_only,
    node_ids,
};
use crate::config::{DirectoryConfig, StoreLocation};
use crate::directory::assign::{Assigner, HashAssigner};
use crate::directory::batch::{BatchWriter, IndexMutation};
use crate::error::{DirectoryError, EntityKind};
use crate::lock::{Assignment, LockCascade, LockLevel};
use crate::storage::instrumented::{DirectoryStatistics, InstrumentedExecutor};
use crate::storage::sql::IndexSqlFormatter;
use crate::storage::sqlite::SqliteExecutor;
use crate::storage::{Param, StatKey, Statement, StatementExecutor, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

pub type InstrumentedStore = InstrumentedExecutor<Arc<dyn StatementExecutor>>;

/// Resolves partition keys, resource ids and secondary index values to
/// nodes, and writes the mappings through to the backing store.
///
/// All operations are synchronous. Reads ignore lock state; every write is
/// admitted against the system, node and key locks at call time.
pub struct Directory {
    core: Arc<DirectoryCore>,
    metadata: MetadataStore,
    assigner: Arc<dyn Assigner>,
    instrumented: Option<Arc<InstrumentedStore>>,
    batch: OnceLock<BatchWriter>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("dimension", &self.core.dimension.name())
            .field("instrumented", &self.instrumented.is_some())
            .finish_non_exhaustive()
    }
}

impl Directory {
    /// Opens the SQLite store named by `config` and installs or loads
    /// `dimension`.
    pub fn open(config: DirectoryConfig, dimension: PartitionDimension) -> Result<Self, DirectoryError> {
        config.validate()?;
        let sqlite = match &config.store {
            StoreLocation::InMemory => SqliteExecutor::open_in_memory(config.busy_timeout_ms)?,
            StoreLocation::File(path) => SqliteExecutor::open(path, config.busy_timeout_ms)?,
        };
        let config = config.with_dialect(crate::config::SqlDialect::Sqlite);
        Self::with_executor(Arc::new(sqlite), dimension, &config)
    }

    pub fn with_executor(
        executor: Arc<dyn StatementExecutor>,
        dimension: PartitionDimension,
        config: &DirectoryConfig,
    ) -> Result<Self, DirectoryError> {
        config.validate()?;
        let (executor, instrumented) = if config.instrumented {
            let wrapped: Arc<InstrumentedStore> = Arc::new(InstrumentedExecutor::new(executor));
            (wrapped.clone() as Arc<dyn StatementExecutor>, Some(wrapped))
        } else {
            (executor, None)
        };
        let sql = IndexSqlFormatter::new(config.dialect.type_map(), config.sql_cache_capacity);
        let metadata = MetadataStore::new(executor.clone(), sql.clone());

        let dimension = if config.auto_install {
            metadata.install_schema()?;
            metadata.install_dimension(dimension)?
        } else {
            let installed = metadata.load_dimension(dimension.name())?.ok_or_else(|| {
                DirectoryError::not_found(EntityKind::PartitionDimension, dimension.name())
            })?;
            let mut dimension = dimension;
            dimension.adopt_installed_ids(&installed)?;
            if !dimension.is_installed() {
                return Err(DirectoryError::InvalidConfig {
                    message: format!(
                        "partition dimension '{}' declares entities that are not installed",
                        dimension.name()
                    ),
                });
            }
            dimension
        };

        let locks = LockCascade::new(metadata.system_status()?, metadata.load_nodes()?);
        info!(
            dimension = dimension.name(),
            nodes = locks.nodes().len(),
            system = %locks.system_status(),
            "directory opened"
        );
        Ok(Self {
            core: Arc::new(DirectoryCore {
                dimension,
                executor,
                sql,
                locks: Arc::new(locks),
                max_batch_mutations: config.max_batch_mutations,
            }),
            metadata,
            assigner: Arc::new(HashAssigner),
            instrumented,
            batch: OnceLock::new(),
        })
    }

    pub fn with_assigner(mut self, assigner: Arc<dyn Assigner>) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn dimension(&self) -> &PartitionDimension {
        &self.core.dimension
    }

    pub fn resource(&self, name: &str) -> Result<&Resource, DirectoryError> {
        self.core.dimension.resource(name)
    }

    pub fn secondary_index(&self, resource: &str, index: &str) -> Result<&SecondaryIndex, DirectoryError> {
        self.core.dimension.resource(resource)?.secondary_index(index)
    }

    pub fn lock_cascade(&self) -> &LockCascade {
        &self.core.locks
    }

    /// Per-statement-kind counters, when the directory was opened with
    /// instrumentation.
    pub fn statistics(&self) -> Option<DirectoryStatistics> {
        self.instrumented.as_ref().map(|i| i.statistics())
    }

    pub fn instrumentation(&self) -> Option<&InstrumentedStore> {
        self.instrumented.as_deref()
    }

    /// The batch writer of this directory, created on first use.
    pub fn batch(&self) -> &BatchWriter {
        self.batch.get_or_init(|| BatchWriter::new(self.core.clone()))
    }

    // ------------------------------------------------------------------
    // Primary index
    // ------------------------------------------------------------------

    /// Creates `key` on `node` with a writable key flag.
    ///
    /// There is no existence pre-check: the primary key column of the
    /// primary index table rejects a second insert of the same key, and
    /// that rejection surfaces as [`DirectoryError::DuplicateKey`]. This is
    /// also what settles concurrent inserts of one key.
    pub fn insert_primary_index_key(&self, node: NodeId, key: impl Into<Value>) -> Result<(), DirectoryError> {
        self.core.apply(IndexMutation::InsertPrimaryIndexKey {
            node,
            key: key.into(),
        })
    }

    /// Picks a node through the directory's assigner and inserts `key` there.
    pub fn assign_primary_index_key(&self, key: impl Into<Value>) -> Result<NodeId, DirectoryError> {
        let key = key.into();
        self.core.locks.check_system(&key)?;
        let nodes = self.core.locks.nodes();
        if nodes.is_empty() {
            return Err(DirectoryError::not_found(EntityKind::Node, "for assignment"));
        }
        let writable: Vec<Node> = nodes
            .values()
            .filter(|n| !n.status.is_read_only())
            .cloned()
            .collect();
        let node = self.assigner.assign(&key, &writable).ok_or_else(|| {
            DirectoryError::LockViolation {
                level: LockLevel::AllNodes,
                key: key.to_string(),
            }
        })?;
        self.insert_primary_index_key(node, key)?;
        Ok(node)
    }

    pub fn does_primary_index_key_exist(&self, key: &Value) -> Result<bool, DirectoryError> {
        self.core.primary_key_exists(key)
    }

    /// Removes the key row only. Absent keys are a no-op.
    pub fn delete_primary_index_key(&self, key: &Value) -> Result<(), DirectoryError> {
        self.core
            .apply(IndexMutation::DeletePrimaryIndexKey { key: key.clone() })
    }

    pub fn update_primary_index_key_read_only(&self, key: &Value, read_only: bool) -> Result<(), DirectoryError> {
        self.core.apply(IndexMutation::UpdatePrimaryIndexKeyReadOnly {
            key: key.clone(),
            read_only,
        })
    }

    pub fn get_key_semaphores_of_primary_index_key(&self, key: &Value) -> Result<Vec<KeySemaphore>, DirectoryError> {
        let assignments = self.core.assignments_of_primary_index_key(key)?;
        self.core.locks.semaphores(&assignments)
    }

    pub fn get_node_ids_of_primary_index_key(&self, key: &Value) -> Result<Vec<NodeId>, DirectoryError> {
        Ok(node_ids(&self.get_key_semaphores_of_primary_index_key(key)?))
    }

    /// `false` for a key with no assignments.
    pub fn get_read_only_of_primary_index_key(&self, key: &Value) -> Result<bool, DirectoryError> {
        Ok(any_read_only(&self.get_key_semaphores_of_primary_index_key(key)?))
    }

    // ------------------------------------------------------------------
    // Resource ids
    // ------------------------------------------------------------------

    pub fn insert_resource_id(&self, resource: &Resource, id: impl Into<Value>, key: impl Into<Value>) -> Result<(), DirectoryError> {
        self.core.apply(IndexMutation::InsertResourceId {
            resource: resource.name().to_string(),
            id: id.into(),
            key: key.into(),
        })
    }

    /// Removes the resource id entry only; see [`BatchWriter::delete_resource_id`]
    /// to remove its secondary entries with it.
    pub fn delete_resource_id(&self, resource: &Resource, id: &Value) -> Result<(), DirectoryError> {
        self.core.apply(IndexMutation::DeleteResourceId {
            resource: resource.name().to_string(),
            id: id.clone(),
        })
    }

    pub fn update_primary_index_key_of_resource_id(
        &self,
        resource: &Resource,
        id: &Value,
        old_key: &Value,
        new_key: &Value,
    ) -> Result<(), DirectoryError> {
        self.core
            .apply(IndexMutation::UpdatePrimaryIndexKeyOfResourceId {
                resource: resource.name().to_string(),
                id: id.clone(),
                old_key: old_key.clone(),
                new_key: new_key.clone(),
            })
    }

    pub fn does_resource_id_exist(&self, resource: &Resource, id: &Value) -> Result<bool, DirectoryError> {
        let resource = self.core.resource(resource.name())?;
        if resource.is_partitioning_resource() {
            return self.core.primary_key_exists(id);
        }
        let rows = self.core.query_values(
            Statement::new(
                self.core.sql.check_existence_of_resource_id(resource),
                StatKey::SecondaryIndexRead,
            )
            .bind(id_param(resource, id)?)
            .returning(&[resource.column_type()]),
        )?;
        Ok(!rows.is_empty())
    }

    /// The one primary index key owning `id`. Zero owners is
    /// [`DirectoryError::KeyNotFound`]; more than one is
    /// [`DirectoryError::DirectoryCorruption`].
    pub fn get_primary_index_key_of_resource_id(&self, resource: &Resource, id: &Value) -> Result<Value, DirectoryError> {
        let resource = self.core.resource(resource.name())?;
        self.core
            .owning_key(resource, id)?
            .ok_or_else(|| DirectoryError::not_found(not_found_kind(resource), id))
    }

    pub fn get_resource_ids_of_primary_index_key(&self, resource: &Resource, key: &Value) -> Result<Vec<Value>, DirectoryError> {
        let resource = self.core.resource(resource.name())?;
        self.core.resource_ids_of_primary_index_key(resource, key)
    }

    pub fn get_key_semaphores_of_resource_id(&self, resource: &Resource, id: &Value) -> Result<Vec<KeySemaphore>, DirectoryError> {
        let resource = self.core.resource(resource.name())?;
        let assignments = self.core.assignments_of_resource_id(resource, id)?;
        self.core.locks.semaphores(&assignments)
    }

    pub fn get_node_ids_of_resource_id(&self, resource: &Resource, id: &Value) -> Result<Vec<NodeId>, DirectoryError> {
        Ok(node_ids(&self.get_key_semaphores_of_resource_id(resource, id)?))
    }

    /// Fails with [`DirectoryError::KeyNotFound`] when `id` has no
    /// assignments at all.
    pub fn get_read_only_of_resource_id(&self, resource: &Resource, id: &Value) -> Result<bool, DirectoryError> {
        let semaphores = self.get_key_semaphores_of_resource_id(resource, id)?;
        if semaphores.is_empty() {
            return Err(DirectoryError::not_found(not_found_kind(resource), id));
        }
        Ok(any_read_only(&semaphores))
    }

    // ------------------------------------------------------------------
    // Secondary indexes
    // ------------------------------------------------------------------

    /// Ties `value` to `resource_id`. For an index on a partitioning
    /// resource the resource id is the primary index key itself.
    pub fn insert_secondary_index_key(
        &self,
        index: &SecondaryIndex,
        value: impl Into<Value>,
        resource_id: impl Into<Value>,
    ) -> Result<(), DirectoryError> {
        self.core.apply(IndexMutation::InsertSecondaryIndexKey {
            index: index.clone(),
            value: value.into(),
            resource_id: resource_id.into(),
        })
    }

    /// Removes the single row of (`value`, `resource_id`).
    pub fn delete_secondary_index_key(&self, index: &SecondaryIndex, value: &Value, resource_id: &Value) -> Result<(), DirectoryError> {
        self.core.apply(IndexMutation::DeleteSecondaryIndexKey {
            index: index.clone(),
            value: value.clone(),
            resource_id: resource_id.clone(),
        })
    }

    pub fn does_secondary_index_key_exist(&self, index: &SecondaryIndex, value: &Value, resource_id: &Value) -> Result<bool, DirectoryError> {
        let (resource, index) = self.core.index(index)?;
        let Some(index) = index else {
            return Ok(value == resource_id && self.does_resource_id_exist(resource, resource_id)?);
        };
        let rows = self.core.query_values(
            Statement::new(
                self.core.sql.check_existence_of_secondary_index_key(index),
                StatKey::SecondaryIndexRead,
            )
            .bind(index_param(index, value)?)
            .bind(id_param(resource, resource_id)?)
            .returning(&[index.column_type()]),
        )?;
        Ok(!rows.is_empty())
    }

    pub fn get_resource_ids_of_secondary_index_key(&self, index: &SecondaryIndex, value: &Value) -> Result<Vec<Value>, DirectoryError> {
        let (resource, index) = self.core.index(index)?;
        let Some(index) = index else {
            return Ok(self.present(resource, value)?);
        };
        self.core.query_values(
            Statement::new(
                self.core.sql.select_resource_ids_of_secondary_index_key(index),
                StatKey::SecondaryIndexRead,
            )
            .bind(index_param(index, value)?)
            .returning(&[resource.column_type()]),
        )
    }

    pub fn get_secondary_index_keys_of_resource_id(&self, index: &SecondaryIndex, resource_id: &Value) -> Result<Vec<Value>, DirectoryError> {
        let (resource, index) = self.core.index(index)?;
        let Some(index) = index else {
            return Ok(self.present(resource, resource_id)?);
        };
        self.core.query_values(
            Statement::new(
                self.core.sql.select_secondary_index_keys_of_resource_id(index),
                StatKey::SecondaryIndexRead,
            )
            .bind(id_param(resource, resource_id)?)
            .returning(&[index.column_type()]),
        )
    }

    /// Distinct primary index keys reachable from `value`.
    pub fn get_primary_index_keys_of_secondary_index_key(&self, index: &SecondaryIndex, value: &Value) -> Result<Vec<Value>, DirectoryError> {
        let (resource, index) = self.core.index(index)?;
        let Some(index) = index else {
            return self.core.primary_index_keys_of_resource_id(resource, value);
        };
        self.core.query_values(
            Statement::new(
                self.core.sql.select_primary_index_keys_of_secondary_index_key(index),
                StatKey::SecondaryIndexRead,
            )
            .bind(index_param(index, value)?)
            .returning(&[self.core.dimension.column_type()]),
        )
    }

    pub fn get_secondary_index_keys_of_primary_index_key(&self, index: &SecondaryIndex, key: &Value) -> Result<Vec<Value>, DirectoryError> {
        let (resource, index) = self.core.index(index)?;
        let Some(index) = index else {
            return self.core.resource_ids_of_primary_index_key(resource, key);
        };
        self.core.query_values(
            Statement::new(
                self.core.sql.select_secondary_index_keys_of_primary_index_key(index),
                StatKey::SecondaryIndexRead,
            )
            .bind(self.core.key_param(key)?)
            .returning(&[index.column_type()]),
        )
    }

    pub fn get_key_semaphores_of_secondary_index_key(&self, index: &SecondaryIndex, value: &Value) -> Result<Vec<KeySemaphore>, DirectoryError> {
        let (resource, index) = self.core.index(index)?;
        let assignments = match index {
            None => self.core.assignments_of_resource_id(resource, value)?,
            Some(index) => self.core.query_assignments(
                Statement::new(
                    self.core
                        .sql
                        .select_assignments_of_secondary_index_key(&self.core.dimension, index),
                    StatKey::SecondaryIndexRead,
                )
                .bind(index_param(index, value)?),
            )?,
        };
        self.core.locks.semaphores(&assignments)
    }

    pub fn get_node_ids_of_secondary_index_key(&self, index: &SecondaryIndex, value: &Value) -> Result<Vec<NodeId>, DirectoryError> {
        Ok(node_ids(&self.get_key_semaphores_of_secondary_index_key(index, value)?))
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    pub fn system_status(&self) -> Status {
        self.core.locks.system_status()
    }

    pub fn update_system_status(&self, status: Status) -> Result<(), DirectoryError> {
        self.metadata.update_system_status(status)?;
        self.core.locks.set_system_status(status);
        info!(%status, "system status updated");
        Ok(())
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.core.locks.nodes().values().cloned().collect()
    }

    pub fn add_node(&self, node: Node) -> Result<(), DirectoryError> {
        self.metadata.add_node(&node)?;
        info!(node = %node.id, name = %node.name, status = %node.status, "node added");
        self.core.locks.upsert_node(node);
        Ok(())
    }

    pub fn update_node_status(&self, node: NodeId, status: Status) -> Result<(), DirectoryError> {
        self.metadata.update_node_status(node, status)?;
        self.core.locks.set_node_status(node, status)?;
        info!(%node, %status, "node status updated");
        Ok(())
    }

    fn present(&self, resource: &Resource, id: &Value) -> Result<Vec<Value>, DirectoryError> {
        if self.does_resource_id_exist(resource, id)? {
            Ok(vec![id.clone()])
        } else {
            Ok(Vec::new())
        }
    }
}

/// State a batch has produced but not yet submitted, so later mutations of
/// the same batch see earlier ones during admission.
#[derive(Debug, Default)]
pub(crate) struct PendingState {
    keys: HashMap<Value, Option<Vec<Assignment>>>,
    resource_ids: HashMap<(String, Value), Option<Value>>,
}

/// Everything a directory and its batch writer share.
pub(crate) struct DirectoryCore {
    dimension: PartitionDimension,
    executor: Arc<dyn StatementExecutor>,
    sql: IndexSqlFormatter,
    locks: Arc<LockCascade>,
    max_batch_mutations: usize,
}

impl DirectoryCore {
    pub(crate) fn max_batch_mutations(&self) -> usize {
        self.max_batch_mutations
    }

    pub(crate) fn dimension(&self) -> &PartitionDimension {
        &self.dimension
    }

    pub(crate) fn executor(&self) -> &dyn StatementExecutor {
        self.executor.as_ref()
    }

    fn resource(&self, name: &str) -> Result<&Resource, DirectoryError> {
        self.dimension.resource(name)
    }

    /// The installed resource and index behind a handle. `None` as the
    /// index means the handle is the resource's id index.
    fn index(&self, index: &SecondaryIndex) -> Result<(&Resource, Option<&SecondaryIndex>), DirectoryError> {
        let resource = self.resource(index.resource_name())?;
        if index.is_id_index() {
            return Ok((resource, None));
        }
        Ok((resource, Some(resource.secondary_index(index.name())?)))
    }

    fn key_param(&self, key: &Value) -> Result<Param, DirectoryError> {
        Param::typed(self.dimension.name(), self.dimension.column_type(), key)
    }

    fn query_values(&self, statement: Statement) -> Result<Vec<Value>, DirectoryError> {
        let rows = self.executor.query(&statement)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.values.into_iter().next())
            .collect())
    }

    fn query_assignments(&self, statement: Statement) -> Result<Vec<Assignment>, DirectoryError> {
        let statement = statement.returning(&[ColumnType::Long, ColumnType::Boolean]);
        let rows = self.executor.query(&statement)?;
        rows.iter()
            .map(|row| -> Result<Assignment, DirectoryError> {
                let node = row
                    .values
                    .first()
                    .and_then(Value::as_long)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| DirectoryError::corruption("assignment row without a node id"))?;
                let key_read_only = row.values.get(1).and_then(Value::as_bool).unwrap_or(false);
                Ok(Assignment {
                    node_id: NodeId(node),
                    key_read_only,
                })
            })
            .collect()
    }

    pub(crate) fn primary_key_exists(&self, key: &Value) -> Result<bool, DirectoryError> {
        let rows = self.query_values(
            Statement::new(
                self.sql.check_existence_of_primary_key(&self.dimension),
                StatKey::PrimaryIndexRead,
            )
            .bind(self.key_param(key)?)
            .returning(&[self.dimension.column_type()]),
        )?;
        Ok(!rows.is_empty())
    }

    pub(crate) fn assignments_of_primary_index_key(&self, key: &Value) -> Result<Vec<Assignment>, DirectoryError> {
        self.query_assignments(
            Statement::new(
                self.sql.select_assignments_of_primary_index_key(&self.dimension),
                StatKey::PrimaryIndexRead,
            )
            .bind(self.key_param(key)?),
        )
    }

    fn assignments_of_resource_id(&self, resource: &Resource, id: &Value) -> Result<Vec<Assignment>, DirectoryError> {
        if resource.is_partitioning_resource() {
            return self.assignments_of_primary_index_key(id);
        }
        self.query_assignments(
            Statement::new(
                self.sql
                    .select_assignments_of_resource_id(&self.dimension, resource),
                StatKey::SecondaryIndexRead,
            )
            .bind(id_param(resource, id)?),
        )
    }

    /// Distinct owners of `id`, without the exactly-one check.
    fn primary_index_keys_of_resource_id(&self, resource: &Resource, id: &Value) -> Result<Vec<Value>, DirectoryError> {
        if resource.is_partitioning_resource() {
            return Ok(if self.primary_key_exists(id)? {
                vec![id.clone()]
            } else {
                Vec::new()
            });
        }
        self.query_values(
            Statement::new(
                self.sql.select_primary_index_keys_of_resource_id(resource),
                StatKey::SecondaryIndexRead,
            )
            .bind(id_param(resource, id)?)
            .returning(&[self.dimension.column_type()]),
        )
    }

    fn resource_ids_of_primary_index_key(&self, resource: &Resource, key: &Value) -> Result<Vec<Value>, DirectoryError> {
        if resource.is_partitioning_resource() {
            return self.primary_index_keys_of_resource_id(resource, key);
        }
        self.query_values(
            Statement::new(
                self.sql.select_resource_ids_of_primary_index_key(resource),
                StatKey::SecondaryIndexRead,
            )
            .bind(self.key_param(key)?)
            .returning(&[resource.column_type()]),
        )
    }

    fn owning_key(&self, resource: &Resource, id: &Value) -> Result<Option<Value>, DirectoryError> {
        let mut keys = self.primary_index_keys_of_resource_id(resource, id)?;
        if keys.len() > 1 {
            warn!(
                resource = resource.name(),
                id = %id,
                owners = keys.len(),
                "resource id resolves to more than one primary index key"
            );
            return Err(DirectoryError::corruption(format!(
                "{} id {id} resolves to {} primary index keys",
                resource.name(),
                keys.len()
            )));
        }
        Ok(keys.pop())
    }

    fn pending_assignments(&self, key: &Value, pending: &PendingState) -> Result<Option<Vec<Assignment>>, DirectoryError> {
        if let Some(state) = pending.keys.get(key) {
            return Ok(state.clone());
        }
        let assignments = self.assignments_of_primary_index_key(key)?;
        Ok((!assignments.is_empty()).then_some(assignments))
    }

    fn pending_owner(&self, resource: &Resource, id: &Value, pending: &PendingState) -> Result<Option<Value>, DirectoryError> {
        if resource.is_partitioning_resource() {
            return Ok(self.pending_assignments(id, pending)?.map(|_| id.clone()));
        }
        let owner = match pending.resource_ids.get(&(resource.name().to_string(), id.clone())) {
            Some(state) => state.clone(),
            None => self.owning_key(resource, id)?,
        };
        // an owner deleted earlier in the batch took the id with it
        Ok(owner.filter(|key| !matches!(pending.keys.get(key), Some(None))))
    }

    /// Admits a write under whatever key owns `id`. An id whose owner has
    /// no assignments counts as unowned, and an unowned id only needs a
    /// writable system.
    fn admit_under_owner(&self, resource: &Resource, id: &Value, pending: &PendingState) -> Result<Option<Value>, DirectoryError> {
        let owned = match self.pending_owner(resource, id, pending)? {
            Some(key) => self
                .pending_assignments(&key, pending)?
                .map(|assignments| (key, assignments)),
            None => None,
        };
        match owned {
            Some((key, assignments)) => {
                self.locks.check_key_write(&key, &assignments)?;
                Ok(Some(key))
            }
            None => {
                self.locks.check_key_write(id, &[])?;
                Ok(None)
            }
        }
    }

    /// Admission, referential checks and statement building for one
    /// mutation. `pending` is updated as if the statements had run.
    pub(crate) fn compile(&self, mutation: &IndexMutation, pending: &mut PendingState) -> Result<Vec<Statement>, DirectoryError> {
        match mutation {
            IndexMutation::InsertPrimaryIndexKey { node, key } => {
                let key_param = self.key_param(key)?;
                self.locks.check_node_write(*node, key)?;
                if matches!(pending.keys.get(key), Some(Some(_))) {
                    return Err(DirectoryError::DuplicateKey {
                        key: key.to_string(),
                    });
                }
                pending.keys.insert(
                    key.clone(),
                    Some(vec![Assignment {
                        node_id: *node,
                        key_read_only: false,
                    }]),
                );
                Ok(vec![
                    Statement::new(
                        self.sql.insert_primary_index_key(&self.dimension),
                        StatKey::PrimaryIndexWrite,
                    )
                    .bind(key_param)
                    .bind(node_param(*node)?)
                    .bind(flag_param(false)?)
                    .bind(now_param()?),
                ])
            }
            IndexMutation::UpdatePrimaryIndexKeyReadOnly { key, read_only } => {
                let key_param = self.key_param(key)?;
                self.locks.check_system(key)?;
                let mut assignments = self
                    .pending_assignments(key, pending)?
                    .ok_or_else(|| DirectoryError::not_found(EntityKind::PrimaryIndexKey, key))?;
                for assignment in &mut assignments {
                    assignment.key_read_only = *read_only;
                }
                pending.keys.insert(key.clone(), Some(assignments));
                Ok(vec![
                    Statement::new(
                        self.sql.update_read_only_of_primary_index_key(&self.dimension),
                        StatKey::PrimaryIndexWrite,
                    )
                    .bind(flag_param(*read_only)?)
                    .bind(now_param()?)
                    .bind(key_param),
                ])
            }
            IndexMutation::DeletePrimaryIndexKey { key } => {
                let key_param = self.key_param(key)?;
                let assignments = self.pending_assignments(key, pending)?.unwrap_or_default();
                self.locks.check_key_write(key, &assignments)?;
                pending.keys.insert(key.clone(), None);
                Ok(vec![
                    Statement::new(
                        self.sql.delete_primary_index_key(&self.dimension),
                        StatKey::PrimaryIndexDelete,
                    )
                    .bind(key_param),
                ])
            }
            IndexMutation::DeletePrimaryIndexKeyCascade { key } => {
                let assignments = self.pending_assignments(key, pending)?.unwrap_or_default();
                self.locks.check_key_write(key, &assignments)?;
                let mut statements = Vec::new();
                for resource in self.dimension.resources() {
                    for index in resource.secondary_indexes() {
                        statements.push(
                            Statement::new(
                                self.sql.delete_secondary_index_keys_of_primary_index_key(index),
                                StatKey::SecondaryIndexDelete,
                            )
                            .bind(self.key_param(key)?),
                        );
                    }
                    if !resource.is_partitioning_resource() {
                        statements.push(
                            Statement::new(
                                self.sql.delete_resource_ids_of_primary_index_key(resource),
                                StatKey::SecondaryIndexDelete,
                            )
                            .bind(self.key_param(key)?),
                        );
                        pending
                            .resource_ids
                            .retain(|(name, _), owner| name != resource.name() || owner.as_ref() != Some(key));
                    }
                }
                statements.push(
                    Statement::new(
                        self.sql.delete_primary_index_key(&self.dimension),
                        StatKey::PrimaryIndexDelete,
                    )
                    .bind(self.key_param(key)?),
                );
                pending.keys.insert(key.clone(), None);
                Ok(statements)
            }
            IndexMutation::InsertResourceId { resource, id, key } => {
                let resource = self.non_partitioning(resource)?;
                let id_param = id_param(resource, id)?;
                let key_param = self.key_param(key)?;
                let assignments = self
                    .pending_assignments(key, pending)?
                    .ok_or_else(|| DirectoryError::not_found(EntityKind::PrimaryIndexKey, key))?;
                self.locks.check_key_write(key, &assignments)?;
                pending
                    .resource_ids
                    .insert((resource.name().to_string(), id.clone()), Some(key.clone()));
                Ok(vec![
                    Statement::new(self.sql.insert_resource_id(resource), StatKey::SecondaryIndexWrite)
                        .bind(id_param)
                        .bind(key_param),
                ])
            }
            IndexMutation::UpdatePrimaryIndexKeyOfResourceId {
                resource,
                id,
                old_key,
                new_key,
            } => {
                let resource = self.non_partitioning(resource)?;
                let id_param = id_param(resource, id)?;
                let old_param = self.key_param(old_key)?;
                let new_param = self.key_param(new_key)?;
                if self.pending_owner(resource, id, pending)?.as_ref() != Some(old_key) {
                    return Err(DirectoryError::not_found(
                        EntityKind::ResourceId,
                        format!("{id} under {old_key}"),
                    ));
                }
                for key in [old_key, new_key] {
                    let assignments = self
                        .pending_assignments(key, pending)?
                        .ok_or_else(|| DirectoryError::not_found(EntityKind::PrimaryIndexKey, key))?;
                    self.locks.check_key_write(key, &assignments)?;
                }
                pending
                    .resource_ids
                    .insert((resource.name().to_string(), id.clone()), Some(new_key.clone()));
                Ok(vec![
                    Statement::new(self.sql.update_resource_id(resource), StatKey::SecondaryIndexWrite)
                        .bind(new_param)
                        .bind(id_param)
                        .bind(old_param),
                ])
            }
            IndexMutation::DeleteResourceId { resource, id } => {
                let resource = self.non_partitioning(resource)?;
                let id_param = id_param(resource, id)?;
                self.admit_under_owner(resource, id, pending)?;
                pending
                    .resource_ids
                    .insert((resource.name().to_string(), id.clone()), None);
                Ok(vec![
                    Statement::new(self.sql.delete_resource_id(resource), StatKey::SecondaryIndexDelete)
                        .bind(id_param),
                ])
            }
            IndexMutation::InsertSecondaryIndexKey {
                index,
                value,
                resource_id,
            } => {
                let (resource, index) = self.writable_index(index)?;
                let value_param = index_param(index, value)?;
                let id_param = id_param(resource, resource_id)?;
                if self.admit_under_owner(resource, resource_id, pending)?.is_none() {
                    return Err(DirectoryError::not_found(not_found_kind(resource), resource_id));
                }
                Ok(vec![
                    Statement::new(self.sql.insert_secondary_index_key(index), StatKey::SecondaryIndexWrite)
                        .bind(value_param)
                        .bind(id_param),
                ])
            }
            IndexMutation::DeleteSecondaryIndexKey {
                index,
                value,
                resource_id,
            } => {
                let (resource, index) = self.writable_index(index)?;
                let value_param = index_param(index, value)?;
                let id_param = id_param(resource, resource_id)?;
                self.admit_under_owner(resource, resource_id, pending)?;
                Ok(vec![
                    Statement::new(
                        self.sql.delete_single_secondary_index_key(index),
                        StatKey::SecondaryIndexDelete,
                    )
                    .bind(value_param)
                    .bind(id_param),
                ])
            }
            IndexMutation::DeleteAllSecondaryIndexKeysOfResourceId { resource, id } => {
                let resource = self.resource(resource)?;
                self.admit_under_owner(resource, id, pending)?;
                resource
                    .secondary_indexes()
                    .iter()
                    .map(|index| -> Result<Statement, DirectoryError> {
                        Ok(Statement::new(
                            self.sql.delete_secondary_index_keys_of_resource_id(index),
                            StatKey::SecondaryIndexDelete,
                        )
                        .bind(id_param(resource, id)?))
                    })
                    .collect()
            }
        }
    }

    /// Compiles and runs one mutation outside any batch.
    pub(crate) fn apply(&self, mutation: IndexMutation) -> Result<(), DirectoryError> {
        let mut pending = PendingState::default();
        let statements = self.compile(&mutation, &mut pending)?;
        let result = match statements.as_slice() {
            [] => Ok(0),
            [single] => self.executor.execute(single),
            many => self.executor.execute_batch(many).map_err(|err| match err {
                StoreError::Batch { source, .. } => *source,
                other => other,
            }),
        };
        match result {
            Ok(affected) => {
                debug!(
                    mutation = mutation.name(),
                    statements = statements.len(),
                    affected,
                    "directory mutation applied"
                );
                Ok(())
            }
            Err(err) => Err(classify(&mutation, err)),
        }
    }

    fn non_partitioning(&self, name: &str) -> Result<&Resource, DirectoryError> {
        let resource = self.resource(name)?;
        if resource.is_partitioning_resource() {
            return Err(DirectoryError::Validation(format!(
                "resource '{name}' is partitioning; its ids are primary index keys"
            )));
        }
        Ok(resource)
    }

    fn writable_index(&self, index: &SecondaryIndex) -> Result<(&Resource, &SecondaryIndex), DirectoryError> {
        match self.index(index)? {
            (resource, Some(index)) => Ok((resource, index)),
            (resource, None) => Err(DirectoryError::Validation(format!(
                "the id index of '{}' is maintained through resource id operations",
                resource.name()
            ))),
        }
    }
}

/// Maps a store rejection of a mutation to the directory error it means.
pub(crate) fn classify(mutation: &IndexMutation, err: StoreError) -> DirectoryError {
    match mutation {
        IndexMutation::InsertPrimaryIndexKey { key, .. } if err.is_constraint_violation() => {
            DirectoryError::DuplicateKey {
                key: key.to_string(),
            }
        }
        _ => DirectoryError::BackingStore(err),
    }
}

fn not_found_kind(resource: &Resource) -> EntityKind {
    if resource.is_partitioning_resource() {
        EntityKind::PrimaryIndexKey
    } else {
        EntityKind::ResourceId
    }
}

fn id_param(resource: &Resource, id: &Value) -> Result<Param, DirectoryError> {
    Param::typed(resource.name(), resource.column_type(), id)
}

fn index_param(index: &SecondaryIndex, value: &Value) -> Result<Param, DirectoryError> {
    Param::typed(index.name(), index.column_type(), value)
}

fn node_param(node: NodeId) -> Result<Param, DirectoryError> {
    Param::typed("node", ColumnType::Long, &Value::Long(i64::from(node.0)))
}

fn flag_param(read_only: bool) -> Result<Param, DirectoryError> {
    Param::typed("read_only", ColumnType::Boolean, &Value::Boolean(read_only))
}

fn now_param() -> Result<Param, DirectoryError> {
    Param::typed("last_updated", ColumnType::Timestamp, &Value::now())
}
