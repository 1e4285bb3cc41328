use crate::catalog::types::Value;
use crate::catalog::{NodeId, Resource, SecondaryIndex};
use crate::directory::{DirectoryCore, PendingState, classify};
use crate::error::DirectoryError;
use crate::storage::StoreError;
use std::sync::Arc;
use tracing::{debug, warn};

/// One directory write, as accepted by [`BatchWriter::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMutation {
    InsertPrimaryIndexKey {
        node: NodeId,
        key: Value,
    },
    UpdatePrimaryIndexKeyReadOnly {
        key: Value,
        read_only: bool,
    },
    DeletePrimaryIndexKey {
        key: Value,
    },
    /// Deletes the key together with every resource id and secondary
    /// index entry it owns.
    DeletePrimaryIndexKeyCascade {
        key: Value,
    },
    InsertResourceId {
        resource: String,
        id: Value,
        key: Value,
    },
    UpdatePrimaryIndexKeyOfResourceId {
        resource: String,
        id: Value,
        old_key: Value,
        new_key: Value,
    },
    DeleteResourceId {
        resource: String,
        id: Value,
    },
    InsertSecondaryIndexKey {
        index: SecondaryIndex,
        value: Value,
        resource_id: Value,
    },
    DeleteSecondaryIndexKey {
        index: SecondaryIndex,
        value: Value,
        resource_id: Value,
    },
    DeleteAllSecondaryIndexKeysOfResourceId {
        resource: String,
        id: Value,
    },
}

impl IndexMutation {
    pub fn name(&self) -> &'static str {
        match self {
            IndexMutation::InsertPrimaryIndexKey { .. } => "insert_primary_index_key",
            IndexMutation::UpdatePrimaryIndexKeyReadOnly { .. } => "update_primary_index_key_read_only",
            IndexMutation::DeletePrimaryIndexKey { .. } => "delete_primary_index_key",
            IndexMutation::DeletePrimaryIndexKeyCascade { .. } => "delete_primary_index_key_cascade",
            IndexMutation::InsertResourceId { .. } => "insert_resource_id",
            IndexMutation::UpdatePrimaryIndexKeyOfResourceId { .. } => {
                "update_primary_index_key_of_resource_id"
            }
            IndexMutation::DeleteResourceId { .. } => "delete_resource_id",
            IndexMutation::InsertSecondaryIndexKey { .. } => "insert_secondary_index_key",
            IndexMutation::DeleteSecondaryIndexKey { .. } => "delete_secondary_index_key",
            IndexMutation::DeleteAllSecondaryIndexKeysOfResourceId { .. } => {
                "delete_all_secondary_index_keys_of_resource_id"
            }
        }
    }
}

/// Applies a group of mutations as one request to the backing store.
///
/// Every mutation is admitted before anything is submitted; a later
/// mutation sees the keys and resource ids created or removed by earlier
/// ones in the same group. The SQLite executor runs the group in one
/// transaction, so a failure leaves nothing applied.
pub struct BatchWriter {
    core: Arc<DirectoryCore>,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("dimension", &self.core.dimension().name())
            .finish()
    }
}

impl BatchWriter {
    pub(crate) fn new(core: Arc<DirectoryCore>) -> Self {
        Self { core }
    }

    /// Returns the number of rows the store reports as affected. The first
    /// failing mutation is reported as [`DirectoryError::BatchFailed`].
    pub fn apply(&self, mutations: Vec<IndexMutation>) -> Result<u64, DirectoryError> {
        if mutations.is_empty() {
            return Ok(0);
        }
        let limit = self.core.max_batch_mutations();
        if mutations.len() > limit {
            return Err(DirectoryError::Validation(format!(
                "batch of {} mutations exceeds the limit of {limit}",
                mutations.len()
            )));
        }

        let mut pending = PendingState::default();
        let mut statements = Vec::with_capacity(mutations.len());
        let mut owners = Vec::with_capacity(mutations.len());
        for (index, mutation) in mutations.iter().enumerate() {
            let compiled = self
                .core
                .compile(mutation, &mut pending)
                .map_err(|source| aborted(index, mutation, source))?;
            owners.extend(std::iter::repeat_n(index, compiled.len()));
            statements.extend(compiled);
        }

        match self.core.executor().execute_batch(&statements) {
            Ok(affected) => {
                debug!(
                    mutations = mutations.len(),
                    statements = statements.len(),
                    affected,
                    "directory batch applied"
                );
                Ok(affected)
            }
            Err(StoreError::Batch { index, source }) => match owners.get(index).copied() {
                Some(owner) => {
                    let mutation = &mutations[owner];
                    Err(aborted(owner, mutation, classify(mutation, *source)))
                }
                None => {
                    warn!(
                        index,
                        statements = statements.len(),
                        error = %source,
                        "executor reported a failing statement outside the batch"
                    );
                    Err(DirectoryError::BackingStore(StoreError::Batch { index, source }))
                }
            },
            Err(other) => Err(DirectoryError::BackingStore(other)),
        }
    }

    /// Registers `id` under `key` together with its secondary index values.
    pub fn insert_resource_id(
        &self,
        resource: &Resource,
        id: impl Into<Value>,
        key: impl Into<Value>,
        secondaries: &[(&SecondaryIndex, Value)],
    ) -> Result<u64, DirectoryError> {
        let id = id.into();
        let mut mutations = Vec::with_capacity(secondaries.len() + 1);
        mutations.push(IndexMutation::InsertResourceId {
            resource: resource.name().to_string(),
            id: id.clone(),
            key: key.into(),
        });
        for (index, value) in secondaries {
            mutations.push(IndexMutation::InsertSecondaryIndexKey {
                index: (*index).clone(),
                value: value.clone(),
                resource_id: id.clone(),
            });
        }
        self.apply(mutations)
    }

    pub fn delete_all_secondary_index_keys_of_resource_id(
        &self,
        resource: &Resource,
        id: &Value,
    ) -> Result<u64, DirectoryError> {
        self.apply(vec![IndexMutation::DeleteAllSecondaryIndexKeysOfResourceId {
            resource: resource.name().to_string(),
            id: id.clone(),
        }])
    }

    /// Deletes the resource id entry and all of its secondary index entries.
    pub fn delete_resource_id(&self, resource: &Resource, id: &Value) -> Result<u64, DirectoryError> {
        self.apply(vec![
            IndexMutation::DeleteAllSecondaryIndexKeysOfResourceId {
                resource: resource.name().to_string(),
                id: id.clone(),
            },
            IndexMutation::DeleteResourceId {
                resource: resource.name().to_string(),
                id: id.clone(),
            },
        ])
    }

    /// Deletes `key` and everything it owns.
    pub fn delete_primary_index_key(&self, key: &Value) -> Result<u64, DirectoryError> {
        self.apply(vec![IndexMutation::DeletePrimaryIndexKeyCascade { key: key.clone() }])
    }
}

fn aborted(index: usize, mutation: &IndexMutation, source: DirectoryError) -> DirectoryError {
    warn!(
        index,
        mutation = mutation.name(),
        code = source.code_str(),
        error = %source,
        "directory batch aborted"
    );
    DirectoryError::BatchFailed {
        index,
        source: Box::new(source),
    }
}
