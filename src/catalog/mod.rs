pub mod persist;
pub mod types;

use crate::catalog::types::{ColumnType, Status};
use crate::error::{DirectoryError, EntityKind};
use serde::{Deserialize, Serialize};

pub const ID_INDEX_NAME: &str = "id";
const MAX_IDENTIFIER_LEN: usize = 48;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical storage target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub status: Status,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            uri: uri.into(),
            status: Status::Writable,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }
}

/// One assignment of a primary index key to a node, with the effective
/// read-only state of that assignment (key flag OR node status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySemaphore {
    pub node_id: NodeId,
    pub read_only: bool,
}

impl KeySemaphore {
    pub fn new(node_id: NodeId, read_only: bool) -> Self {
        Self { node_id, read_only }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// OR of the read-only flags; `false` for no semaphores.
pub fn any_read_only(semaphores: &[KeySemaphore]) -> bool {
    semaphores
        .iter()
        .fold(false, |read_only, semaphore| read_only || semaphore.read_only)
}

pub fn node_ids(semaphores: &[KeySemaphore]) -> Vec<NodeId> {
    semaphores.iter().map(|s| s.node_id).collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKind {
    /// Lookup by a non-partition attribute.
    Secondary,
    /// The resource id to primary key mapping of a resource.
    ResourceId,
}

/// Lookup structure on one attribute of a resource. Carries the owning
/// resource's name and id type so statements can be built from the handle
/// alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecondaryIndex {
    id: Option<u32>,
    name: String,
    column_type: ColumnType,
    kind: IndexKind,
    resource_name: String,
    resource_column_type: ColumnType,
    partitioning_resource: bool,
}

impl SecondaryIndex {
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_id_index(&self) -> bool {
        matches!(self.kind, IndexKind::ResourceId)
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn resource_column_type(&self) -> ColumnType {
        self.resource_column_type
    }

    /// True when the owning resource's ids are primary index keys.
    pub fn is_on_partitioning_resource(&self) -> bool {
        self.partitioning_resource
    }

    pub(crate) fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
    }
}

/// A shardable entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    id: Option<u32>,
    name: String,
    column_type: ColumnType,
    is_partitioning_resource: bool,
    secondary_indexes: Vec<SecondaryIndex>,
}

impl Resource {
    /// `indexes` are (name, column type) pairs in declaration order.
    pub fn new(
        name: impl Into<String>,
        column_type: ColumnType,
        is_partitioning_resource: bool,
        indexes: &[(String, ColumnType)],
    ) -> Result<Self, DirectoryError> {
        let name = name.into();
        validate_identifier(&name, "resource name")?;
        let mut secondary_indexes: Vec<SecondaryIndex> = Vec::with_capacity(indexes.len());
        for (index_name, index_type) in indexes {
            validate_identifier(index_name, "secondary index name")?;
            if index_name == ID_INDEX_NAME {
                return Err(DirectoryError::InvalidConfig {
                    message: format!(
                        "resource '{name}' declares secondary index '{ID_INDEX_NAME}', which is reserved"
                    ),
                });
            }
            if secondary_indexes.iter().any(|i| i.name == *index_name) {
                return Err(DirectoryError::ConfigurationConflict {
                    message: format!(
                        "resource '{name}' declares secondary index '{index_name}' twice"
                    ),
                });
            }
            secondary_indexes.push(SecondaryIndex {
                id: None,
                name: index_name.clone(),
                column_type: *index_type,
                kind: IndexKind::Secondary,
                resource_name: name.clone(),
                resource_column_type: column_type,
                partitioning_resource: is_partitioning_resource,
            });
        }
        Ok(Self {
            id: None,
            name,
            column_type,
            is_partitioning_resource,
            secondary_indexes,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_partitioning_resource(&self) -> bool {
        self.is_partitioning_resource
    }

    pub fn secondary_indexes(&self) -> &[SecondaryIndex] {
        &self.secondary_indexes
    }

    pub fn secondary_index(&self, name: &str) -> Result<&SecondaryIndex, DirectoryError> {
        self.secondary_indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| {
                DirectoryError::not_found(EntityKind::SecondaryIndex, format!("{}.{name}", self.name))
            })
    }

    /// The index resolving this resource's ids to primary index keys.
    pub fn id_index(&self) -> SecondaryIndex {
        SecondaryIndex {
            id: None,
            name: ID_INDEX_NAME.to_string(),
            column_type: self.column_type,
            kind: IndexKind::ResourceId,
            resource_name: self.name.clone(),
            resource_column_type: self.column_type,
            partitioning_resource: self.is_partitioning_resource,
        }
    }

    pub(crate) fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    pub(crate) fn secondary_indexes_mut(&mut self) -> &mut [SecondaryIndex] {
        &mut self.secondary_indexes
    }
}

/// The sharding axis of one directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionDimension {
    id: Option<u32>,
    name: String,
    column_type: ColumnType,
    resources: Vec<Resource>,
}

impl PartitionDimension {
    pub fn new(
        name: impl Into<String>,
        column_type: ColumnType,
        resources: Vec<Resource>,
    ) -> Result<Self, DirectoryError> {
        let name = name.into();
        validate_identifier(&name, "partition dimension name")?;
        for (pos, resource) in resources.iter().enumerate() {
            if resources[..pos].iter().any(|r| r.name == resource.name) {
                return Err(DirectoryError::ConfigurationConflict {
                    message: format!(
                        "partition dimension '{name}' declares resource '{}' twice",
                        resource.name
                    ),
                });
            }
            if resource.is_partitioning_resource && resource.column_type != column_type {
                return Err(DirectoryError::ConfigurationConflict {
                    message: format!(
                        "partitioning resource '{}' has id type {} but dimension '{name}' is {column_type}",
                        resource.name, resource.column_type
                    ),
                });
            }
        }
        Ok(Self {
            id: None,
            name,
            column_type,
            resources,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Result<&Resource, DirectoryError> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DirectoryError::not_found(EntityKind::Resource, name))
    }

    /// True once the dimension and everything it declares carry installed ids.
    pub fn is_installed(&self) -> bool {
        self.id.is_some()
            && self.resources.iter().all(|r| {
                r.id.is_some() && r.secondary_indexes.iter().all(|i| i.id.is_some())
            })
    }

    pub(crate) fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    pub(crate) fn resources_mut(&mut self) -> &mut [Resource] {
        &mut self.resources
    }

    /// Copies identifiers from an installed topology onto every entity
    /// declared under the same name. Entities new to `installed` keep `None`.
    pub(crate) fn adopt_installed_ids(
        &mut self,
        installed: &PartitionDimension,
    ) -> Result<(), DirectoryError> {
        let conflict = |message: String| DirectoryError::ConfigurationConflict { message };
        if installed.name != self.name || installed.column_type != self.column_type {
            return Err(conflict(format!(
                "partition dimension '{}' ({}) does not match installed '{}' ({})",
                self.name, self.column_type, installed.name, installed.column_type
            )));
        }
        self.id = installed.id;
        for resource in &mut self.resources {
            let Some(existing) = installed.resources.iter().find(|r| r.name == resource.name)
            else {
                continue;
            };
            if existing.column_type != resource.column_type
                || existing.is_partitioning_resource != resource.is_partitioning_resource
            {
                return Err(conflict(format!(
                    "resource '{}' does not match its installed definition",
                    resource.name
                )));
            }
            resource.id = existing.id;
            for index in &mut resource.secondary_indexes {
                let Some(stored) = existing.secondary_indexes.iter().find(|i| i.name == index.name)
                else {
                    continue;
                };
                if stored.column_type != index.column_type {
                    return Err(conflict(format!(
                        "secondary index '{}.{}' is installed as {} but declared as {}",
                        resource.name, index.name, stored.column_type, index.column_type
                    )));
                }
                index.id = stored.id;
            }
        }
        Ok(())
    }
}

/// Names become table names, so they are restricted to SQL-safe identifiers.
pub(crate) fn validate_identifier(value: &str, what: &str) -> Result<(), DirectoryError> {
    let invalid = |reason: &str| DirectoryError::InvalidConfig {
        message: format!("{what} '{value}' {reason}"),
    };
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid(&format!("must be <= {MAX_IDENTIFIER_LEN} bytes")));
    }
    if !value.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(invalid("must start with a letter"));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("must contain only [A-Za-z0-9_]"));
    }
    Ok(())
}
