use crate::catalog::types::ColumnType;
use crate::catalog::{PartitionDimension, Resource, SecondaryIndex};
use crate::storage::type_map::StorageTypeMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub const DIMENSION_METADATA_TABLE: &str = "directory_dimension_metadata";
pub const RESOURCE_METADATA_TABLE: &str = "directory_resource_metadata";
pub const INDEX_METADATA_TABLE: &str = "directory_index_metadata";
pub const NODE_METADATA_TABLE: &str = "directory_node_metadata";
pub const STATUS_TABLE: &str = "directory_status";

pub fn primary_table(dimension: &PartitionDimension) -> String {
    format!("directory_primary_{}", dimension.name())
}

pub fn resource_table(resource_name: &str) -> String {
    format!("directory_resource_{resource_name}")
}

pub fn secondary_table(index: &SecondaryIndex) -> String {
    format!(
        "directory_secondary_{}_{}",
        index.resource_name(),
        index.name()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Template {
    InsertPrimaryIndexKey,
    UpdateReadOnlyOfPrimaryIndexKey,
    DeletePrimaryIndexKey,
    CheckExistenceOfPrimaryKey,
    SelectAssignmentsOfPrimaryIndexKey,
    InsertResourceId,
    UpdateResourceId,
    DeleteResourceId,
    DeleteResourceIdsOfPrimaryIndexKey,
    CheckExistenceOfResourceId,
    SelectPrimaryIndexKeysOfResourceId,
    SelectResourceIdsOfPrimaryIndexKey,
    SelectAssignmentsOfResourceId,
    InsertSecondaryIndexKey,
    DeleteSingleSecondaryIndexKey,
    DeleteSecondaryIndexKeysOfResourceId,
    DeleteSecondaryIndexKeysOfPrimaryIndexKey,
    CheckExistenceOfSecondaryIndexKey,
    SelectResourceIdsOfSecondaryIndexKey,
    SelectSecondaryIndexKeysOfResourceId,
    SelectPrimaryIndexKeysOfSecondaryIndexKey,
    SelectSecondaryIndexKeysOfPrimaryIndexKey,
    SelectAssignmentsOfSecondaryIndexKey,
}

type SqlCache = Mutex<LruCache<(Template, String), Arc<str>>>;

/// Renders the SQL text of every directory statement and table definition.
///
/// Statement text depends only on table names, so rendered text is cached
/// per (statement, tables).
#[derive(Clone)]
pub struct IndexSqlFormatter {
    type_map: Arc<dyn StorageTypeMap>,
    cache: Arc<SqlCache>,
}

impl std::fmt::Debug for IndexSqlFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSqlFormatter")
            .field("dialect", &self.type_map.dialect())
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl IndexSqlFormatter {
    pub fn new(type_map: Arc<dyn StorageTypeMap>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            type_map,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn type_map(&self) -> &dyn StorageTypeMap {
        self.type_map.as_ref()
    }

    pub fn cached_statements(&self) -> usize {
        self.cache.lock().len()
    }

    fn cached(&self, template: Template, target: String, render: impl FnOnce() -> String) -> Arc<str> {
        let key = (template, target);
        let mut cache = self.cache.lock();
        if let Some(sql) = cache.get(&key) {
            return sql.clone();
        }
        let sql: Arc<str> = render().into();
        cache.put(key, sql.clone());
        sql
    }

    fn ty(&self, column_type: ColumnType) -> &'static str {
        self.type_map.storage_type(column_type)
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    pub fn create_metadata_tables(&self) -> Vec<String> {
        let int = self.ty(ColumnType::Long);
        let text = self.ty(ColumnType::String);
        let flag = self.ty(ColumnType::Boolean);
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {DIMENSION_METADATA_TABLE} (\
                 id {int} NOT NULL PRIMARY KEY, \
                 name {text} NOT NULL UNIQUE, \
                 column_type {text} NOT NULL)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {RESOURCE_METADATA_TABLE} (\
                 id {int} NOT NULL PRIMARY KEY, \
                 dimension_id {int} NOT NULL, \
                 name {text} NOT NULL, \
                 column_type {text} NOT NULL, \
                 is_partitioning {flag} NOT NULL, \
                 UNIQUE (dimension_id, name))"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {INDEX_METADATA_TABLE} (\
                 id {int} NOT NULL PRIMARY KEY, \
                 resource_id {int} NOT NULL, \
                 name {text} NOT NULL, \
                 column_type {text} NOT NULL, \
                 UNIQUE (resource_id, name))"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {NODE_METADATA_TABLE} (\
                 id {int} NOT NULL PRIMARY KEY, \
                 name {text} NOT NULL, \
                 uri {text} NOT NULL, \
                 read_only {flag} NOT NULL)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {STATUS_TABLE} (\
                 id {int} NOT NULL PRIMARY KEY, \
                 read_only {flag} NOT NULL)"
            ),
        ]
    }

    /// Index tables of one dimension. The primary key column is the
    /// storage-layer uniqueness constraint that rejects the losing side of
    /// concurrent inserts of the same key.
    pub fn create_index_tables(&self, dimension: &PartitionDimension) -> Vec<String> {
        let primary = primary_table(dimension);
        let mut out = vec![format!(
            "CREATE TABLE IF NOT EXISTS {primary} (\
             id {} NOT NULL PRIMARY KEY, \
             node {} NOT NULL, \
             read_only {} NOT NULL, \
             last_updated {} NOT NULL)",
            self.ty(dimension.column_type()),
            self.ty(ColumnType::Long),
            self.ty(ColumnType::Boolean),
            self.ty(ColumnType::Timestamp),
        )];
        out.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{primary}_node ON {primary} (node)"
        ));
        for resource in dimension.resources() {
            if !resource.is_partitioning_resource() {
                let table = resource_table(resource.name());
                out.push(two_column_table(
                    &table,
                    self.ty(resource.column_type()),
                    self.ty(dimension.column_type()),
                ));
                out.extend(two_column_indexes(&table));
            }
            for index in resource.secondary_indexes() {
                let table = secondary_table(index);
                out.push(two_column_table(
                    &table,
                    self.ty(index.column_type()),
                    self.ty(resource.column_type()),
                ));
                out.extend(two_column_indexes(&table));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Primary index
    // ------------------------------------------------------------------

    pub fn insert_primary_index_key(&self, dimension: &PartitionDimension) -> Arc<str> {
        let p = primary_table(dimension);
        self.cached(Template::InsertPrimaryIndexKey, p.clone(), || {
            format!("INSERT INTO {p} (id, node, read_only, last_updated) VALUES (?, ?, ?, ?)")
        })
    }

    pub fn update_read_only_of_primary_index_key(&self, dimension: &PartitionDimension) -> Arc<str> {
        let p = primary_table(dimension);
        self.cached(Template::UpdateReadOnlyOfPrimaryIndexKey, p.clone(), || {
            format!("UPDATE {p} SET read_only = ?, last_updated = ? WHERE id = ?")
        })
    }

    pub fn delete_primary_index_key(&self, dimension: &PartitionDimension) -> Arc<str> {
        let p = primary_table(dimension);
        self.cached(Template::DeletePrimaryIndexKey, p.clone(), || {
            format!("DELETE FROM {p} WHERE id = ?")
        })
    }

    pub fn check_existence_of_primary_key(&self, dimension: &PartitionDimension) -> Arc<str> {
        let p = primary_table(dimension);
        self.cached(Template::CheckExistenceOfPrimaryKey, p.clone(), || {
            format!("SELECT id FROM {p} WHERE id = ?")
        })
    }

    /// Rows of (node, key read-only flag).
    pub fn select_assignments_of_primary_index_key(&self, dimension: &PartitionDimension) -> Arc<str> {
        let p = primary_table(dimension);
        self.cached(Template::SelectAssignmentsOfPrimaryIndexKey, p.clone(), || {
            format!("SELECT node, read_only FROM {p} WHERE id = ? ORDER BY node")
        })
    }

    // ------------------------------------------------------------------
    // Resource ids (non-partitioning resources)
    // ------------------------------------------------------------------

    pub fn insert_resource_id(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::InsertResourceId, r.clone(), || {
            format!("INSERT INTO {r} (id, pkey) VALUES (?, ?)")
        })
    }

    /// Parameters: new key, resource id, old key.
    pub fn update_resource_id(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::UpdateResourceId, r.clone(), || {
            format!("UPDATE {r} SET pkey = ? WHERE id = ? AND pkey = ?")
        })
    }

    pub fn delete_resource_id(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::DeleteResourceId, r.clone(), || {
            format!("DELETE FROM {r} WHERE id = ?")
        })
    }

    pub fn delete_resource_ids_of_primary_index_key(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::DeleteResourceIdsOfPrimaryIndexKey, r.clone(), || {
            format!("DELETE FROM {r} WHERE pkey = ?")
        })
    }

    pub fn check_existence_of_resource_id(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::CheckExistenceOfResourceId, r.clone(), || {
            format!("SELECT id FROM {r} WHERE id = ?")
        })
    }

    pub fn select_primary_index_keys_of_resource_id(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::SelectPrimaryIndexKeysOfResourceId, r.clone(), || {
            format!("SELECT DISTINCT pkey FROM {r} WHERE id = ?")
        })
    }

    pub fn select_resource_ids_of_primary_index_key(&self, resource: &Resource) -> Arc<str> {
        let r = resource_table(resource.name());
        self.cached(Template::SelectResourceIdsOfPrimaryIndexKey, r.clone(), || {
            format!("SELECT id FROM {r} WHERE pkey = ?")
        })
    }

    pub fn select_assignments_of_resource_id(
        &self,
        dimension: &PartitionDimension,
        resource: &Resource,
    ) -> Arc<str> {
        let p = primary_table(dimension);
        let r = resource_table(resource.name());
        self.cached(Template::SelectAssignmentsOfResourceId, format!("{p}:{r}"), || {
            format!(
                "SELECT p.node, p.read_only FROM {r} r JOIN {p} p ON r.pkey = p.id \
                 WHERE r.id = ? ORDER BY p.node"
            )
        })
    }

    // ------------------------------------------------------------------
    // Secondary indexes
    // ------------------------------------------------------------------

    pub fn insert_secondary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        self.cached(Template::InsertSecondaryIndexKey, s.clone(), || {
            format!("INSERT INTO {s} (id, pkey) VALUES (?, ?)")
        })
    }

    pub fn delete_single_secondary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        self.cached(Template::DeleteSingleSecondaryIndexKey, s.clone(), || {
            format!("DELETE FROM {s} WHERE id = ? AND pkey = ?")
        })
    }

    pub fn delete_secondary_index_keys_of_resource_id(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        self.cached(Template::DeleteSecondaryIndexKeysOfResourceId, s.clone(), || {
            format!("DELETE FROM {s} WHERE pkey = ?")
        })
    }

    pub fn delete_secondary_index_keys_of_primary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        if index.is_on_partitioning_resource() {
            return self.delete_secondary_index_keys_of_resource_id(index);
        }
        let r = resource_table(index.resource_name());
        self.cached(
            Template::DeleteSecondaryIndexKeysOfPrimaryIndexKey,
            format!("{s}:{r}"),
            || format!("DELETE FROM {s} WHERE pkey IN (SELECT id FROM {r} WHERE pkey = ?)"),
        )
    }

    pub fn check_existence_of_secondary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        self.cached(Template::CheckExistenceOfSecondaryIndexKey, s.clone(), || {
            format!("SELECT id FROM {s} WHERE id = ? AND pkey = ?")
        })
    }

    pub fn select_resource_ids_of_secondary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        self.cached(Template::SelectResourceIdsOfSecondaryIndexKey, s.clone(), || {
            format!("SELECT pkey FROM {s} WHERE id = ?")
        })
    }

    pub fn select_secondary_index_keys_of_resource_id(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        self.cached(Template::SelectSecondaryIndexKeysOfResourceId, s.clone(), || {
            format!("SELECT id FROM {s} WHERE pkey = ?")
        })
    }

    pub fn select_primary_index_keys_of_secondary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        if index.is_on_partitioning_resource() {
            return self.cached(
                Template::SelectPrimaryIndexKeysOfSecondaryIndexKey,
                s.clone(),
                || format!("SELECT DISTINCT pkey FROM {s} WHERE id = ?"),
            );
        }
        let r = resource_table(index.resource_name());
        self.cached(
            Template::SelectPrimaryIndexKeysOfSecondaryIndexKey,
            format!("{s}:{r}"),
            || {
                format!(
                    "SELECT DISTINCT r.pkey FROM {s} s JOIN {r} r ON s.pkey = r.id WHERE s.id = ?"
                )
            },
        )
    }

    pub fn select_secondary_index_keys_of_primary_index_key(&self, index: &SecondaryIndex) -> Arc<str> {
        let s = secondary_table(index);
        if index.is_on_partitioning_resource() {
            return self.select_secondary_index_keys_of_resource_id(index);
        }
        let r = resource_table(index.resource_name());
        self.cached(
            Template::SelectSecondaryIndexKeysOfPrimaryIndexKey,
            format!("{s}:{r}"),
            || format!("SELECT s.id FROM {s} s JOIN {r} r ON s.pkey = r.id WHERE r.pkey = ?"),
        )
    }

    pub fn select_assignments_of_secondary_index_key(
        &self,
        dimension: &PartitionDimension,
        index: &SecondaryIndex,
    ) -> Arc<str> {
        let p = primary_table(dimension);
        let s = secondary_table(index);
        if index.is_on_partitioning_resource() {
            return self.cached(
                Template::SelectAssignmentsOfSecondaryIndexKey,
                format!("{s}:{p}"),
                || {
                    format!(
                        "SELECT p.node, p.read_only FROM {s} s JOIN {p} p ON s.pkey = p.id \
                         WHERE s.id = ? ORDER BY p.node"
                    )
                },
            );
        }
        let r = resource_table(index.resource_name());
        self.cached(
            Template::SelectAssignmentsOfSecondaryIndexKey,
            format!("{s}:{r}:{p}"),
            || {
                format!(
                    "SELECT p.node, p.read_only FROM {s} s JOIN {r} r ON s.pkey = r.id \
                     JOIN {p} p ON r.pkey = p.id WHERE s.id = ? ORDER BY p.node"
                )
            },
        )
    }
}

fn two_column_table(table: &str, id_type: &str, pkey_type: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id {id_type} NOT NULL, \
         pkey {pkey_type} NOT NULL)"
    )
}

fn two_column_indexes(table: &str) -> [String; 2] {
    [
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_id ON {table} (id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_pkey ON {table} (pkey)"),
    ]
}
