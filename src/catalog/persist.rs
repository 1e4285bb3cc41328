use crate::catalog::types::{ColumnType, Status, Value};
use crate::catalog::{Node, NodeId, PartitionDimension, Resource};
use crate::error::{DirectoryError, EntityKind};
use crate::storage::sql::{
    DIMENSION_METADATA_TABLE, INDEX_METADATA_TABLE, IndexSqlFormatter, NODE_METADATA_TABLE,
    RESOURCE_METADATA_TABLE, STATUS_TABLE,
};
use crate::storage::{Param, StatKey, Statement, StatementExecutor};
use std::sync::Arc;
use tracing::info;

const SYSTEM_ROW: i64 = 1;

/// Topology metadata kept in the backing store: the installed dimension,
/// its resources and indexes, the nodes and the system lock status.
///
/// Read once when a directory opens; written only by install and
/// administrative operations.
#[derive(Clone)]
pub struct MetadataStore {
    executor: Arc<dyn StatementExecutor>,
    sql: IndexSqlFormatter,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").field("sql", &self.sql).finish()
    }
}

impl MetadataStore {
    pub fn new(executor: Arc<dyn StatementExecutor>, sql: IndexSqlFormatter) -> Self {
        Self { executor, sql }
    }

    pub fn install_schema(&self) -> Result<(), DirectoryError> {
        for ddl in self.sql.create_metadata_tables() {
            self.executor.execute_ddl(&ddl)?;
        }
        let present = self.executor.query(
            &Statement::new(
                format!("SELECT id FROM {STATUS_TABLE} WHERE id = ?").into(),
                StatKey::Metadata,
            )
            .bind(long("id", SYSTEM_ROW)?)
            .returning(&[ColumnType::Long]),
        )?;
        if present.is_empty() {
            self.executor.execute(&insert_status(Status::Writable)?)?;
        }
        Ok(())
    }

    /// Installs `dimension`, extending whatever topology of the same name is
    /// already present. Entities already installed keep their identifiers;
    /// new ones are numbered after the existing ones in declaration order.
    /// Re-installing an identical topology writes nothing.
    pub fn install_dimension(
        &self,
        mut dimension: PartitionDimension,
    ) -> Result<PartitionDimension, DirectoryError> {
        if let Some(installed) = self.load_dimension(dimension.name())? {
            dimension.adopt_installed_ids(&installed)?;
        }

        let mut writes = Vec::new();
        if dimension.id().is_none() {
            let id = self.next_id(DIMENSION_METADATA_TABLE)?;
            dimension.assign_id(id);
            writes.push(
                Statement::new(
                    format!(
                        "INSERT INTO {DIMENSION_METADATA_TABLE} (id, name, column_type) VALUES (?, ?, ?)"
                    )
                    .into(),
                    StatKey::Metadata,
                )
                .bind(long("id", i64::from(id))?)
                .bind(text("name", dimension.name())?)
                .bind(text("column_type", dimension.column_type().as_str())?),
            );
        }
        let dimension_id = i64::from(dimension.id().unwrap_or_default());

        let mut next_resource = self.next_id(RESOURCE_METADATA_TABLE)?;
        let mut next_index = self.next_id(INDEX_METADATA_TABLE)?;
        for resource in dimension.resources_mut() {
            if resource.id().is_none() {
                resource.assign_id(next_resource);
                writes.push(
                    Statement::new(
                        format!(
                            "INSERT INTO {RESOURCE_METADATA_TABLE} \
                             (id, dimension_id, name, column_type, is_partitioning) \
                             VALUES (?, ?, ?, ?, ?)"
                        )
                        .into(),
                        StatKey::Metadata,
                    )
                    .bind(long("id", i64::from(next_resource))?)
                    .bind(long("dimension_id", dimension_id)?)
                    .bind(text("name", resource.name())?)
                    .bind(text("column_type", resource.column_type().as_str())?)
                    .bind(flag("is_partitioning", resource.is_partitioning_resource())?),
                );
                next_resource += 1;
            }
            let resource_id = i64::from(resource.id().unwrap_or_default());
            for index in resource.secondary_indexes_mut() {
                if index.id().is_some() {
                    continue;
                }
                index.assign_id(next_index);
                writes.push(
                    Statement::new(
                        format!(
                            "INSERT INTO {INDEX_METADATA_TABLE} \
                             (id, resource_id, name, column_type) VALUES (?, ?, ?, ?)"
                        )
                        .into(),
                        StatKey::Metadata,
                    )
                    .bind(long("id", i64::from(next_index))?)
                    .bind(long("resource_id", resource_id)?)
                    .bind(text("name", index.name())?)
                    .bind(text("column_type", index.column_type().as_str())?),
                );
                next_index += 1;
            }
        }

        if !writes.is_empty() {
            self.executor.execute_batch(&writes)?;
        }
        for ddl in self.sql.create_index_tables(&dimension) {
            self.executor.execute_ddl(&ddl)?;
        }
        info!(
            dimension = dimension.name(),
            resources = dimension.resources().len(),
            new_entries = writes.len(),
            "partition dimension installed"
        );
        Ok(dimension)
    }

    pub fn load_dimension(&self, name: &str) -> Result<Option<PartitionDimension>, DirectoryError> {
        let rows = self.executor.query(
            &Statement::new(
                format!("SELECT id, column_type FROM {DIMENSION_METADATA_TABLE} WHERE name = ?")
                    .into(),
                StatKey::Metadata,
            )
            .bind(text("name", name)?)
            .returning(&[ColumnType::Long, ColumnType::String]),
        )?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let dimension_id = metadata_id(&row.values[0])?;
        let dimension_type = column_type(&row.values[1])?;

        let resource_rows = self.executor.query(
            &Statement::new(
                format!(
                    "SELECT id, name, column_type, is_partitioning FROM {RESOURCE_METADATA_TABLE} \
                     WHERE dimension_id = ? ORDER BY id"
                )
                .into(),
                StatKey::Metadata,
            )
            .bind(long("dimension_id", i64::from(dimension_id))?)
            .returning(&[
                ColumnType::Long,
                ColumnType::String,
                ColumnType::String,
                ColumnType::Boolean,
            ]),
        )?;

        let mut resources = Vec::with_capacity(resource_rows.len());
        for row in &resource_rows {
            let resource_id = metadata_id(&row.values[0])?;
            let index_rows = self.executor.query(
                &Statement::new(
                    format!(
                        "SELECT id, name, column_type FROM {INDEX_METADATA_TABLE} \
                         WHERE resource_id = ? ORDER BY id"
                    )
                    .into(),
                    StatKey::Metadata,
                )
                .bind(long("resource_id", i64::from(resource_id))?)
                .returning(&[ColumnType::Long, ColumnType::String, ColumnType::String]),
            )?;
            let mut declared = Vec::with_capacity(index_rows.len());
            let mut index_ids = Vec::with_capacity(index_rows.len());
            for index_row in &index_rows {
                index_ids.push(metadata_id(&index_row.values[0])?);
                declared.push((
                    metadata_text(&index_row.values[1])?.to_string(),
                    column_type(&index_row.values[2])?,
                ));
            }
            let mut resource = Resource::new(
                metadata_text(&row.values[1])?,
                column_type(&row.values[2])?,
                row.values[3].as_bool().unwrap_or(false),
                &declared,
            )?;
            resource.assign_id(resource_id);
            for (index, id) in resource.secondary_indexes_mut().iter_mut().zip(index_ids) {
                index.assign_id(id);
            }
            resources.push(resource);
        }

        let mut dimension = PartitionDimension::new(name, dimension_type, resources)?;
        dimension.assign_id(dimension_id);
        info!(dimension = name, resources = dimension.resources().len(), "partition dimension loaded");
        Ok(Some(dimension))
    }

    pub fn add_node(&self, node: &Node) -> Result<(), DirectoryError> {
        let insert = Statement::new(
            format!("INSERT INTO {NODE_METADATA_TABLE} (id, name, uri, read_only) VALUES (?, ?, ?, ?)")
                .into(),
            StatKey::Metadata,
        )
        .bind(long("id", i64::from(node.id.0))?)
        .bind(text("name", &node.name)?)
        .bind(text("uri", &node.uri)?)
        .bind(flag("read_only", node.status.is_read_only())?);
        match self.executor.execute(&insert) {
            Ok(_) => Ok(()),
            Err(err) if err.is_constraint_violation() => Err(DirectoryError::ConfigurationConflict {
                message: format!("node {} is already registered", node.id),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn load_nodes(&self) -> Result<Vec<Node>, DirectoryError> {
        let rows = self.executor.query(
            &Statement::new(
                format!("SELECT id, name, uri, read_only FROM {NODE_METADATA_TABLE} ORDER BY id")
                    .into(),
                StatKey::Metadata,
            )
            .returning(&[
                ColumnType::Long,
                ColumnType::String,
                ColumnType::String,
                ColumnType::Boolean,
            ]),
        )?;
        rows.iter()
            .map(|row| -> Result<Node, DirectoryError> {
                Ok(Node::new(
                    metadata_id(&row.values[0])?,
                    metadata_text(&row.values[1])?,
                    metadata_text(&row.values[2])?,
                )
                .with_status(Status::from_read_only(
                    row.values[3].as_bool().unwrap_or(false),
                )))
            })
            .collect()
    }

    pub fn update_node_status(&self, id: NodeId, status: Status) -> Result<(), DirectoryError> {
        let affected = self.executor.execute(
            &Statement::new(
                format!("UPDATE {NODE_METADATA_TABLE} SET read_only = ? WHERE id = ?").into(),
                StatKey::Metadata,
            )
            .bind(flag("read_only", status.is_read_only())?)
            .bind(long("id", i64::from(id.0))?),
        )?;
        if affected == 0 {
            return Err(DirectoryError::not_found(EntityKind::Node, id));
        }
        Ok(())
    }

    pub fn system_status(&self) -> Result<Status, DirectoryError> {
        let rows = self.executor.query(
            &Statement::new(
                format!("SELECT read_only FROM {STATUS_TABLE} WHERE id = ?").into(),
                StatKey::Metadata,
            )
            .bind(long("id", SYSTEM_ROW)?)
            .returning(&[ColumnType::Boolean]),
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.values[0].as_bool())
            .map(Status::from_read_only)
            .unwrap_or_default())
    }

    pub fn update_system_status(&self, status: Status) -> Result<(), DirectoryError> {
        let affected = self.executor.execute(
            &Statement::new(
                format!("UPDATE {STATUS_TABLE} SET read_only = ? WHERE id = ?").into(),
                StatKey::Metadata,
            )
            .bind(flag("read_only", status.is_read_only())?)
            .bind(long("id", SYSTEM_ROW)?),
        )?;
        if affected == 0 {
            self.executor.execute(&insert_status(status)?)?;
        }
        Ok(())
    }

    fn next_id(&self, table: &str) -> Result<u32, DirectoryError> {
        let rows = self.executor.query(
            &Statement::new(
                format!("SELECT id FROM {table} ORDER BY id DESC LIMIT 1").into(),
                StatKey::Metadata,
            )
            .returning(&[ColumnType::Long]),
        )?;
        match rows.first() {
            Some(row) => Ok(metadata_id(&row.values[0])? + 1),
            None => Ok(1),
        }
    }
}

fn insert_status(status: Status) -> Result<Statement, DirectoryError> {
    Ok(Statement::new(
        format!("INSERT INTO {STATUS_TABLE} (id, read_only) VALUES (?, ?)").into(),
        StatKey::Metadata,
    )
    .bind(long("id", SYSTEM_ROW)?)
    .bind(flag("read_only", status.is_read_only())?))
}

fn long(column: &str, value: i64) -> Result<Param, DirectoryError> {
    Param::typed(column, ColumnType::Long, &Value::Long(value))
}

fn text(column: &str, value: &str) -> Result<Param, DirectoryError> {
    Param::typed(column, ColumnType::String, &Value::from(value))
}

fn flag(column: &str, value: bool) -> Result<Param, DirectoryError> {
    Param::typed(column, ColumnType::Boolean, &Value::Boolean(value))
}

fn metadata_id(value: &Value) -> Result<u32, DirectoryError> {
    value
        .as_long()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| DirectoryError::corruption(format!("invalid metadata id {value}")))
}

fn metadata_text(value: &Value) -> Result<&str, DirectoryError> {
    value
        .as_str()
        .ok_or_else(|| DirectoryError::corruption(format!("expected text metadata, got {value}")))
}

fn column_type(value: &Value) -> Result<ColumnType, DirectoryError> {
    let raw = metadata_text(value)?;
    ColumnType::parse(raw)
        .ok_or_else(|| DirectoryError::corruption(format!("unknown column type '{raw}' in metadata")))
}

#[cfg(test)]
mod tests {
    use super::MetadataStore;
    use crate::catalog::types::{ColumnType, Status};
    use crate::catalog::{Node, NodeId, PartitionDimension, Resource};
    use crate::error::DirectoryErrorCode;
    use crate::storage::sql::IndexSqlFormatter;
    use crate::storage::sqlite::SqliteExecutor;
    use crate::storage::type_map::SqliteTypeMap;
    use std::sync::Arc;

    fn store() -> MetadataStore {
        let exec = SqliteExecutor::open_in_memory(1_000).expect("open");
        let store = MetadataStore::new(
            Arc::new(exec),
            IndexSqlFormatter::new(Arc::new(SqliteTypeMap), 32),
        );
        store.install_schema().expect("schema");
        store
    }

    fn region(indexes: &[(&str, ColumnType)]) -> PartitionDimension {
        let declared: Vec<(String, ColumnType)> =
            indexes.iter().map(|(n, t)| (n.to_string(), *t)).collect();
        let station =
            Resource::new("weatherstation", ColumnType::Integer, false, &declared).expect("resource");
        PartitionDimension::new("region", ColumnType::String, vec![station]).expect("dimension")
    }

    #[test]
    fn install_assigns_ids_in_declaration_order() {
        let store = store();
        let installed = store
            .install_dimension(region(&[
                ("continent", ColumnType::String),
                ("altitude", ColumnType::Long),
            ]))
            .expect("install");
        assert!(installed.is_installed());
        assert_eq!(installed.id(), Some(1));
        let station = installed.resource("weatherstation").expect("resource");
        assert_eq!(station.id(), Some(1));
        let ids: Vec<_> = station.secondary_indexes().iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }

    #[test]
    fn reinstall_is_idempotent_and_extends() {
        let store = store();
        let first = store
            .install_dimension(region(&[("continent", ColumnType::String)]))
            .expect("install");
        let again = store
            .install_dimension(region(&[("continent", ColumnType::String)]))
            .expect("reinstall");
        assert_eq!(first, again);

        let extended = store
            .install_dimension(region(&[
                ("continent", ColumnType::String),
                ("altitude", ColumnType::Long),
            ]))
            .expect("extend");
        let station = extended.resource("weatherstation").expect("resource");
        assert_eq!(station.secondary_index("continent").expect("idx").id(), Some(1));
        assert_eq!(station.secondary_index("altitude").expect("idx").id(), Some(2));

        let loaded = store.load_dimension("region").expect("load").expect("present");
        assert_eq!(loaded, extended);
    }

    #[test]
    fn conflicting_reinstall_is_rejected() {
        let store = store();
        store
            .install_dimension(region(&[("continent", ColumnType::String)]))
            .expect("install");
        let err = store
            .install_dimension(region(&[("continent", ColumnType::Long)]))
            .expect_err("type changed");
        assert_eq!(err.code(), DirectoryErrorCode::ConfigurationConflict);
    }

    #[test]
    fn nodes_and_system_status_persist() {
        let store = store();
        store.add_node(&Node::new(1, "east", "sqlite://east")).expect("node");
        store.add_node(&Node::new(2, "west", "sqlite://west")).expect("node");
        let dup = store
            .add_node(&Node::new(1, "again", "sqlite://again"))
            .expect_err("duplicate");
        assert_eq!(dup.code(), DirectoryErrorCode::ConfigurationConflict);

        store.update_node_status(NodeId(2), Status::ReadOnly).expect("status");
        let nodes = store.load_nodes().expect("nodes");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].status, Status::ReadOnly);

        let missing = store
            .update_node_status(NodeId(7), Status::ReadOnly)
            .expect_err("unknown node");
        assert_eq!(missing.code(), DirectoryErrorCode::KeyNotFound);

        assert_eq!(store.system_status().expect("status"), Status::Writable);
        store.update_system_status(Status::ReadOnly).expect("update");
        assert_eq!(store.system_status().expect("status"), Status::ReadOnly);
    }
}
