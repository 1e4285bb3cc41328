use crate::catalog::types::ColumnType;
use crate::catalog::{PartitionDimension, Resource};
use crate::error::DirectoryError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub column_type: ColumnType,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Plain-data description of one entity type, supplied by the
/// configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub partition_dimension_name: String,
    pub partition_key_type: ColumnType,
    pub resource_name: String,
    pub id_type: ColumnType,
    #[serde(default)]
    pub is_partitioning_resource: bool,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl EntityDescriptor {
    pub fn new(
        partition_dimension_name: impl Into<String>,
        partition_key_type: ColumnType,
        resource_name: impl Into<String>,
        id_type: ColumnType,
    ) -> Self {
        Self {
            partition_dimension_name: partition_dimension_name.into(),
            partition_key_type,
            resource_name: resource_name.into(),
            id_type,
            is_partitioning_resource: false,
            indexes: Vec::new(),
        }
    }

    pub fn partitioning(mut self, is_partitioning_resource: bool) -> Self {
        self.is_partitioning_resource = is_partitioning_resource;
        self
    }

    pub fn index(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.indexes.push(IndexDescriptor::new(name, column_type));
        self
    }
}

/// Builds the one partition dimension described by a set of entity
/// descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyBuilder {
    descriptors: Vec<EntityDescriptor>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Accepts a JSON array of entity descriptors.
    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let descriptors: Vec<EntityDescriptor> =
            serde_json::from_str(raw).map_err(|err| DirectoryError::InvalidConfig {
                message: format!("invalid entity descriptors: {err}"),
            })?;
        Ok(Self { descriptors })
    }

    pub fn descriptors(&self) -> &[EntityDescriptor] {
        &self.descriptors
    }

    /// Fails with a configuration conflict when descriptors disagree on
    /// the dimension's name or key type. The result carries no identifiers.
    pub fn build(&self) -> Result<PartitionDimension, DirectoryError> {
        let Some(first) = self.descriptors.first() else {
            return Err(DirectoryError::InvalidConfig {
                message: "topology needs at least one entity descriptor".into(),
            });
        };
        let mut resources = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            if descriptor.partition_dimension_name != first.partition_dimension_name
                || descriptor.partition_key_type != first.partition_key_type
            {
                return Err(DirectoryError::ConfigurationConflict {
                    message: format!(
                        "resource '{}' declares partition dimension '{}' ({}) but '{}' declares '{}' ({})",
                        descriptor.resource_name,
                        descriptor.partition_dimension_name,
                        descriptor.partition_key_type,
                        first.resource_name,
                        first.partition_dimension_name,
                        first.partition_key_type,
                    ),
                });
            }
            let indexes: Vec<(String, ColumnType)> = descriptor
                .indexes
                .iter()
                .map(|i| (i.name.clone(), i.column_type))
                .collect();
            resources.push(Resource::new(
                descriptor.resource_name.clone(),
                descriptor.id_type,
                descriptor.is_partitioning_resource,
                &indexes,
            )?);
        }
        PartitionDimension::new(
            first.partition_dimension_name.clone(),
            first.partition_key_type,
            resources,
        )
    }

    /// Builds and takes identifiers from an already-installed topology.
    pub fn build_against(
        &self,
        installed: &PartitionDimension,
    ) -> Result<PartitionDimension, DirectoryError> {
        let mut dimension = self.build()?;
        dimension.adopt_installed_ids(installed)?;
        Ok(dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityDescriptor, TopologyBuilder};
    use crate::catalog::types::ColumnType;
    use crate::error::DirectoryErrorCode;

    fn weatherstation() -> EntityDescriptor {
        EntityDescriptor::new("region", ColumnType::String, "weatherstation", ColumnType::Integer)
            .index("continent", ColumnType::String)
    }

    #[test]
    fn one_resource_per_descriptor() {
        let dimension = TopologyBuilder::new()
            .entity(weatherstation())
            .entity(
                EntityDescriptor::new("region", ColumnType::String, "region", ColumnType::String)
                    .partitioning(true),
            )
            .build()
            .expect("build");
        assert_eq!(dimension.name(), "region");
        assert_eq!(dimension.resources().len(), 2);
        assert!(dimension.resource("region").expect("res").is_partitioning_resource());
        assert!(dimension.id().is_none());
    }

    #[test]
    fn disagreeing_dimensions_conflict() {
        let err = TopologyBuilder::new()
            .entity(weatherstation())
            .entity(EntityDescriptor::new(
                "region",
                ColumnType::Integer,
                "sensor",
                ColumnType::Long,
            ))
            .build()
            .expect_err("conflict");
        assert_eq!(err.code(), DirectoryErrorCode::ConfigurationConflict);
    }

    #[test]
    fn builds_from_json() {
        let raw = r#"[{
            "partition_dimension_name": "region",
            "partition_key_type": "String",
            "resource_name": "weatherstation",
            "id_type": "Integer",
            "indexes": [{"name": "continent", "column_type": "String"}]
        }]"#;
        let builder = TopologyBuilder::from_json(raw).expect("json");
        assert_eq!(builder.descriptors(), &[weatherstation()]);
        let bad = TopologyBuilder::from_json("{").expect_err("malformed");
        assert_eq!(bad.code(), DirectoryErrorCode::InvalidConfig);
    }

    #[test]
    fn building_twice_is_identical() {
        let builder = TopologyBuilder::new().entity(weatherstation());
        assert_eq!(builder.build().expect("a"), builder.build().expect("b"));
    }

    #[test]
    fn empty_builder_is_invalid() {
        let err = TopologyBuilder::new().build().expect_err("empty");
        assert_eq!(err.code(), DirectoryErrorCode::InvalidConfig);
    }
}
