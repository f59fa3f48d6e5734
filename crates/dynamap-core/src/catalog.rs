//! Index catalog: the physical key layout of a table.
//!
//! A catalog lists the primary index and every secondary index together with
//! the physical attribute names that make up their keys. It knows nothing
//! about logical attributes; see [`crate::schema`] for that mapping.

use std::collections::HashSet;
use std::fmt;

use dynamap_model::input::DescribeTableInput;
use dynamap_model::types::{KeySchemaElement, KeyType, TableDescription};

use crate::client::StoreClient;
use crate::error::{MapperError, MapperResult};

/// Name under which the primary index is registered.
pub const PRIMARY_INDEX_NAME: &str = "table";

/// The role an index plays on its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// The table's own key.
    Primary,
    /// Shares the primary partition attribute, adds its own sort attribute.
    LocalSecondary,
    /// Independent partition and optional sort attribute.
    GlobalSecondary,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::LocalSecondary => "local secondary",
            Self::GlobalSecondary => "global secondary",
        })
    }
}

/// One index of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name; the primary index is called [`PRIMARY_INDEX_NAME`].
    pub name: String,
    /// Physical partition attribute. For local secondary indexes this is
    /// inherited from the primary index when the catalog is built.
    pub partition_attribute: String,
    /// Physical sort attribute, if the index has one.
    pub sort_attribute: Option<String>,
    /// Index role.
    pub kind: IndexKind,
}

impl Index {
    /// The primary index.
    #[must_use]
    pub fn primary(partition: impl Into<String>, sort: Option<&str>) -> Self {
        Self {
            name: PRIMARY_INDEX_NAME.to_owned(),
            partition_attribute: partition.into(),
            sort_attribute: sort.map(str::to_owned),
            kind: IndexKind::Primary,
        }
    }

    /// A global secondary index.
    #[must_use]
    pub fn global_secondary(
        name: impl Into<String>,
        partition: impl Into<String>,
        sort: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_attribute: partition.into(),
            sort_attribute: sort.map(str::to_owned),
            kind: IndexKind::GlobalSecondary,
        }
    }

    /// A local secondary index; its partition attribute comes from the
    /// primary index.
    #[must_use]
    pub fn local_secondary(name: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_attribute: String::new(),
            sort_attribute: Some(sort.into()),
            kind: IndexKind::LocalSecondary,
        }
    }

    /// Returns `true` for the primary index.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.kind == IndexKind::Primary
    }

    /// Physical key attribute names, partition first.
    pub fn key_attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_attribute.as_str()).chain(self.sort_attribute.as_deref())
    }

    fn from_key_schema(
        name: &str,
        key_schema: &[KeySchemaElement],
        kind: IndexKind,
    ) -> MapperResult<Self> {
        let partition = key_schema
            .iter()
            .find(|k| k.key_type == KeyType::Hash)
            .map(|k| k.attribute_name.clone())
            .ok_or_else(|| {
                MapperError::InvalidCatalog(format!("index '{name}' has no HASH key"))
            })?;
        let sort = key_schema
            .iter()
            .find(|k| k.key_type == KeyType::Range)
            .map(|k| k.attribute_name.clone());
        Ok(Self {
            name: name.to_owned(),
            partition_attribute: partition,
            sort_attribute: sort,
            kind,
        })
    }
}

/// Validated, ordered set of indexes for one table.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    indexes: Vec<Index>,
    primary: usize,
}

impl IndexCatalog {
    /// Build a catalog, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidCatalog`] for duplicate names, a missing
    /// or repeated primary index, a local secondary index without a sort
    /// attribute, or a local secondary index declaring a partition attribute
    /// different from the primary one.
    pub fn new(mut indexes: Vec<Index>) -> MapperResult<Self> {
        let mut seen = HashSet::new();
        for index in &indexes {
            if !seen.insert(index.name.as_str()) {
                return Err(MapperError::InvalidCatalog(format!(
                    "duplicate index name '{}'",
                    index.name
                )));
            }
        }

        let mut primaries = indexes.iter().enumerate().filter(|(_, i)| i.is_primary());
        let primary = match (primaries.next(), primaries.next()) {
            (Some((pos, _)), None) => pos,
            (None, _) => {
                return Err(MapperError::InvalidCatalog(
                    "catalog has no primary index".to_owned(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(MapperError::InvalidCatalog(
                    "catalog has more than one primary index".to_owned(),
                ));
            }
        };
        if indexes[primary].name != PRIMARY_INDEX_NAME {
            return Err(MapperError::InvalidCatalog(format!(
                "primary index must be named '{PRIMARY_INDEX_NAME}'"
            )));
        }

        let primary_partition = indexes[primary].partition_attribute.clone();
        for index in &mut indexes {
            if index.partition_attribute.is_empty() && index.kind != IndexKind::LocalSecondary {
                return Err(MapperError::InvalidCatalog(format!(
                    "index '{}' has no partition attribute",
                    index.name
                )));
            }
            if index.kind != IndexKind::LocalSecondary {
                continue;
            }
            if index.sort_attribute.is_none() {
                return Err(MapperError::InvalidCatalog(format!(
                    "local secondary index '{}' must have a sort attribute",
                    index.name
                )));
            }
            if index.partition_attribute.is_empty() {
                index.partition_attribute.clone_from(&primary_partition);
            } else if index.partition_attribute != primary_partition {
                return Err(MapperError::InvalidCatalog(format!(
                    "local secondary index '{}' must use the primary partition attribute '{}'",
                    index.name, primary_partition
                )));
            }
        }

        Ok(Self { indexes, primary })
    }

    /// Build a catalog from a table description: primary first, then global
    /// secondary indexes, then local secondary indexes, each in the order
    /// the description lists them.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidCatalog`] if a key schema lacks a HASH
    /// element or an index is unnamed.
    pub fn from_table_description(table: &TableDescription) -> MapperResult<Self> {
        let mut indexes = vec![Index::from_key_schema(
            PRIMARY_INDEX_NAME,
            &table.key_schema,
            IndexKind::Primary,
        )?];
        let secondaries = table
            .global_secondary_indexes
            .iter()
            .map(|d| (d, IndexKind::GlobalSecondary))
            .chain(
                table
                    .local_secondary_indexes
                    .iter()
                    .map(|d| (d, IndexKind::LocalSecondary)),
            );
        for (desc, kind) in secondaries {
            let name = desc.index_name.as_deref().ok_or_else(|| {
                MapperError::InvalidCatalog("secondary index without a name".to_owned())
            })?;
            indexes.push(Index::from_key_schema(name, &desc.key_schema, kind)?);
        }
        Self::new(indexes)
    }

    /// Fetch the table description from the store and build a catalog.
    ///
    /// # Errors
    ///
    /// Store errors are returned unchanged; see also
    /// [`IndexCatalog::from_table_description`].
    pub async fn load<C: StoreClient + ?Sized>(client: &C, table_name: &str) -> MapperResult<Self> {
        let output = client
            .describe_table(DescribeTableInput {
                table_name: table_name.to_owned(),
            })
            .await?;
        let table = output.table.ok_or_else(|| {
            MapperError::InvalidCatalog(format!("no description returned for table '{table_name}'"))
        })?;
        let catalog = Self::from_table_description(&table)?;
        tracing::debug!(table = table_name, indexes = catalog.len(), "loaded index catalog");
        Ok(catalog)
    }

    /// Look up an index by name.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::IndexNotFound`] for an unknown name.
    pub fn get(&self, name: &str) -> MapperResult<&Index> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| MapperError::IndexNotFound(name.to_owned()))
    }

    /// The primary index.
    #[must_use]
    pub fn primary(&self) -> &Index {
        &self.indexes[self.primary]
    }

    /// Indexes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter()
    }

    /// Number of indexes, primary included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Always `false`; a valid catalog has a primary index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Returns `true` if `attribute` is a key attribute of any index.
    #[must_use]
    pub fn is_key_attribute(&self, attribute: &str) -> bool {
        self.indexes
            .iter()
            .any(|i| i.key_attributes().any(|a| a == attribute))
    }
}
