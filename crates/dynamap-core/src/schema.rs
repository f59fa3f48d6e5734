//! Object schemas and the attribute binding table.
//!
//! An [`ObjectSchema`] describes one object type: its logical attributes,
//! which of them (or which joined attributes) feed the keys of which index,
//! the joined attributes derived from them, the mutators applied on
//! assignment and the attributes that may not change once set.
//!
//! Schemas are validated once by [`ObjectSchemaBuilder::build`] and shared
//! read-only as `Arc<ObjectSchema>` afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::catalog::{Index, IndexCatalog, IndexKind};
use crate::config::{DEFAULT_SEPARATOR, MapperConfig};
use crate::error::{MapperError, MapperResult};
use crate::record::Record;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Binds logical (or joined) attributes to the key of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBinding {
    /// Name of the bound index.
    pub index: String,
    /// Attribute feeding the partition key. Must be absent for local
    /// secondary indexes, which share the primary partition.
    pub partition_source: Option<String>,
    /// Attribute feeding the sort key; required iff the index has one.
    pub sort_source: Option<String>,
}

impl IndexBinding {
    /// Start a binding for `index`.
    #[must_use]
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            partition_source: None,
            sort_source: None,
        }
    }

    /// Set the partition source.
    #[must_use]
    pub fn partition(mut self, source: impl Into<String>) -> Self {
        self.partition_source = Some(source.into());
        self
    }

    /// Set the sort source.
    #[must_use]
    pub fn sort(mut self, source: impl Into<String>) -> Self {
        self.sort_source = Some(source.into());
        self
    }
}

/// A joined attribute: the separator-joined text of its sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedAttributeSpec {
    /// Name of the derived attribute.
    pub target: String,
    /// Source attributes, in join order.
    pub sources: Vec<String>,
    /// Separator placed between segments.
    pub separator: String,
}

impl JoinedAttributeSpec {
    /// A joined attribute using the default separator.
    #[must_use]
    pub fn new<I, S>(target: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            separator: DEFAULT_SEPARATOR.to_owned(),
        }
    }

    /// Override the separator.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Compute the joined value from the current attribute values.
    /// Missing sources contribute an empty segment.
    #[must_use]
    pub fn compute(&self, values: &HashMap<String, Value>) -> Value {
        let segments: Vec<String> = self
            .sources
            .iter()
            .map(|s| values.get(s).map(Value::join_segment).unwrap_or_default())
            .collect();
        Value::String(segments.join(&self.separator))
    }
}

/// Signature of a mutator transform: `(attribute, new value, owner)`.
pub type Transform = dyn Fn(&str, Value, &Record) -> Value + Send + Sync;

/// A transform applied to every assignment of one attribute.
#[derive(Clone)]
pub struct Mutator {
    /// The attribute whose assignments are transformed.
    pub source_attribute: String,
    /// The transform.
    pub transform: Arc<Transform>,
}

impl Mutator {
    /// Register `transform` for `source_attribute`.
    pub fn new<F>(source_attribute: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&str, Value, &Record) -> Value + Send + Sync + 'static,
    {
        Self {
            source_attribute: source_attribute.into(),
            transform: Arc::new(transform),
        }
    }

    /// Run the transform.
    #[must_use]
    pub fn apply(&self, value: Value, owner: &Record) -> Value {
        (self.transform)(&self.source_attribute, value, owner)
    }
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("source_attribute", &self.source_attribute)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Resolved bindings
// ---------------------------------------------------------------------------

/// A validated binding with its effective sources.
///
/// For local secondary indexes `partition_source` is the primary binding's
/// partition source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundIndex {
    /// The bound index.
    pub index: Index,
    /// Effective partition source.
    pub partition_source: String,
    /// Sort source, present iff the index has a sort key.
    pub sort_source: Option<String>,
}

impl BoundIndex {
    /// `(physical key, source)` pairs, partition first.
    pub fn key_sources(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once((
            self.index.partition_attribute.as_str(),
            self.partition_source.as_str(),
        ))
        .chain(
            self.index
                .sort_attribute
                .as_deref()
                .zip(self.sort_source.as_deref()),
        )
    }
}

/// Physical key ⇄ source lookups for one schema.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    physical_to_source: HashMap<String, String>,
    source_to_physical: HashMap<String, Vec<String>>,
}

impl BindingTable {
    fn insert(&mut self, physical: &str, source: &str) -> MapperResult<()> {
        match self.physical_to_source.get(physical) {
            Some(existing) if existing != source => {
                return Err(MapperError::InvalidBinding(format!(
                    "physical key '{physical}' is bound to both '{existing}' and '{source}'"
                )));
            }
            Some(_) => return Ok(()),
            None => {}
        }
        self.physical_to_source
            .insert(physical.to_owned(), source.to_owned());
        self.source_to_physical
            .entry(source.to_owned())
            .or_default()
            .push(physical.to_owned());
        Ok(())
    }

    /// The attribute feeding `physical`.
    #[must_use]
    pub fn source_of(&self, physical: &str) -> Option<&str> {
        self.physical_to_source.get(physical).map(String::as_str)
    }

    /// The physical keys fed by `source`, in binding order.
    #[must_use]
    pub fn physical_keys_of(&self, source: &str) -> &[String] {
        self.source_to_physical
            .get(source)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if `name` is a bound physical key.
    #[must_use]
    pub fn is_physical_key(&self, name: &str) -> bool {
        self.physical_to_source.contains_key(name)
    }

    /// Returns `true` if `name` feeds at least one physical key.
    #[must_use]
    pub fn is_source(&self, name: &str) -> bool {
        self.source_to_physical.contains_key(name)
    }

    /// Every `(physical key, source)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.physical_to_source
            .iter()
            .map(|(p, s)| (p.as_str(), s.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ObjectSchema
// ---------------------------------------------------------------------------

/// The validated description of one object type.
#[derive(Debug)]
pub struct ObjectSchema {
    table_name: String,
    catalog: Arc<IndexCatalog>,
    attributes: Vec<String>,
    declared: HashSet<String>,
    required: Vec<String>,
    bindings: Vec<BoundIndex>,
    joined: Vec<JoinedAttributeSpec>,
    mutators: HashMap<String, Mutator>,
    immutable: HashSet<String>,
    store_aliases: bool,
    binding_table: BindingTable,
}

impl ObjectSchema {
    /// Start building a schema for `table_name` over `catalog`.
    #[must_use]
    pub fn builder(table_name: impl Into<String>, catalog: Arc<IndexCatalog>) -> ObjectSchemaBuilder {
        ObjectSchemaBuilder::new(table_name, catalog)
    }

    /// Table the object type lives in.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The index catalog the schema was built against.
    #[must_use]
    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    /// Declared logical attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Returns `true` if `name` is a declared logical attribute.
    #[must_use]
    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    /// Attributes that must be supplied at construction.
    #[must_use]
    pub fn required_attributes(&self) -> &[String] {
        &self.required
    }

    /// Validated bindings in catalog declaration order.
    #[must_use]
    pub fn bindings(&self) -> &[BoundIndex] {
        &self.bindings
    }

    /// The binding of the named index.
    #[must_use]
    pub fn binding(&self, index: &str) -> Option<&BoundIndex> {
        self.bindings.iter().find(|b| b.index.name == index)
    }

    /// The primary binding; always present in a built schema.
    #[must_use]
    pub fn primary_binding(&self) -> &BoundIndex {
        // build() rejects schemas without a primary binding and sorts it first
        &self.bindings[0]
    }

    /// Joined attribute declarations.
    #[must_use]
    pub fn joined(&self) -> &[JoinedAttributeSpec] {
        &self.joined
    }

    /// The joined attribute named `target`.
    #[must_use]
    pub fn joined_spec(&self, target: &str) -> Option<&JoinedAttributeSpec> {
        self.joined.iter().find(|j| j.target == target)
    }

    /// Returns `true` if `name` is a joined attribute.
    #[must_use]
    pub fn is_joined_target(&self, name: &str) -> bool {
        self.joined_spec(name).is_some()
    }

    /// Joined attributes that read `source`.
    pub fn dependents<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a JoinedAttributeSpec> {
        self.joined
            .iter()
            .filter(move |j| j.sources.iter().any(|s| s == source))
    }

    /// The mutator registered for `name`.
    #[must_use]
    pub fn mutator(&self, name: &str) -> Option<&Mutator> {
        self.mutators.get(name)
    }

    /// Returns `true` if `name` may not change once it holds a non-null value.
    #[must_use]
    pub fn is_immutable(&self, name: &str) -> bool {
        self.immutable.contains(name)
    }

    /// Whether binding sources are persisted next to their physical keys.
    #[must_use]
    pub fn store_aliases(&self) -> bool {
        self.store_aliases
    }

    /// Physical key ⇄ source lookups.
    #[must_use]
    pub fn binding_table(&self) -> &BindingTable {
        &self.binding_table
    }

    /// Returns `true` if `name` is a physical key that is not also a
    /// declared attribute, so it can only be written through its source.
    #[must_use]
    pub fn is_protected_key(&self, name: &str) -> bool {
        self.binding_table.is_physical_key(name) && !self.is_declared(name)
    }

    /// Returns `true` if `name` is left out of persisted items: a binding
    /// source when aliases are not stored.
    #[must_use]
    pub fn is_omitted_alias(&self, name: &str) -> bool {
        !self.store_aliases
            && self.binding_table.is_source(name)
            && !self.binding_table.is_physical_key(name)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ObjectSchema`].
#[derive(Debug)]
pub struct ObjectSchemaBuilder {
    table_name: String,
    catalog: Arc<IndexCatalog>,
    attributes: Vec<String>,
    required: Vec<String>,
    bindings: Vec<IndexBinding>,
    joined: Vec<JoinedAttributeSpec>,
    mutators: Vec<Mutator>,
    immutable: Vec<String>,
    store_aliases: bool,
    separator: String,
}

impl ObjectSchemaBuilder {
    fn new(table_name: impl Into<String>, catalog: Arc<IndexCatalog>) -> Self {
        Self {
            table_name: table_name.into(),
            catalog,
            attributes: Vec::new(),
            required: Vec::new(),
            bindings: Vec::new(),
            joined: Vec::new(),
            mutators: Vec::new(),
            immutable: Vec::new(),
            store_aliases: true,
            separator: DEFAULT_SEPARATOR.to_owned(),
        }
    }

    /// Declare logical attributes.
    #[must_use]
    pub fn attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(names.into_iter().map(Into::into));
        self
    }

    /// Mark attributes as required at construction.
    #[must_use]
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add an index binding.
    #[must_use]
    pub fn bind(mut self, binding: IndexBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Separator for joined attributes added through [`Self::join`].
    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Take defaults (the join separator) from `config`.
    #[must_use]
    pub fn config(self, config: &MapperConfig) -> Self {
        self.separator(config.default_separator.clone())
    }

    /// Add a joined attribute using the builder's separator.
    #[must_use]
    pub fn join<I, S>(self, target: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let separator = self.separator.clone();
        self.joined(JoinedAttributeSpec::new(target, sources).with_separator(separator))
    }

    /// Add a fully specified joined attribute.
    #[must_use]
    pub fn joined(mut self, spec: JoinedAttributeSpec) -> Self {
        self.joined.push(spec);
        self
    }

    /// Register a mutator for `attribute`.
    #[must_use]
    pub fn mutator<F>(mut self, attribute: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&str, Value, &Record) -> Value + Send + Sync + 'static,
    {
        self.mutators.push(Mutator::new(attribute, transform));
        self
    }

    /// Mark attributes immutable once they hold a non-null value.
    #[must_use]
    pub fn immutable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether binding sources are persisted alongside their physical keys.
    #[must_use]
    pub fn store_aliases(mut self, store: bool) -> Self {
        self.store_aliases = store;
        self
    }

    /// Validate and build the schema.
    ///
    /// # Errors
    ///
    /// - [`MapperError::DerivedAttributeConflict`] when a joined target
    ///   collides with a declared attribute, an index key or another joined
    ///   target.
    /// - [`MapperError::IndexNotFound`] when a binding names an unknown index.
    /// - [`MapperError::InvalidBinding`] for any inconsistent binding.
    /// - [`MapperError::UnknownAttribute`] when a required, immutable or
    ///   mutated attribute is not declared.
    pub fn build(self) -> MapperResult<Arc<ObjectSchema>> {
        let mut attributes = Vec::with_capacity(self.attributes.len());
        let mut declared = HashSet::new();
        for name in self.attributes {
            if declared.insert(name.clone()) {
                attributes.push(name);
            }
        }

        validate_joined(&self.joined, &declared, &self.catalog)?;

        for name in self
            .required
            .iter()
            .chain(&self.immutable)
            .chain(self.mutators.iter().map(|m| &m.source_attribute))
        {
            if !declared.contains(name) {
                return Err(MapperError::UnknownAttribute(name.clone()));
            }
        }

        let joined_targets: HashSet<&str> = self.joined.iter().map(|j| j.target.as_str()).collect();
        let bindings = resolve_bindings(&self.bindings, &self.catalog, &declared, &joined_targets)?;

        let mut binding_table = BindingTable::default();
        for bound in &bindings {
            for (physical, source) in bound.key_sources() {
                binding_table.insert(physical, source)?;
            }
        }
        for name in &attributes {
            match binding_table.source_of(name) {
                Some(source) if source != name => {
                    return Err(MapperError::InvalidBinding(format!(
                        "declared attribute '{name}' is the physical key fed by '{source}'"
                    )));
                }
                _ => {}
            }
        }

        tracing::debug!(
            table = %self.table_name,
            attributes = attributes.len(),
            bindings = bindings.len(),
            joined = self.joined.len(),
            "built object schema"
        );

        Ok(Arc::new(ObjectSchema {
            table_name: self.table_name,
            catalog: self.catalog,
            attributes,
            declared,
            required: self.required,
            bindings,
            joined: self.joined,
            mutators: self
                .mutators
                .into_iter()
                .map(|m| (m.source_attribute.clone(), m))
                .collect(),
            immutable: self.immutable.into_iter().collect(),
            store_aliases: self.store_aliases,
            binding_table,
        }))
    }
}

fn validate_joined(
    joined: &[JoinedAttributeSpec],
    declared: &HashSet<String>,
    catalog: &IndexCatalog,
) -> MapperResult<()> {
    let mut targets = HashSet::new();
    for spec in joined {
        let target = spec.target.as_str();
        if declared.contains(target) {
            return Err(MapperError::derived_conflict(
                target,
                "name is already a declared attribute",
            ));
        }
        if catalog.is_key_attribute(target) {
            return Err(MapperError::derived_conflict(
                target,
                "name is already an index key attribute",
            ));
        }
        if !targets.insert(target) {
            return Err(MapperError::derived_conflict(target, "declared twice"));
        }
        if spec.sources.is_empty() {
            return Err(MapperError::derived_conflict(target, "no source attributes"));
        }
        if let Some(source) = spec.sources.iter().find(|s| !declared.contains(*s)) {
            return Err(MapperError::InvalidBinding(format!(
                "joined attribute '{target}' reads undeclared attribute '{source}'"
            )));
        }
    }
    Ok(())
}

fn resolve_bindings(
    bindings: &[IndexBinding],
    catalog: &IndexCatalog,
    declared: &HashSet<String>,
    joined_targets: &HashSet<&str>,
) -> MapperResult<Vec<BoundIndex>> {
    let mut by_index: HashMap<&str, &IndexBinding> = HashMap::new();
    for binding in bindings {
        let index = catalog.get(&binding.index)?;
        if by_index.insert(index.name.as_str(), binding).is_some() {
            return Err(MapperError::InvalidBinding(format!(
                "index '{}' is bound more than once",
                binding.index
            )));
        }
        validate_binding(binding, index)?;
        for source in binding
            .partition_source
            .iter()
            .chain(binding.sort_source.iter())
        {
            if !declared.contains(source) && !joined_targets.contains(source.as_str()) {
                return Err(MapperError::InvalidBinding(format!(
                    "index '{}' is bound to '{source}', which is neither a declared nor a \
                     joined attribute",
                    binding.index
                )));
            }
        }
    }

    let primary = catalog.primary();
    let primary_partition = by_index
        .get(primary.name.as_str())
        .and_then(|b| b.partition_source.clone())
        .ok_or_else(|| {
            MapperError::InvalidBinding(format!("primary index '{}' has no binding", primary.name))
        })?;

    // Primary first, then catalog declaration order.
    let ordered = std::iter::once(primary).chain(catalog.iter().filter(|i| !i.is_primary()));
    Ok(ordered
        .filter_map(|index| {
            by_index.get(index.name.as_str()).map(|binding| BoundIndex {
                index: index.clone(),
                partition_source: binding
                    .partition_source
                    .clone()
                    .unwrap_or_else(|| primary_partition.clone()),
                sort_source: binding.sort_source.clone(),
            })
        })
        .collect())
}

fn validate_binding(binding: &IndexBinding, index: &Index) -> MapperResult<()> {
    let name = &index.name;
    match (index.kind, &binding.partition_source) {
        (IndexKind::LocalSecondary, Some(_)) => {
            return Err(MapperError::InvalidBinding(format!(
                "local secondary index '{name}' shares the primary partition and takes no \
                 partition source"
            )));
        }
        (IndexKind::Primary | IndexKind::GlobalSecondary, None) => {
            return Err(MapperError::InvalidBinding(format!(
                "{} index '{name}' needs a partition source",
                index.kind
            )));
        }
        _ => {}
    }
    match (&index.sort_attribute, &binding.sort_source) {
        (Some(_), None) => Err(MapperError::InvalidBinding(format!(
            "index '{name}' has a sort key but the binding has no sort source"
        ))),
        (None, Some(_)) => Err(MapperError::InvalidBinding(format!(
            "index '{name}' has no sort key but the binding has a sort source"
        ))),
        _ => Ok(()),
    }
}
