//! Records: object instances kept index-consistent on every write.
//!
//! Every write goes through one assignment pipeline:
//!
//! 1. reject writes to joined attributes and bound physical keys,
//! 2. run the attribute's mutator, if any,
//! 3. enforce immutability,
//! 4. recompute the joined attributes reading the attribute,
//! 5. project the attribute and those joined attributes onto their
//!    physical index keys,
//! 6. commit.
//!
//! Only step 3 can fail after step 1, and it fails before anything is
//! written, so a failed assignment leaves the record untouched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use dynamap_model::types::WriteRequest;
use dynamap_model::{Item, Key};

use crate::codec;
use crate::diff::{self, Diff};
use crate::error::{MapperError, MapperResult};
use crate::schema::ObjectSchema;
use crate::value::Value;

/// An instance of an object type.
#[derive(Clone)]
pub struct Record {
    schema: Arc<ObjectSchema>,
    values: HashMap<String, Value>,
    snapshot: HashMap<String, Value>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.schema.table_name())
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl Record {
    /// Construct a record from application-supplied logical values.
    ///
    /// Inputs are applied in attribute declaration order so mutators can read
    /// attributes declared before theirs.
    ///
    /// # Errors
    ///
    /// - [`MapperError::DerivedAttributeConflict`] if a joined attribute is
    ///   supplied.
    /// - [`MapperError::ProtectedAttributeWrite`] if a physical key is
    ///   supplied.
    /// - [`MapperError::UnknownAttribute`] for undeclared names.
    /// - [`MapperError::MissingRequiredAttribute`] if a required attribute is
    ///   absent.
    pub fn new<I, K, V>(schema: Arc<ObjectSchema>, inputs: I) -> MapperResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut inputs: HashMap<String, Value> = inputs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        for name in inputs.keys() {
            if schema.is_joined_target(name) {
                return Err(MapperError::derived_conflict(
                    name,
                    "joined attributes are computed and cannot be supplied",
                ));
            }
            check_writable(&schema, name)?;
        }
        if let Some(missing) = schema
            .required_attributes()
            .iter()
            .find(|r| !inputs.contains_key(*r))
        {
            return Err(MapperError::MissingRequiredAttribute(missing.clone()));
        }

        let mut record = Self {
            schema: Arc::clone(&schema),
            values: HashMap::new(),
            snapshot: HashMap::new(),
        };
        for name in schema.attributes() {
            if let Some(value) = inputs.remove(name) {
                record.assign(name, Some(value))?;
            }
        }
        record.refresh_derived();
        record.snapshot = record.values.clone();
        Ok(record)
    }

    /// Rebuild a record from a stored item.
    ///
    /// Mutators, immutability and required checks are skipped: the item is
    /// taken as already valid. Joined attributes and physical keys are
    /// recomputed from the loaded attributes; with aliases not stored,
    /// logical aliases are reconstructed from their physical keys.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::ValueCodec`] if a stored value cannot be decoded.
    pub fn from_store(schema: Arc<ObjectSchema>, item: &Item) -> MapperResult<Self> {
        let raw = codec::deserialize_item(item)?;
        let mut values = HashMap::with_capacity(raw.len());
        for (name, value) in &raw {
            if schema.is_declared(name) {
                values.insert(name.clone(), value.clone());
            } else if !schema.is_joined_target(name) && !schema.binding_table().is_physical_key(name)
            {
                tracing::debug!(
                    table = schema.table_name(),
                    attribute = %name,
                    "skipping unknown stored attribute"
                );
            }
        }

        if !schema.store_aliases() {
            for (physical, source) in schema.binding_table().iter() {
                if !schema.is_declared(source) || values.contains_key(source) {
                    continue;
                }
                if let Some(value) = raw.get(physical) {
                    values.insert(source.to_owned(), value.clone());
                }
            }
        }

        let mut record = Self {
            schema,
            values,
            snapshot: HashMap::new(),
        };
        record.refresh_derived();
        for (physical, _) in record.schema.binding_table().iter() {
            if !record.values.contains_key(physical) {
                if let Some(value) = raw.get(physical) {
                    record.values.insert(physical.to_owned(), value.clone());
                }
            }
        }
        record.snapshot = record.values.clone();
        Ok(record)
    }

    /// The schema this record follows.
    #[must_use]
    pub fn schema(&self) -> &Arc<ObjectSchema> {
        &self.schema
    }

    /// Current value of a logical, joined or physical attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// All current values, physical keys included.
    #[must_use]
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Values captured at construction or load.
    #[must_use]
    pub fn snapshot(&self) -> &HashMap<String, Value> {
        &self.snapshot
    }

    /// Assign a logical attribute.
    ///
    /// # Errors
    ///
    /// - [`MapperError::ProtectedAttributeWrite`] for joined attributes and
    ///   physical keys.
    /// - [`MapperError::UnknownAttribute`] for undeclared names.
    /// - [`MapperError::ImmutableKeyUpdate`] when an immutable attribute
    ///   already holds a different non-null value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> MapperResult<()> {
        if self.schema.is_joined_target(name) {
            return Err(MapperError::protected(
                name,
                "joined attributes are derived from their sources",
            ));
        }
        check_writable(&self.schema, name)?;
        self.assign(name, Some(value.into()))
    }

    /// Remove a logical attribute. Joined attributes reading it fall back to
    /// an empty segment and the physical keys it feeds are removed.
    ///
    /// # Errors
    ///
    /// Same as [`Record::set`].
    pub fn unset(&mut self, name: &str) -> MapperResult<()> {
        if self.schema.is_joined_target(name) {
            return Err(MapperError::protected(
                name,
                "joined attributes are derived from their sources",
            ));
        }
        check_writable(&self.schema, name)?;
        self.assign(name, None)
    }

    fn assign(&mut self, name: &str, value: Option<Value>) -> MapperResult<()> {
        let value = match (value, self.schema.mutator(name)) {
            (Some(v), Some(mutator)) => Some(mutator.apply(v, self)),
            (v, _) => v,
        };

        if self.schema.is_immutable(name) {
            match self.values.get(name) {
                Some(current) if !current.is_null() && Some(current) != value.as_ref() => {
                    return Err(MapperError::immutable(
                        name,
                        "value cannot change once set",
                    ));
                }
                Some(current) if Some(current) == value.as_ref() => return Ok(()),
                _ => {}
            }
        }

        match value {
            Some(v) => {
                self.values.insert(name.to_owned(), v);
            }
            None => {
                self.values.remove(name);
            }
        }

        let schema = Arc::clone(&self.schema);
        for spec in schema.dependents(name) {
            let joined = spec.compute(&self.values);
            self.values.insert(spec.target.clone(), joined);
            self.project(&spec.target);
        }
        self.project(name);
        Ok(())
    }

    /// Copy `source` onto every physical key it feeds.
    fn project(&mut self, source: &str) {
        let current = self.values.get(source).cloned();
        let schema = Arc::clone(&self.schema);
        for physical in schema.binding_table().physical_keys_of(source) {
            if physical == source {
                continue;
            }
            match &current {
                Some(v) => {
                    self.values.insert(physical.clone(), v.clone());
                }
                None => {
                    self.values.remove(physical);
                }
            }
        }
    }

    /// Recompute every joined attribute and project every source.
    fn refresh_derived(&mut self) {
        let schema = Arc::clone(&self.schema);
        for spec in schema.joined() {
            let joined = spec.compute(&self.values);
            self.values.insert(spec.target.clone(), joined);
        }
        for bound in schema.bindings() {
            for (_, source) in bound.key_sources() {
                self.project(source);
            }
        }
    }

    /// The values that would be written to the store.
    #[must_use]
    pub fn persisted_values(&self) -> HashMap<&str, &Value> {
        persisted_view(&self.schema, &self.values)
    }

    /// Serialize the persisted values into a store item.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::ValueCodec`] for unrepresentable values.
    pub fn to_item(&self) -> MapperResult<Item> {
        codec::serialize_item(self.persisted_values())
    }

    /// The primary key of this record.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::MissingKeyValue`] if a primary key attribute
    /// has no value.
    pub fn primary_key(&self) -> MapperResult<Key> {
        self.key_from(&self.values)
    }

    /// The primary key as captured by the snapshot.
    pub(crate) fn snapshot_key(&self) -> MapperResult<Key> {
        self.key_from(&self.snapshot)
    }

    fn key_from(&self, values: &HashMap<String, Value>) -> MapperResult<Key> {
        let primary = &self.schema.primary_binding().index;
        primary
            .key_attributes()
            .map(|attr| {
                let value = values
                    .get(attr)
                    .ok_or_else(|| MapperError::MissingKeyValue(attr.to_owned()))?;
                Ok((attr.to_owned(), codec::serialize(value)?))
            })
            .collect()
    }

    /// A batch put request for this record.
    ///
    /// # Errors
    ///
    /// See [`Record::to_item`].
    pub fn to_put_request(&self) -> MapperResult<WriteRequest> {
        Ok(WriteRequest::put(self.to_item()?))
    }

    /// A batch delete request for this record.
    ///
    /// # Errors
    ///
    /// See [`Record::primary_key`].
    pub fn to_delete_request(&self) -> MapperResult<WriteRequest> {
        Ok(WriteRequest::delete(self.primary_key()?))
    }

    /// Changes since the snapshot, over the persisted view.
    #[must_use]
    pub fn diff(&self) -> Diff {
        diff::compute(
            &persisted_view(&self.schema, &self.snapshot),
            &persisted_view(&self.schema, &self.values),
        )
    }

    /// Changes since the snapshot, limited to logical and joined attributes.
    #[must_use]
    pub fn item_diff(&self) -> Diff {
        diff::compute(
            &self.logical_view(&self.snapshot),
            &self.logical_view(&self.values),
        )
    }

    /// Returns `true` if anything persisted changed since the snapshot.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.diff().has_changed()
    }

    /// Logical and joined attributes as JSON, keys sorted.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let map: BTreeMap<&str, &Value> = self.logical_view(&self.values).into_iter().collect();
        serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_owned(), serde_json::Value::from(v.clone())))
                .collect(),
        )
    }

    fn logical_view<'a>(&self, values: &'a HashMap<String, Value>) -> HashMap<&'a str, &'a Value> {
        values
            .iter()
            .filter(|(k, _)| self.schema.is_declared(k) || self.schema.is_joined_target(k))
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }
}

fn persisted_view<'a>(
    schema: &ObjectSchema,
    values: &'a HashMap<String, Value>,
) -> HashMap<&'a str, &'a Value> {
    values
        .iter()
        .filter(|(k, _)| !schema.is_omitted_alias(k))
        .map(|(k, v)| (k.as_str(), v))
        .collect()
}

fn check_writable(schema: &ObjectSchema, name: &str) -> MapperResult<()> {
    if schema.is_declared(name) {
        Ok(())
    } else if schema.is_protected_key(name) {
        Err(MapperError::protected(
            name,
            "index key attributes are set through their bound source",
        ))
    } else {
        Err(MapperError::UnknownAttribute(name.to_owned()))
    }
}
