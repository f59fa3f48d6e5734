//! Compile condition trees into store expression parameters.
//!
//! Each expression kind owns a fixed placeholder family, so expressions
//! compiled independently can be merged into one request without
//! collisions:
//!
//! | kind | names | values |
//! |------|-------|--------|
//! | `KeyConditionExpression` | `#key_name<n>` | `:key_value<n>` |
//! | `FilterExpression` | `#attribute_name<n>` | `:attribute_value<n>` |
//! | `ConditionExpression` | `#condition_attribute_name<n>` | `:condition_attribute_value<n>` |

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use dynamap_model::AttributeValue;
use dynamap_model::types::{ExpressionAttributeNames, ExpressionAttributeValues};

use super::condition::{CompareOp, Condition};
use crate::codec;
use crate::error::{MapperError, MapperResult};
use crate::resolver;
use crate::schema::ObjectSchema;
use crate::value::Value;

/// The kinds of expression the compiler produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    /// `KeyConditionExpression` of a query.
    KeyCondition,
    /// `FilterExpression` of a query.
    Filter,
    /// `ConditionExpression` of a write.
    WriteCondition,
}

impl ExpressionKind {
    /// Wire parameter name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyCondition => "KeyConditionExpression",
            Self::Filter => "FilterExpression",
            Self::WriteCondition => "ConditionExpression",
        }
    }

    /// Prefix of attribute-name placeholders.
    #[must_use]
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Self::KeyCondition => "#key_name",
            Self::Filter => "#attribute_name",
            Self::WriteCondition => "#condition_attribute_name",
        }
    }

    /// Prefix of attribute-value placeholders.
    #[must_use]
    pub fn value_prefix(&self) -> &'static str {
        match self {
            Self::KeyCondition => ":key_value",
            Self::Filter => ":attribute_value",
            Self::WriteCondition => ":condition_attribute_value",
        }
    }
}

impl fmt::Display for ExpressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpressionKind {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KeyConditionExpression" => Ok(Self::KeyCondition),
            "FilterExpression" => Ok(Self::Filter),
            "ConditionExpression" => Ok(Self::WriteCondition),
            other => Err(MapperError::UnsupportedExpressionKind(other.to_owned())),
        }
    }
}

/// Expression text with its placeholder maps.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    /// Kind the expression was compiled as.
    pub kind: ExpressionKind,
    /// Expression text.
    pub text: String,
    /// `#placeholder → physical attribute name`.
    pub attribute_names: ExpressionAttributeNames,
    /// `:placeholder → serialized value`.
    pub attribute_values: ExpressionAttributeValues,
    /// Secondary index to query; `None` for the primary index and for
    /// non-key expressions.
    pub index_name: Option<String>,
}

impl CompiledExpression {
    /// Add this expression's placeholders to request-level maps.
    pub fn merge_into(
        &self,
        names: &mut ExpressionAttributeNames,
        values: &mut ExpressionAttributeValues,
    ) {
        for (k, v) in &self.attribute_names {
            names.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &self.attribute_values {
            values.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Compile `condition` as an expression of `kind`.
///
/// Key conditions resolve their index (honoring `explicit_index`) and
/// rename the first referenced attribute to the index's partition key and
/// the second to its sort key. Other kinds rename a bound attribute to its
/// physical key only when the schema does not store aliases.
///
/// # Errors
///
/// - [`MapperError::InvalidKeyCondition`] for key conditions that are not an
///   `AND` of at most two key-legal predicates with an equality on the
///   partition attribute.
/// - [`MapperError::IndexNotFound`] from index resolution.
/// - [`MapperError::ValueCodec`] for unrepresentable values.
pub fn compile(
    schema: &ObjectSchema,
    condition: &Condition,
    kind: ExpressionKind,
    explicit_index: Option<&str>,
) -> MapperResult<CompiledExpression> {
    let mut names = condition.attribute_names();
    let (renames, index_name) = match kind {
        ExpressionKind::KeyCondition => {
            let key_names = key_order(condition, &names)?;
            let bound = resolver::resolve(schema, &key_names, explicit_index)?;
            let mut renames = HashMap::new();
            renames.insert(key_names[0], bound.index.partition_attribute.clone());
            if let Some(sort) = key_names.get(1) {
                let physical = bound.index.sort_attribute.clone().ok_or_else(|| {
                    MapperError::InvalidKeyCondition(format!(
                        "index '{}' has no sort key for '{sort}'",
                        bound.index.name
                    ))
                })?;
                renames.insert(*sort, physical);
            }
            tracing::debug!(index = %bound.index.name, "resolved key condition index");
            let index_name = (!bound.index.is_primary()).then(|| bound.index.name.clone());
            (renames, index_name)
        }
        ExpressionKind::Filter | ExpressionKind::WriteCondition => {
            let renames = names
                .iter()
                .map(|name| (*name, physical_name(schema, name)))
                .collect();
            (renames, None)
        }
    };

    let mut writer = Writer {
        kind,
        name_placeholders: HashMap::new(),
        attribute_names: HashMap::new(),
        attribute_values: HashMap::new(),
        next_name: 0,
        next_value: 0,
        renames,
    };
    // Placeholders are numbered in order of first appearance.
    for name in names.drain(..) {
        writer.name(name);
    }
    let text = writer.write(condition)?;

    Ok(CompiledExpression {
        kind,
        text,
        attribute_names: writer.attribute_names,
        attribute_values: writer.attribute_values,
        index_name,
    })
}

/// Compile with the kind given by its wire parameter name.
///
/// # Errors
///
/// Returns [`MapperError::UnsupportedExpressionKind`] for unknown kind
/// names, otherwise as [`compile`].
pub fn compile_named(
    schema: &ObjectSchema,
    condition: &Condition,
    kind: &str,
    explicit_index: Option<&str>,
) -> MapperResult<CompiledExpression> {
    compile(schema, condition, kind.parse()?, explicit_index)
}

fn physical_name(schema: &ObjectSchema, name: &str) -> String {
    if schema.store_aliases() {
        return name.to_owned();
    }
    schema
        .binding_table()
        .physical_keys_of(name)
        .first()
        .cloned()
        .unwrap_or_else(|| name.to_owned())
}

/// Validate a key condition and order its names partition first.
///
/// The partition is the first name compared with `=`; with two equalities
/// appearance order decides.
fn key_order<'a>(condition: &Condition, names: &[&'a str]) -> MapperResult<Vec<&'a str>> {
    let conjuncts = condition.conjuncts().ok_or_else(|| {
        MapperError::InvalidKeyCondition("key conditions can only be combined with AND".to_owned())
    })?;
    if names.len() > 2 {
        return Err(MapperError::InvalidKeyCondition(format!(
            "key conditions reference at most two attributes, got {}",
            names.len()
        )));
    }
    if conjuncts.len() != names.len() {
        return Err(MapperError::InvalidKeyCondition(
            "each key attribute takes exactly one predicate".to_owned(),
        ));
    }
    for leaf in &conjuncts {
        let legal = matches!(
            leaf,
            Condition::Compare { op, .. } if *op != CompareOp::Ne
        ) || matches!(leaf, Condition::Between { .. } | Condition::BeginsWith { .. });
        if !legal {
            return Err(MapperError::InvalidKeyCondition(format!(
                "'{}' uses an operator not allowed in key conditions",
                leaf.leaf_name().unwrap_or_default()
            )));
        }
    }
    let is_eq = |target: &str| {
        conjuncts.iter().any(|leaf| {
            matches!(leaf, Condition::Compare { name, op: CompareOp::Eq, .. } if name == target)
        })
    };
    match names.iter().position(|name| is_eq(*name)) {
        Some(pos) => {
            let mut ordered = names.to_vec();
            ordered.swap(0, pos);
            Ok(ordered)
        }
        None => Err(MapperError::InvalidKeyCondition(format!(
            "partition attribute '{}' must be compared with '='",
            names.first().copied().unwrap_or_default()
        ))),
    }
}

struct Writer<'a> {
    kind: ExpressionKind,
    renames: HashMap<&'a str, String>,
    name_placeholders: HashMap<&'a str, String>,
    attribute_names: ExpressionAttributeNames,
    attribute_values: ExpressionAttributeValues,
    next_name: usize,
    next_value: usize,
}

impl<'a> Writer<'a> {
    fn name(&mut self, logical: &'a str) -> String {
        if let Some(placeholder) = self.name_placeholders.get(logical) {
            return placeholder.clone();
        }
        let placeholder = format!("{}{}", self.kind.name_prefix(), self.next_name);
        self.next_name += 1;
        let physical = self
            .renames
            .get(logical)
            .cloned()
            .unwrap_or_else(|| logical.to_owned());
        self.attribute_names.insert(placeholder.clone(), physical);
        self.name_placeholders.insert(logical, placeholder.clone());
        placeholder
    }

    fn value(&mut self, value: &Value) -> MapperResult<String> {
        let placeholder = format!("{}{}", self.kind.value_prefix(), self.next_value);
        self.next_value += 1;
        let wire: AttributeValue = codec::serialize(value)?;
        self.attribute_values.insert(placeholder.clone(), wire);
        Ok(placeholder)
    }

    fn write(&mut self, condition: &'a Condition) -> MapperResult<String> {
        Ok(match condition {
            Condition::Compare { name, op, value } => {
                let n = self.name(name);
                let v = self.value(value)?;
                format!("{n} {op} {v}")
            }
            Condition::Between { name, low, high } => {
                let n = self.name(name);
                let lo = self.value(low)?;
                let hi = self.value(high)?;
                format!("{n} BETWEEN {lo} AND {hi}")
            }
            Condition::BeginsWith { name, prefix } => {
                let n = self.name(name);
                let v = self.value(prefix)?;
                format!("begins_with({n}, {v})")
            }
            Condition::Contains { name, operand } => {
                let n = self.name(name);
                let v = self.value(operand)?;
                format!("contains({n}, {v})")
            }
            Condition::In { name, values } => {
                let n = self.name(name);
                let placeholders = values
                    .iter()
                    .map(|v| self.value(v))
                    .collect::<MapperResult<Vec<_>>>()?;
                format!("{n} IN ({})", placeholders.join(", "))
            }
            Condition::Exists(name) => format!("attribute_exists({})", self.name(name)),
            Condition::NotExists(name) => format!("attribute_not_exists({})", self.name(name)),
            Condition::And(l, r) => format!("({} AND {})", self.write(l)?, self.write(r)?),
            Condition::Or(l, r) => format!("({} OR {})", self.write(l)?, self.write(r)?),
            Condition::Not(inner) => format!("(NOT {})", self.write(inner)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{Index, IndexCatalog};
    use crate::expression::condition::{Attr, Key};
    use crate::schema::IndexBinding;

    fn schema(store_aliases: bool) -> Arc<ObjectSchema> {
        let catalog = IndexCatalog::new(vec![
            Index::primary("pk", Some("sk")),
            Index::global_secondary("gsi0", "gsi0_pk", Some("gsi0_sk")),
        ])
        .unwrap();
        ObjectSchema::builder("t", Arc::new(catalog))
            .attributes(["account", "at", "kind", "status"])
            .bind(IndexBinding::new("table").partition("account").sort("at"))
            .bind(IndexBinding::new("gsi0").partition("kind").sort("at"))
            .store_aliases(store_aliases)
            .build()
            .unwrap()
    }

    #[test]
    fn test_should_compile_primary_key_condition() {
        let schema = schema(true);
        let cond = Key::new("account").eq("a1") & Key::new("at").begins_with("2024");
        let out = compile(&schema, &cond, ExpressionKind::KeyCondition, None).unwrap();
        assert_eq!(
            out.text,
            "(#key_name0 = :key_value0 AND begins_with(#key_name1, :key_value1))"
        );
        assert_eq!(out.attribute_names["#key_name0"], "pk");
        assert_eq!(out.attribute_names["#key_name1"], "sk");
        assert_eq!(out.attribute_values[":key_value0"], AttributeValue::s("a1"));
        assert_eq!(out.index_name, None);
    }

    #[test]
    fn test_should_pick_partition_from_equality_in_any_order() {
        let schema = schema(true);
        let cond = Key::new("at").begins_with("2024") & Key::new("account").eq("a1");
        let out = compile(&schema, &cond, ExpressionKind::KeyCondition, None).unwrap();
        assert_eq!(
            out.text,
            "(begins_with(#key_name0, :key_value0) AND #key_name1 = :key_value1)"
        );
        assert_eq!(out.attribute_names["#key_name0"], "sk");
        assert_eq!(out.attribute_names["#key_name1"], "pk");
        assert_eq!(out.index_name, None);

        let cond = Key::new("at").gt("2024") & Key::new("kind").eq("alert");
        let out = compile(&schema, &cond, ExpressionKind::KeyCondition, None).unwrap();
        assert_eq!(out.index_name.as_deref(), Some("gsi0"));
        assert_eq!(out.attribute_names["#key_name1"], "gsi0_pk");
    }

    #[test]
    fn test_should_attach_secondary_index_name() {
        let schema = schema(true);
        let cond = Key::new("kind").eq("alert") & Key::new("at").between("a", "b");
        let out = compile(&schema, &cond, ExpressionKind::KeyCondition, None).unwrap();
        assert_eq!(out.index_name.as_deref(), Some("gsi0"));
        assert_eq!(
            out.text,
            "(#key_name0 = :key_value0 AND #key_name1 BETWEEN :key_value1 AND :key_value2)"
        );
        assert_eq!(out.attribute_names["#key_name0"], "gsi0_pk");
        assert_eq!(out.attribute_names["#key_name1"], "gsi0_sk");
    }

    #[test]
    fn test_should_reject_invalid_key_conditions() {
        let schema = schema(true);
        let cases = [
            Key::new("account").eq("a") | Key::new("at").eq("b"),
            Key::new("account").gt("a"),
            Attr::new("account").ne("a"),
            Key::new("account").eq("a") & Key::new("at").gt("b") & Key::new("kind").eq("c"),
            Key::new("account").eq("a") & Key::new("at").gt("b") & Key::new("at").lt("c"),
            Key::new("account").eq("a") & Attr::new("at").exists(),
        ];
        for cond in &cases {
            let err = compile(&schema, cond, ExpressionKind::KeyCondition, None).unwrap_err();
            assert!(
                matches!(err, MapperError::InvalidKeyCondition(_)),
                "unexpected {err:?} for {cond:?}"
            );
        }
    }

    #[test]
    fn test_should_pass_filter_names_through_when_aliases_stored() {
        let schema = schema(true);
        let cond = Attr::new("status").is_in(["a", "b"]) & !Attr::new("kind").exists();
        let out = compile(&schema, &cond, ExpressionKind::Filter, None).unwrap();
        assert_eq!(
            out.text,
            "(#attribute_name0 IN (:attribute_value0, :attribute_value1) AND \
             (NOT attribute_exists(#attribute_name1)))"
        );
        assert_eq!(out.attribute_names["#attribute_name1"], "kind");
    }

    #[test]
    fn test_should_rewrite_filter_aliases_when_not_stored() {
        let schema = schema(false);
        let cond = Attr::new("kind").eq("x") & Attr::new("status").eq("y");
        let out = compile(&schema, &cond, ExpressionKind::WriteCondition, None).unwrap();
        assert_eq!(out.attribute_names["#condition_attribute_name0"], "gsi0_pk");
        assert_eq!(out.attribute_names["#condition_attribute_name1"], "status");
        assert!(out.attribute_values.contains_key(":condition_attribute_value1"));
    }

    #[test]
    fn test_should_reuse_name_placeholder() {
        let schema = schema(true);
        let cond = Attr::new("status").gt(1) & Attr::new("status").lt(5);
        let out = compile(&schema, &cond, ExpressionKind::Filter, None).unwrap();
        assert_eq!(out.attribute_names.len(), 1);
        assert_eq!(out.attribute_values.len(), 2);
    }

    #[test]
    fn test_should_parse_kind_names() {
        assert_eq!(
            "FilterExpression".parse::<ExpressionKind>().unwrap(),
            ExpressionKind::Filter
        );
        let schema = schema(true);
        let err = compile_named(&schema, &Attr::new("a").eq(1), "UpdateExpression", None)
            .unwrap_err();
        assert!(matches!(err, MapperError::UnsupportedExpressionKind(k) if k == "UpdateExpression"));
    }

    #[test]
    fn test_should_merge_disjoint_placeholders() {
        let schema = schema(true);
        let key = compile(
            &schema,
            &(Key::new("account").eq("a") & Key::new("at").gt("t")),
            ExpressionKind::KeyCondition,
            None,
        )
        .unwrap();
        let filter = compile(
            &schema,
            &(Attr::new("at").lt("z") & Attr::new("status").eq("s")),
            ExpressionKind::Filter,
            None,
        )
        .unwrap();

        let mut names = HashMap::new();
        let mut values = HashMap::new();
        key.merge_into(&mut names, &mut values);
        filter.merge_into(&mut names, &mut values);
        assert_eq!(names.len(), key.attribute_names.len() + filter.attribute_names.len());
        assert_eq!(values.len(), key.attribute_values.len() + filter.attribute_values.len());
    }
}
