//! Partial-update requests built from a record's diff.

use dynamap_model::input::UpdateItemInput;

use crate::codec;
use crate::error::{MapperError, MapperResult};
use crate::expression::{Condition, ExpressionKind, compile};
use crate::record::Record;

const UPDATE_NAME_PREFIX: &str = "#update_name";
const UPDATE_VALUE_PREFIX: &str = ":update_value";

/// Build the `UpdateItem` request for everything `record` changed since
/// its snapshot, or `None` if nothing changed.
///
/// Added and changed attributes become `SET` actions, removed attributes
/// `REMOVE` actions, in attribute-name order. An optional write condition is
/// compiled and merged in.
///
/// # Errors
///
/// - [`MapperError::ImmutableKeyUpdate`] if a primary key attribute changed;
///   changing a key needs a delete and a fresh save.
/// - [`MapperError::MissingKeyValue`] if the record has no primary key.
/// - Compilation and codec errors from the condition or values.
pub fn build_update(
    record: &Record,
    condition: Option<&Condition>,
) -> MapperResult<Option<UpdateItemInput>> {
    let diff = record.diff();
    if !diff.has_changed() {
        return Ok(None);
    }

    let schema = record.schema();
    let primary = &schema.primary_binding().index;
    if let Some(key) = primary.key_attributes().find(|k| diff.touches(k)) {
        return Err(MapperError::immutable(
            key,
            "primary key attributes cannot change through an update",
        ));
    }

    let mut set: Vec<(&String, _)> = diff
        .added
        .iter()
        .chain(diff.changed.iter().map(|(k, c)| (k, &c.new)))
        .collect();
    set.sort_by(|a, b| a.0.cmp(b.0));
    let mut remove: Vec<&String> = diff.removed.keys().collect();
    remove.sort();

    let mut input = UpdateItemInput {
        table_name: schema.table_name().to_owned(),
        key: record.snapshot_key()?,
        ..UpdateItemInput::default()
    };

    let mut counter = 0usize;
    let mut set_actions = Vec::with_capacity(set.len());
    for (name, value) in set {
        let name_placeholder = format!("{UPDATE_NAME_PREFIX}{counter}");
        let value_placeholder = format!("{UPDATE_VALUE_PREFIX}{counter}");
        input
            .expression_attribute_names
            .insert(name_placeholder.clone(), name.clone());
        input
            .expression_attribute_values
            .insert(value_placeholder.clone(), codec::serialize(value)?);
        set_actions.push(format!("{name_placeholder} = {value_placeholder}"));
        counter += 1;
    }
    let mut remove_actions = Vec::with_capacity(remove.len());
    for name in remove {
        let name_placeholder = format!("{UPDATE_NAME_PREFIX}{counter}");
        input
            .expression_attribute_names
            .insert(name_placeholder.clone(), name.clone());
        remove_actions.push(name_placeholder);
        counter += 1;
    }

    let mut clauses = Vec::with_capacity(2);
    if !set_actions.is_empty() {
        clauses.push(format!("SET {}", set_actions.join(", ")));
    }
    if !remove_actions.is_empty() {
        clauses.push(format!("REMOVE {}", remove_actions.join(", ")));
    }
    input.update_expression = Some(clauses.join(" "));

    if let Some(condition) = condition {
        let compiled = compile(schema, condition, ExpressionKind::WriteCondition, None)?;
        compiled.merge_into(
            &mut input.expression_attribute_names,
            &mut input.expression_attribute_values,
        );
        input.condition_expression = Some(compiled.text);
    }

    Ok(Some(input))
}
