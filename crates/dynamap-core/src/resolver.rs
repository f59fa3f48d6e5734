//! Index resolution from the logical names a key condition references.

use crate::catalog::IndexKind;
use crate::error::{MapperError, MapperResult};
use crate::schema::{BoundIndex, ObjectSchema};

/// Pick the index that serves a key condition.
///
/// `names` are the distinct logical names referenced by the condition,
/// partition first. An explicit index short-circuits resolution. Otherwise
/// the bindings whose partition source is `names[0]` (and, with two names,
/// whose sort source is `names[1]`) are candidates; the primary index wins
/// when it is a candidate, else the first candidate in catalog declaration
/// order.
///
/// # Errors
///
/// Returns [`MapperError::IndexNotFound`] when no binding matches or the
/// explicit index is not bound by the schema.
pub fn resolve<'a>(
    schema: &'a ObjectSchema,
    names: &[&str],
    explicit: Option<&str>,
) -> MapperResult<&'a BoundIndex> {
    if let Some(index) = explicit {
        schema.catalog().get(index)?;
        return schema.binding(index).ok_or_else(|| {
            MapperError::IndexNotFound(format!("index '{index}' is not bound for this object"))
        });
    }

    let (partition, sort) = match names {
        [partition] => (*partition, None),
        [partition, sort] => (*partition, Some(*sort)),
        _ => {
            return Err(MapperError::IndexNotFound(format!(
                "cannot resolve an index from {} attribute names",
                names.len()
            )));
        }
    };

    let candidates: Vec<&BoundIndex> = schema
        .bindings()
        .iter()
        .filter(|b| {
            b.partition_source == partition
                && sort.is_none_or(|s| b.sort_source.as_deref() == Some(s))
        })
        .collect();
    let chosen = candidates
        .iter()
        .find(|b| b.index.kind == IndexKind::Primary)
        .or_else(|| candidates.first())
        .copied();

    chosen.ok_or_else(|| match sort {
        Some(sort) => MapperError::IndexNotFound(format!(
            "no index with partition '{partition}' and sort '{sort}'"
        )),
        None => MapperError::IndexNotFound(format!("no index with partition '{partition}'")),
    })
}
