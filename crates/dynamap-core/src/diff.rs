//! Change tracking between a record's snapshot and its current values.

use std::collections::HashMap;

use crate::value::Value;

/// Old and new value of a changed attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Value in the snapshot.
    pub old: Value,
    /// Current value.
    pub new: Value,
}

/// Attribute-level difference between two value maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// Present only in the current values.
    pub added: HashMap<String, Value>,
    /// Present in both with different values.
    pub changed: HashMap<String, Change>,
    /// Present only in the snapshot.
    pub removed: HashMap<String, Value>,
}

impl Diff {
    /// Returns `true` if any attribute was added, changed or removed.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        !(self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty())
    }

    /// Returns `true` if `name` appears in any of the three sets.
    #[must_use]
    pub fn touches(&self, name: &str) -> bool {
        self.added.contains_key(name)
            || self.changed.contains_key(name)
            || self.removed.contains_key(name)
    }
}

/// Compare `snapshot` against `current` key by key.
#[must_use]
pub fn compute(snapshot: &HashMap<&str, &Value>, current: &HashMap<&str, &Value>) -> Diff {
    let mut diff = Diff::default();
    for (name, new) in current {
        match snapshot.get(name) {
            None => {
                diff.added.insert((*name).to_owned(), (*new).clone());
            }
            Some(old) if old != new => {
                diff.changed.insert(
                    (*name).to_owned(),
                    Change {
                        old: (*old).clone(),
                        new: (*new).clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }
    for (name, old) in snapshot {
        if !current.contains_key(name) {
            diff.removed.insert((*name).to_owned(), (*old).clone());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(values: &[(&'static str, Value)]) -> HashMap<&'static str, Value> {
        values.iter().cloned().collect()
    }

    fn borrow<'a>(map: &'a HashMap<&'static str, Value>) -> HashMap<&'a str, &'a Value> {
        map.iter().map(|(k, v)| (*k, v)).collect()
    }

    #[test]
    fn test_should_report_no_changes_for_identical_maps() {
        let snapshot = view(&[("a", Value::Int(1))]);
        let diff = compute(&borrow(&snapshot), &borrow(&snapshot));
        assert!(!diff.has_changed());
        assert_eq!(diff, Diff::default());
    }

    #[test]
    fn test_should_classify_added_changed_removed() {
        let snapshot = view(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let current = view(&[("a", Value::Int(1)), ("b", Value::Int(3)), ("c", Value::Int(4))]);
        let diff = compute(&borrow(&snapshot), &borrow(&current));

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added["c"], Value::Int(4));
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(
            diff.changed["b"],
            Change {
                old: Value::Int(2),
                new: Value::Int(3)
            }
        );
        assert!(diff.removed.is_empty());
        assert!(diff.has_changed());
        assert!(!diff.touches("a"));
    }

    #[test]
    fn test_should_not_report_numerically_equal_values() {
        let snapshot = view(&[("price", Value::Int(2))]);
        let current = view(&[("price", Value::Float(2.0))]);
        let diff = compute(&borrow(&snapshot), &borrow(&current));
        assert!(!diff.has_changed());

        let current = view(&[("price", Value::Float(2.5))]);
        let diff = compute(&borrow(&snapshot), &borrow(&current));
        assert!(diff.touches("price"));
    }

    #[test]
    fn test_should_report_removed() {
        let snapshot = view(&[("a", Value::Int(1))]);
        let current = view(&[]);
        let diff = compute(&borrow(&snapshot), &borrow(&current));
        assert_eq!(diff.removed["a"], Value::Int(1));
        assert!(diff.touches("a"));
    }
}
