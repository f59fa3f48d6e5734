//! Condition trees over logical attribute names.
//!
//! Conditions are built with [`Key`] (key conditions) or [`Attr`] (filters
//! and write conditions) and combined with `&`, `|` and `!`.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use crate::value::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (`=`).
    Eq,
    /// Not equal (`<>`).
    Ne,
    /// Less than (`<`).
    Lt,
    /// Less than or equal (`<=`).
    Le,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal (`>=`).
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
        }
    }
}

/// A boolean condition over attribute names.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `name op value`
    Compare {
        /// Attribute name.
        name: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand value.
        value: Value,
    },
    /// `name BETWEEN low AND high`
    Between {
        /// Attribute name.
        name: String,
        /// Inclusive lower bound.
        low: Value,
        /// Inclusive upper bound.
        high: Value,
    },
    /// `begins_with(name, prefix)`
    BeginsWith {
        /// Attribute name.
        name: String,
        /// Prefix.
        prefix: Value,
    },
    /// `contains(name, operand)`
    Contains {
        /// Attribute name.
        name: String,
        /// Substring or set element.
        operand: Value,
    },
    /// `name IN (v1, v2, ...)`
    In {
        /// Attribute name.
        name: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// `attribute_exists(name)`
    Exists(String),
    /// `attribute_not_exists(name)`
    NotExists(String),
    /// Conjunction.
    And(Box<Condition>, Box<Condition>),
    /// Disjunction.
    Or(Box<Condition>, Box<Condition>),
    /// Negation.
    Not(Box<Condition>),
}

impl Condition {
    /// `self AND other`.
    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`.
    #[must_use]
    pub fn or(self, other: Condition) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Distinct attribute names in order of first appearance.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            Self::Not(inner) => inner.collect_names(out),
            leaf => {
                if let Some(name) = leaf.leaf_name() {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
        }
    }

    /// Attribute name of a leaf condition.
    #[must_use]
    pub fn leaf_name(&self) -> Option<&str> {
        match self {
            Self::Compare { name, .. }
            | Self::Between { name, .. }
            | Self::BeginsWith { name, .. }
            | Self::Contains { name, .. }
            | Self::In { name, .. }
            | Self::Exists(name)
            | Self::NotExists(name) => Some(name),
            Self::And(..) | Self::Or(..) | Self::Not(_) => None,
        }
    }

    /// Leaves of a pure `AND` chain, or `None` if `OR`/`NOT` appear.
    #[must_use]
    pub fn conjuncts(&self) -> Option<Vec<&Condition>> {
        match self {
            Self::And(l, r) => {
                let mut out = l.conjuncts()?;
                out.extend(r.conjuncts()?);
                Some(out)
            }
            Self::Or(..) | Self::Not(_) => None,
            leaf => Some(vec![leaf]),
        }
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.and(rhs)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.or(rhs)
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Builder for key-condition predicates.
#[derive(Debug, Clone)]
pub struct Key(String);

impl Key {
    /// Refer to the logical attribute `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Condition {
        Condition::Compare {
            name: self.0,
            op,
            value: value.into(),
        }
    }

    /// `= value`
    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Eq, value)
    }

    /// `< value`
    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Lt, value)
    }

    /// `<= value`
    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Le, value)
    }

    /// `> value`
    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Gt, value)
    }

    /// `>= value`
    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Ge, value)
    }

    /// `begins_with(name, prefix)`
    #[must_use]
    pub fn begins_with(self, prefix: impl Into<Value>) -> Condition {
        Condition::BeginsWith {
            name: self.0,
            prefix: prefix.into(),
        }
    }

    /// `BETWEEN low AND high`
    #[must_use]
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Condition {
        Condition::Between {
            name: self.0,
            low: low.into(),
            high: high.into(),
        }
    }
}

/// Builder for filter and write-condition predicates.
#[derive(Debug, Clone)]
pub struct Attr(Key);

impl Attr {
    /// Refer to the logical attribute `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Key::new(name))
    }

    /// `= value`
    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.0.eq(value)
    }

    /// `<> value`
    #[must_use]
    pub fn ne(self, value: impl Into<Value>) -> Condition {
        self.0.compare(CompareOp::Ne, value)
    }

    /// `< value`
    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.0.lt(value)
    }

    /// `<= value`
    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Condition {
        self.0.lte(value)
    }

    /// `> value`
    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.0.gt(value)
    }

    /// `>= value`
    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Condition {
        self.0.gte(value)
    }

    /// `begins_with(name, prefix)`
    #[must_use]
    pub fn begins_with(self, prefix: impl Into<Value>) -> Condition {
        self.0.begins_with(prefix)
    }

    /// `BETWEEN low AND high`
    #[must_use]
    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Condition {
        self.0.between(low, high)
    }

    /// `contains(name, operand)`
    #[must_use]
    pub fn contains(self, operand: impl Into<Value>) -> Condition {
        Condition::Contains {
            name: self.0.0,
            operand: operand.into(),
        }
    }

    /// `IN (values...)`
    #[must_use]
    pub fn is_in<I, V>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::In {
            name: self.0.0,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `attribute_exists(name)`
    #[must_use]
    pub fn exists(self) -> Condition {
        Condition::Exists(self.0.0)
    }

    /// `attribute_not_exists(name)`
    #[must_use]
    pub fn not_exists(self) -> Condition {
        Condition::NotExists(self.0.0)
    }
}
