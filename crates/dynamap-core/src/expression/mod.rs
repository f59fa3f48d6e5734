//! Condition expressions.
//!
//! Conditions are built over logical attribute names, then compiled into
//! the expression text and placeholder maps a store request carries:
//!
//! 1. **Building**: [`Key`] and [`Attr`] produce [`Condition`] leaves,
//!    combined with `&`, `|` and `!`.
//! 2. **Compiling**: [`compile`] resolves the index for key conditions,
//!    rewrites logical names to physical keys, serializes values and assigns
//!    placeholders from the kind's own family.

pub mod compiler;
pub mod condition;

pub use compiler::{CompiledExpression, ExpressionKind, compile, compile_named};
pub use condition::{Attr, CompareOp, Condition, Key};
