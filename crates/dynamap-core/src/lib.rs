//! Attribute mapping and query planning for DynamoDB-style stores.
//!
//! Object types declare logical attributes in an [`ObjectSchema`]. The
//! schema binds some of them (or joined attributes derived from them) to the
//! physical keys of the table's indexes. [`Record`]s keep those keys
//! consistent on every write, track changes since load, and [`Table`] turns
//! records and [`Condition`]s into store requests, picking the index a key
//! condition targets.
#![allow(missing_docs, clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod catalog;
pub mod client;
pub mod codec;
pub mod config;
pub mod diff;
pub mod error;
pub mod expression;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod table;
pub mod update;
pub mod value;

pub use catalog::{Index, IndexCatalog, IndexKind, PRIMARY_INDEX_NAME};
pub use client::StoreClient;
pub use config::MapperConfig;
pub use diff::{Change, Diff};
pub use error::{MapperError, MapperResult};
pub use expression::{Attr, CompiledExpression, Condition, ExpressionKind, Key};
pub use record::Record;
pub use schema::{IndexBinding, JoinedAttributeSpec, ObjectSchema};
pub use table::{QueryRequest, QueryResults, Table};
pub use value::Value;
