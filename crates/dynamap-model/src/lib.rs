//! Wire-format types shared by dynamap and its store clients.
//!
//! These mirror the JSON shapes of a DynamoDB-style store: the tagged
//! `AttributeValue` union, the request/response structs for the item, query
//! and batch operations the mapper issues, the key-schema shapes returned by
//! `DescribeTable`, and the error type a store client reports.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(missing_docs)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod output;
pub mod types;

pub use attribute_value::AttributeValue;
pub use error::{StoreError, StoreErrorCode};
pub use types::{Item, Key};
