//! Shared store types: key schemas, table descriptions and batch shapes.
//!
//! Structs use `#[serde(rename_all = "PascalCase")]` to match the wire
//! format. Enum variants use Rust naming with `#[serde(rename)]` mapping to
//! the `SCREAMING_SNAKE_CASE` strings the store sends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Key type within a key schema element.
///
/// `Hash` denotes the partition key; `Range` denotes the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Partition key.
    #[serde(rename = "HASH")]
    Hash,
    /// Sort key.
    #[serde(rename = "RANGE")]
    Range,
}

impl KeyType {
    /// Returns the wire-format string representation of this key type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "HASH",
            Self::Range => "RANGE",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines what values are returned by write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReturnValue {
    /// Nothing is returned.
    #[default]
    #[serde(rename = "NONE")]
    None,
    /// All attributes as they appeared before the operation.
    #[serde(rename = "ALL_OLD")]
    AllOld,
    /// Updated attributes as they appeared before the operation.
    #[serde(rename = "UPDATED_OLD")]
    UpdatedOld,
    /// All attributes as they appear after the operation.
    #[serde(rename = "ALL_NEW")]
    AllNew,
    /// Updated attributes as they appear after the operation.
    #[serde(rename = "UPDATED_NEW")]
    UpdatedNew,
}

// ---------------------------------------------------------------------------
// Key schema & table description
// ---------------------------------------------------------------------------

/// An element of the key schema for a table or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    /// The name of the key attribute.
    pub attribute_name: String,
    /// The role of the attribute in the key schema (`HASH` or `RANGE`).
    pub key_type: KeyType,
}

impl KeySchemaElement {
    /// A partition (`HASH`) key element.
    #[must_use]
    pub fn hash(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            key_type: KeyType::Hash,
        }
    }

    /// A sort (`RANGE`) key element.
    #[must_use]
    pub fn range(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            key_type: KeyType::Range,
        }
    }
}

/// Secondary index description as returned by `DescribeTable`.
///
/// Global and local secondary indexes share this shape on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecondaryIndexDescription {
    /// The name of the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    /// The key schema for this index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_schema: Vec<KeySchemaElement>,
    /// The number of items in the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<i64>,
}

/// Description of a table, limited to the fields the mapper consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    /// The name of the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// The key schema for the table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_schema: Vec<KeySchemaElement>,
    /// The global secondary indexes on the table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_secondary_indexes: Vec<SecondaryIndexDescription>,
    /// The local secondary indexes on the table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_secondary_indexes: Vec<SecondaryIndexDescription>,
    /// The number of items in the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<i64>,
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// A set of keys and optional projection for `BatchGetItem`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    /// The primary keys of the items to retrieve.
    pub keys: Vec<HashMap<String, AttributeValue>>,
    /// The attributes to retrieve. If not specified, all attributes are returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// Expression attribute names for substitution in `projection_expression`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    /// Whether to use a consistent read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

/// A single write request within a `BatchWriteItem` operation.
///
/// Exactly one of `put_request` or `delete_request` must be specified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// A request to put an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    /// A request to delete an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

impl WriteRequest {
    /// Wrap an item in a put request.
    #[must_use]
    pub fn put(item: Item) -> Self {
        Self {
            put_request: Some(PutRequest { item }),
            delete_request: None,
        }
    }

    /// Wrap a key in a delete request.
    #[must_use]
    pub fn delete(key: Key) -> Self {
        Self {
            put_request: None,
            delete_request: Some(DeleteRequest { key }),
        }
    }
}

/// A request to put an item within a `BatchWriteItem` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    /// The item attributes to put.
    pub item: HashMap<String, AttributeValue>,
}

/// A request to delete an item within a `BatchWriteItem` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    /// The primary key of the item to delete.
    pub key: HashMap<String, AttributeValue>,
}

// ---------------------------------------------------------------------------
// Type aliases for common item shapes
// ---------------------------------------------------------------------------

/// An item represented as a map of attribute names to values.
pub type Item = HashMap<String, AttributeValue>;

/// A key represented as a map of key attribute names to values.
pub type Key = HashMap<String, AttributeValue>;

/// Expression attribute names mapping (`#name` placeholders to attribute names).
pub type ExpressionAttributeNames = HashMap<String, String>;

/// Expression attribute values mapping (`:value` placeholders to attribute values).
pub type ExpressionAttributeValues = HashMap<String, AttributeValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_serialize_key_schema_element() {
        let json = serde_json::to_string(&KeySchemaElement::hash("pk")).unwrap();
        assert_eq!(json, r#"{"AttributeName":"pk","KeyType":"HASH"}"#);
    }

    #[test]
    fn test_should_deserialize_describe_table_payload() {
        let json = r#"{
            "TableName": "notifications",
            "KeySchema": [
                {"AttributeName": "pk", "KeyType": "HASH"},
                {"AttributeName": "sk", "KeyType": "RANGE"}
            ],
            "GlobalSecondaryIndexes": [{
                "IndexName": "gsi0",
                "KeySchema": [
                    {"AttributeName": "gsi0_pk", "KeyType": "HASH"},
                    {"AttributeName": "gsi0_sk", "KeyType": "RANGE"}
                ],
                "IndexStatus": "ACTIVE"
            }],
            "TableStatus": "ACTIVE"
        }"#;
        let desc: TableDescription = serde_json::from_str(json).unwrap();
        assert_eq!(desc.table_name.as_deref(), Some("notifications"));
        assert_eq!(desc.key_schema[1].key_type, KeyType::Range);
        assert_eq!(desc.global_secondary_indexes[0].key_schema.len(), 2);
        assert!(desc.local_secondary_indexes.is_empty());
    }

    #[test]
    fn test_should_build_exclusive_write_requests() {
        let put = WriteRequest::put(Item::new());
        assert!(put.put_request.is_some() && put.delete_request.is_none());
        let json = serde_json::to_string(&WriteRequest::delete(Key::new())).unwrap();
        assert_eq!(json, r#"{"DeleteRequest":{"Key":{}}}"#);
    }
}
