//! The store client the mapper talks to.
//!
//! The trait uses `#[async_trait]` so it stays object-safe: a table can hold
//! an `Arc<dyn StoreClient>` as easily as a concrete client.

use dynamap_model::StoreError;
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, DescribeTableInput, GetItemInput,
    PutItemInput, QueryInput, UpdateItemInput,
};
use dynamap_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, DescribeTableOutput,
    GetItemOutput, PutItemOutput, QueryOutput, UpdateItemOutput,
};

/// Operations the mapper issues against a DynamoDB-style store.
///
/// Implementations report failures as [`StoreError`]s; the mapper never
/// rewrites them.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// Read one item by primary key.
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, StoreError>;

    /// Write one item.
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, StoreError>;

    /// Partially update one item.
    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, StoreError>;

    /// Delete one item.
    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, StoreError>;

    /// Query one page of an index.
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, StoreError>;

    /// Read up to 100 items by key.
    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, StoreError>;

    /// Write up to 25 put/delete requests.
    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, StoreError>;

    /// Describe a table's key schema and indexes.
    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, StoreError>;
}
