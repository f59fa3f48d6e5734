//! Table operations for one object type.
//!
//! A [`Table`] pairs a store client with an [`ObjectSchema`] and turns
//! records and conditions into store requests. Only the paginated query and
//! batch-get paths retry; every other store error is returned unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use dynamap_model::Key;
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput,
};
use dynamap_model::output::{BatchWriteItemOutput, QueryOutput};
use dynamap_model::types::{KeysAndAttributes, WriteRequest};

use crate::client::StoreClient;
use crate::codec;
use crate::config::MapperConfig;
use crate::error::{MapperError, MapperResult};
use crate::expression::{Attr, Condition, ExpressionKind, compile};
use crate::record::Record;
use crate::schema::ObjectSchema;
use crate::update::build_update;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Query request & results
// ---------------------------------------------------------------------------

/// Parameters of a query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Condition on the index key, over logical names.
    pub key_condition: Condition,
    /// Optional filter applied after the key condition.
    pub filter: Option<Condition>,
    /// Explicit index; resolved from the key condition when `None`.
    pub index: Option<String>,
    /// Page size; the configured default when `None`.
    pub limit: Option<i32>,
    /// Continuation key from a previous page.
    pub start_key: Option<Key>,
    /// Traverse the index in ascending order.
    pub scan_forward: bool,
}

impl QueryRequest {
    /// A query over `key_condition`.
    #[must_use]
    pub fn new(key_condition: Condition) -> Self {
        Self {
            key_condition,
            filter: None,
            index: None,
            limit: None,
            start_key: None,
            scan_forward: true,
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Query a specific index.
    #[must_use]
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume after `key`.
    #[must_use]
    pub fn start_key(mut self, key: Key) -> Self {
        self.start_key = Some(key);
        self
    }

    /// Traverse in descending order.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.scan_forward = false;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryResults {
    /// Records in index order.
    pub items: Vec<Record>,
    /// Continuation key; `None` when the query is exhausted.
    pub last_key: Option<Key>,
    /// Items returned.
    pub count: i32,
    /// Items evaluated before the filter.
    pub scanned_count: i32,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Store operations for one object type.
#[derive(Debug)]
pub struct Table<C: ?Sized> {
    client: Arc<C>,
    schema: Arc<ObjectSchema>,
    config: MapperConfig,
}

impl<C: StoreClient + ?Sized> Table<C> {
    /// Create a table with the default configuration.
    #[must_use]
    pub fn new(client: Arc<C>, schema: Arc<ObjectSchema>) -> Self {
        Self {
            client,
            schema,
            config: MapperConfig::default(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: MapperConfig) -> Self {
        self.config = config;
        self
    }

    /// The object schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<ObjectSchema> {
        &self.schema
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Construct a new record of this table's type.
    ///
    /// # Errors
    ///
    /// See [`Record::new`].
    pub fn record<I, K, V>(&self, inputs: I) -> MapperResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Record::new(Arc::clone(&self.schema), inputs)
    }

    /// Build a primary key from stored key values.
    ///
    /// # Errors
    ///
    /// - [`MapperError::MissingKeyValue`] if the table has a sort key and
    ///   `sort` is `None`.
    /// - [`MapperError::InvalidKeyCondition`] if `sort` is given for a table
    ///   without a sort key.
    pub fn key(&self, partition: impl Into<Value>, sort: Option<Value>) -> MapperResult<Key> {
        let primary = &self.schema.primary_binding().index;
        let mut key = HashMap::with_capacity(2);
        key.insert(
            primary.partition_attribute.clone(),
            codec::serialize(&partition.into())?,
        );
        match (&primary.sort_attribute, sort) {
            (Some(attr), Some(value)) => {
                key.insert(attr.clone(), codec::serialize(&value)?);
            }
            (Some(attr), None) => return Err(MapperError::MissingKeyValue(attr.clone())),
            (None, Some(_)) => {
                return Err(MapperError::InvalidKeyCondition(format!(
                    "table '{}' has no sort key",
                    self.schema.table_name()
                )));
            }
            (None, None) => {}
        }
        Ok(key)
    }

    /// Read one record by primary key.
    ///
    /// # Errors
    ///
    /// Key errors from [`Table::key`], store errors unchanged, codec errors
    /// from decoding the item.
    pub async fn fetch(
        &self,
        partition: impl Into<Value>,
        sort: Option<Value>,
    ) -> MapperResult<Option<Record>> {
        let key = self.key(partition, sort)?;
        let output = self
            .client
            .get_item(GetItemInput {
                table_name: self.schema.table_name().to_owned(),
                key,
                consistent_read: None,
            })
            .await?;
        output
            .item
            .map(|item| Record::from_store(Arc::clone(&self.schema), &item))
            .transpose()
    }

    /// Compile a query request into store parameters.
    ///
    /// # Errors
    ///
    /// Compilation errors from the key condition or filter.
    pub fn query_input(&self, request: &QueryRequest) -> MapperResult<QueryInput> {
        let key = compile(
            &self.schema,
            &request.key_condition,
            ExpressionKind::KeyCondition,
            request.index.as_deref(),
        )?;
        match &key.index_name {
            Some(index) => tracing::info!("querying with index `{index}`"),
            None => tracing::info!("querying with table index"),
        }

        let mut input = QueryInput {
            table_name: self.schema.table_name().to_owned(),
            index_name: key.index_name.clone(),
            limit: Some(request.limit.unwrap_or(self.config.default_query_limit)),
            scan_index_forward: (!request.scan_forward).then_some(false),
            exclusive_start_key: request.start_key.clone().unwrap_or_default(),
            ..QueryInput::default()
        };
        key.merge_into(
            &mut input.expression_attribute_names,
            &mut input.expression_attribute_values,
        );
        input.key_condition_expression = Some(key.text);

        if let Some(filter) = &request.filter {
            let filter = compile(&self.schema, filter, ExpressionKind::Filter, None)?;
            filter.merge_into(
                &mut input.expression_attribute_names,
                &mut input.expression_attribute_values,
            );
            input.filter_expression = Some(filter.text);
        }
        Ok(input)
    }

    /// Run one query page and return the store's response untouched.
    ///
    /// # Errors
    ///
    /// Compilation errors, or the store error unchanged.
    pub async fn query_raw(&self, request: &QueryRequest) -> MapperResult<QueryOutput> {
        let input = self.query_input(request)?;
        Ok(self.client.query(input).await?)
    }

    /// Run one query page.
    ///
    /// # Errors
    ///
    /// See [`Table::query_raw`]; codec errors from decoding items.
    pub async fn query(&self, request: &QueryRequest) -> MapperResult<QueryResults> {
        let output = self.query_raw(request).await?;
        self.page_results(output)
    }

    /// Run a query to exhaustion, following continuation keys and keeping
    /// the store's page order. Throttled pages are retried with backoff.
    ///
    /// # Errors
    ///
    /// Compilation and codec errors; store errors that are not retryable or
    /// persist past `max_retries`.
    pub async fn query_all(&self, request: &QueryRequest) -> MapperResult<Vec<Record>> {
        let mut input = self.query_input(request)?;
        let mut records = Vec::new();
        loop {
            let output = self.query_page(input.clone()).await?;
            let page = self.page_results(output)?;
            records.extend(page.items);
            match page.last_key {
                Some(key) => input.exclusive_start_key = key,
                None => break,
            }
        }
        Ok(records)
    }

    async fn query_page(&self, input: QueryInput) -> MapperResult<QueryOutput> {
        let mut attempt = 0;
        loop {
            match self.client.query(input.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "query page throttled, retrying");
                    tokio::time::sleep(self.config.retry_delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn page_results(&self, output: QueryOutput) -> MapperResult<QueryResults> {
        let items = output
            .items
            .iter()
            .map(|item| Record::from_store(Arc::clone(&self.schema), item))
            .collect::<MapperResult<Vec<_>>>()?;
        Ok(QueryResults {
            items,
            last_key: (!output.last_evaluated_key.is_empty()).then_some(output.last_evaluated_key),
            count: output.count,
            scanned_count: output.scanned_count,
        })
    }

    /// Write `record` in full.
    ///
    /// With `fail_on_exists`, `attribute_not_exists` guards on the primary
    /// key attributes are prepended to `condition`, so saving over an
    /// existing item fails with the store's condition-check error.
    ///
    /// # Errors
    ///
    /// Compilation and codec errors; store errors unchanged.
    pub async fn save(
        &self,
        record: &Record,
        condition: Option<&Condition>,
        fail_on_exists: bool,
    ) -> MapperResult<()> {
        let guard = fail_on_exists.then(|| {
            let primary = &self.schema.primary_binding().index;
            primary
                .key_attributes()
                .map(|k| Attr::new(k).not_exists())
                .reduce(Condition::and)
        });
        let condition = match (guard.flatten(), condition) {
            (Some(guard), Some(user)) => Some(guard.and(user.clone())),
            (Some(guard), None) => Some(guard),
            (None, user) => user.cloned(),
        };

        let mut input = PutItemInput {
            table_name: self.schema.table_name().to_owned(),
            item: record.to_item()?,
            ..PutItemInput::default()
        };
        if let Some(condition) = &condition {
            let compiled = compile(&self.schema, condition, ExpressionKind::WriteCondition, None)?;
            compiled.merge_into(
                &mut input.expression_attribute_names,
                &mut input.expression_attribute_values,
            );
            input.condition_expression = Some(compiled.text);
        }
        self.client.put_item(input).await?;
        Ok(())
    }

    /// Write the attributes `record` changed since its snapshot.
    ///
    /// Returns `None` without contacting the store when nothing changed.
    /// The snapshot is not refreshed; reload the record to track further
    /// changes from the stored state.
    ///
    /// # Errors
    ///
    /// [`MapperError::ImmutableKeyUpdate`] if a primary key attribute
    /// changed; compilation and codec errors; store errors unchanged.
    pub async fn update<'r>(
        &self,
        record: &'r Record,
        condition: Option<&Condition>,
    ) -> MapperResult<Option<&'r Record>> {
        let Some(input) = build_update(record, condition)? else {
            return Ok(None);
        };
        self.client.update_item(input).await?;
        Ok(Some(record))
    }

    /// Delete `record` by its primary key.
    ///
    /// # Errors
    ///
    /// [`MapperError::MissingKeyValue`] without a primary key; store errors
    /// unchanged.
    pub async fn delete(&self, record: &Record) -> MapperResult<()> {
        self.client
            .delete_item(DeleteItemInput {
                table_name: self.schema.table_name().to_owned(),
                key: record.primary_key()?,
                ..DeleteItemInput::default()
            })
            .await?;
        Ok(())
    }

    /// Read many records by primary key.
    ///
    /// Keys are sent in chunks of `batch_get_chunk_size`. Unprocessed keys
    /// and throttled requests are resubmitted with exponential backoff.
    ///
    /// # Errors
    ///
    /// [`MapperError::BatchRetriesExhausted`] when keys remain after
    /// `max_retries` resubmissions; other store errors unchanged.
    pub async fn batch_get(&self, keys: Vec<Key>) -> MapperResult<Vec<Record>> {
        let chunk_size = self.config.batch_get_chunk_size.max(1);
        let mut records = Vec::with_capacity(keys.len());
        let mut keys = keys.into_iter().peekable();
        while keys.peek().is_some() {
            let chunk: Vec<Key> = keys.by_ref().take(chunk_size).collect();
            self.batch_get_chunk(chunk, &mut records).await?;
        }
        Ok(records)
    }

    async fn batch_get_chunk(&self, mut pending: Vec<Key>, out: &mut Vec<Record>) -> MapperResult<()> {
        let table = self.schema.table_name();
        let mut attempt = 0;
        loop {
            let input = BatchGetItemInput {
                request_items: HashMap::from([(
                    table.to_owned(),
                    KeysAndAttributes {
                        keys: pending.clone(),
                        ..KeysAndAttributes::default()
                    },
                )]),
            };
            match self.client.batch_get_item(input).await {
                Ok(mut output) => {
                    for item in output.responses.remove(table).unwrap_or_default() {
                        out.push(Record::from_store(Arc::clone(&self.schema), &item)?);
                    }
                    pending = output
                        .unprocessed_keys
                        .remove(table)
                        .map(|k| k.keys)
                        .unwrap_or_default();
                    if pending.is_empty() {
                        return Ok(());
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, "batch get throttled");
                }
                Err(e) => return Err(e.into()),
            }

            if attempt >= self.config.max_retries {
                return Err(MapperError::BatchRetriesExhausted {
                    attempts: attempt + 1,
                    remaining: pending.len(),
                });
            }
            attempt += 1;
            tracing::warn!(
                attempt,
                remaining = pending.len(),
                "retrying unprocessed batch get keys"
            );
            tokio::time::sleep(self.config.retry_delay(attempt)).await;
        }
    }

    /// Pass caller-built write requests to the store unchanged.
    ///
    /// # Errors
    ///
    /// Store errors unchanged.
    pub async fn batch_write(
        &self,
        requests: Vec<WriteRequest>,
    ) -> MapperResult<BatchWriteItemOutput> {
        let output = self
            .client
            .batch_write_item(BatchWriteItemInput {
                request_items: HashMap::from([(self.schema.table_name().to_owned(), requests)]),
            })
            .await?;
        Ok(output)
    }
}
