//! Shared fixtures: an in-memory store client that records every request.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Once};

use dynamap_core::schema::IndexBinding;
use dynamap_core::{Index, IndexCatalog, MapperConfig, ObjectSchema, StoreClient, Table};
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, DescribeTableInput, GetItemInput,
    PutItemInput, QueryInput, UpdateItemInput,
};
use dynamap_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, DescribeTableOutput,
    GetItemOutput, PutItemOutput, QueryOutput, UpdateItemOutput,
};
use dynamap_model::types::{KeysAndAttributes, TableDescription};
use dynamap_model::{Item, Key, StoreError};
use parking_lot::Mutex;

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

#[derive(Debug, Default)]
pub struct State {
    pub items: Vec<Item>,
    pub puts: Vec<PutItemInput>,
    pub updates: Vec<UpdateItemInput>,
    pub deletes: Vec<DeleteItemInput>,
    pub queries: Vec<QueryInput>,
    pub batch_gets: Vec<BatchGetItemInput>,
    pub batch_writes: Vec<BatchWriteItemInput>,
    /// Scripted query responses, served before falling back to a full scan.
    pub query_script: VecDeque<Result<QueryOutput, StoreError>>,
    /// Batch-get calls that fail with a throttling error.
    pub batch_get_throttles: u32,
    /// Batch-get calls that leave their last key unprocessed.
    pub batch_get_unprocessed_rounds: u32,
    pub table: Option<TableDescription>,
}

/// In-memory store keyed by the attributes in `key_attributes`.
#[derive(Debug)]
pub struct MemoryStore {
    key_attributes: Vec<String>,
    pub state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(key_attributes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            key_attributes: key_attributes.iter().map(|s| (*s).to_owned()).collect(),
            state: Mutex::new(State::default()),
        })
    }

    fn matches(&self, item: &Item, key: &Key) -> bool {
        self.key_attributes
            .iter()
            .all(|k| item.get(k).is_some() && item.get(k) == key.get(k))
    }

    fn position(&self, state: &State, key: &Key) -> Option<usize> {
        state.items.iter().position(|i| self.matches(i, key))
    }

    fn key_of(&self, item: &Item) -> Key {
        self.key_attributes
            .iter()
            .filter_map(|k| item.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    fn upsert(&self, state: &mut State, item: Item) {
        let key = self.key_of(&item);
        match self.position(state, &key) {
            Some(pos) => state.items[pos] = item,
            None => state.items.push(item),
        }
    }

    pub fn insert(&self, item: Item) {
        let mut state = self.state.lock();
        self.upsert(&mut state, item);
    }

    pub fn item(&self, key: &Key) -> Option<Item> {
        let state = self.state.lock();
        self.position(&state, key).map(|p| state.items[p].clone())
    }
}

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, StoreError> {
        let state = self.state.lock();
        let item = self.position(&state, &input.key).map(|p| state.items[p].clone());
        Ok(GetItemOutput { item })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, StoreError> {
        let mut state = self.state.lock();
        let key = self.key_of(&input.item);
        let guarded = input
            .condition_expression
            .as_deref()
            .is_some_and(|c| c.contains("attribute_not_exists"));
        if guarded && self.position(&state, &key).is_some() {
            return Err(StoreError::conditional_check_failed(
                "The conditional request failed",
            ));
        }
        self.upsert(&mut state, input.item.clone());
        state.puts.push(input);
        Ok(PutItemOutput::default())
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, StoreError> {
        let mut state = self.state.lock();
        if let Some(pos) = self.position(&state, &input.key) {
            let expr = input.update_expression.clone().unwrap_or_default();
            let (set, remove) = match expr.split_once(" REMOVE ") {
                Some((s, r)) => (s.to_owned(), Some(r.to_owned())),
                None if expr.starts_with("REMOVE ") => {
                    (String::new(), Some(expr["REMOVE ".len()..].to_owned()))
                }
                None => (expr, None),
            };
            let names = &input.expression_attribute_names;
            let values = &input.expression_attribute_values;
            if let Some(actions) = set.strip_prefix("SET ") {
                for action in actions.split(", ") {
                    if let Some((n, v)) = action.split_once(" = ") {
                        state.items[pos].insert(names[n].clone(), values[v].clone());
                    }
                }
            }
            for n in remove.iter().flat_map(|r| r.split(", ")) {
                state.items[pos].remove(&names[n]);
            }
        }
        state.updates.push(input);
        Ok(UpdateItemOutput::default())
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, StoreError> {
        let mut state = self.state.lock();
        if let Some(pos) = self.position(&state, &input.key) {
            state.items.remove(pos);
        }
        state.deletes.push(input);
        Ok(DeleteItemOutput::default())
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, StoreError> {
        let mut state = self.state.lock();
        state.queries.push(input);
        if let Some(scripted) = state.query_script.pop_front() {
            return scripted;
        }
        let items = state.items.clone();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let count = items.len() as i32;
        Ok(QueryOutput {
            items,
            count,
            scanned_count: count,
            last_evaluated_key: HashMap::new(),
        })
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, StoreError> {
        let mut state = self.state.lock();
        state.batch_gets.push(input.clone());
        if state.batch_get_throttles > 0 {
            state.batch_get_throttles -= 1;
            return Err(StoreError::throttled("Rate exceeded"));
        }
        let mut output = BatchGetItemOutput::default();
        for (table, request) in input.request_items {
            let mut keys = request.keys;
            if state.batch_get_unprocessed_rounds > 0 && !keys.is_empty() {
                state.batch_get_unprocessed_rounds -= 1;
                let last = keys.split_off(keys.len() - 1);
                output.unprocessed_keys.insert(
                    table.clone(),
                    KeysAndAttributes {
                        keys: last,
                        ..KeysAndAttributes::default()
                    },
                );
            }
            let found = keys
                .iter()
                .filter_map(|k| self.position(&state, k).map(|p| state.items[p].clone()))
                .collect();
            output.responses.insert(table, found);
        }
        Ok(output)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, StoreError> {
        let mut state = self.state.lock();
        for requests in input.request_items.values() {
            for request in requests {
                if let Some(put) = &request.put_request {
                    self.upsert(&mut state, put.item.clone());
                }
                if let Some(delete) = &request.delete_request {
                    if let Some(pos) = self.position(&state, &delete.key) {
                        state.items.remove(pos);
                    }
                }
            }
        }
        state.batch_writes.push(input);
        Ok(BatchWriteItemOutput::default())
    }

    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, StoreError> {
        let state = self.state.lock();
        match &state.table {
            Some(table) => Ok(DescribeTableOutput {
                table: Some(table.clone()),
            }),
            None => Err(StoreError::resource_not_found(format!(
                "Requested resource not found: Table: {} not found",
                input.table_name
            ))),
        }
    }
}

/// Notifications keyed by account and time, with a GSI by notification type
/// and an LSI over the joined `typeDate` attribute.
pub fn notification_schema(store_aliases: bool) -> Arc<ObjectSchema> {
    let catalog = IndexCatalog::new(vec![
        Index::primary("pk", Some("sk")),
        Index::global_secondary("gsi0", "gsi0_pk", Some("gsi0_sk")),
        Index::local_secondary("lsi0", "lsi0_sk"),
    ])
    .unwrap();
    ObjectSchema::builder("notifications", Arc::new(catalog))
        .attributes(["accountId", "notificationType", "dateTime", "message", "status"])
        .required(["accountId", "dateTime"])
        .join("typeDate", ["notificationType", "dateTime"])
        .bind(
            IndexBinding::new("table")
                .partition("accountId")
                .sort("dateTime"),
        )
        .bind(
            IndexBinding::new("gsi0")
                .partition("notificationType")
                .sort("dateTime"),
        )
        .bind(IndexBinding::new("lsi0").sort("typeDate"))
        .immutable(["accountId"])
        .store_aliases(store_aliases)
        .build()
        .unwrap()
}

pub fn notification_table(store: &Arc<MemoryStore>) -> Table<MemoryStore> {
    init_tracing();
    Table::new(Arc::clone(store), notification_schema(true)).with_config(MapperConfig {
        retry_base_delay_ms: 1,
        ..MapperConfig::default()
    })
}
