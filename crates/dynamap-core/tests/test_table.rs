//! Table operations against an in-memory store.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{MemoryStore, notification_table};
use dynamap_core::{
    Attr, IndexCatalog, Key, MapperConfig, MapperError, QueryRequest, Record, Table, Value,
};
use dynamap_model::output::QueryOutput;
use dynamap_model::types::{KeySchemaElement, SecondaryIndexDescription, TableDescription};
use dynamap_model::{AttributeValue, Item, StoreError, StoreErrorCode};

fn notification(table: &Table<MemoryStore>, account: &str, at: &str, kind: &str) -> Record {
    table
        .record([
            ("accountId", account),
            ("dateTime", at),
            ("notificationType", kind),
            ("message", "hello"),
        ])
        .unwrap()
}

fn store() -> Arc<MemoryStore> {
    MemoryStore::new(&["pk", "sk"])
}

#[tokio::test]
async fn test_should_save_and_fetch_record() {
    let store = store();
    let table = notification_table(&store);
    let record = notification(&table, "acc-1", "2024-05-01T10:00", "alert");
    table.save(&record, None, true).await.unwrap();

    let fetched = table
        .fetch("acc-1", Some(Value::from("2024-05-01T10:00")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.get("message"), Some(&Value::from("hello")));
    assert_eq!(
        fetched.get("typeDate"),
        Some(&Value::from("alert~2024-05-01T10:00"))
    );
    assert_eq!(fetched.get("lsi0_sk"), fetched.get("typeDate"));
    assert!(!fetched.has_changed());

    let stored = store.item(&record.primary_key().unwrap()).unwrap();
    assert_eq!(stored["gsi0_pk"], AttributeValue::s("alert"));
    assert_eq!(stored["accountId"], AttributeValue::s("acc-1"));
}

#[tokio::test]
async fn test_should_return_none_for_missing_item() {
    let store = store();
    let table = notification_table(&store);
    let fetched = table
        .fetch("nobody", Some(Value::from("never")))
        .await
        .unwrap();
    assert!(fetched.is_none());
}

#[tokio::test]
async fn test_should_require_sort_value_on_fetch() {
    let store = store();
    let table = notification_table(&store);
    let err = table.fetch("acc-1", None).await.unwrap_err();
    assert!(matches!(err, MapperError::MissingKeyValue(k) if k == "sk"));
}

#[tokio::test]
async fn test_should_surface_condition_failure_on_existing_item() {
    let store = store();
    let table = notification_table(&store);
    let record = notification(&table, "acc-1", "t0", "alert");
    table.save(&record, None, true).await.unwrap();

    let err = table.save(&record, None, true).await.unwrap_err();
    let store_err = err.as_store_error().unwrap();
    assert_eq!(store_err.code, StoreErrorCode::ConditionalCheckFailedException);
    assert_eq!(store_err.message, "The conditional request failed");

    let state = store.state.lock();
    let condition = state.puts[0].condition_expression.as_deref().unwrap();
    assert_eq!(
        condition,
        "(attribute_not_exists(#condition_attribute_name0) AND \
         attribute_not_exists(#condition_attribute_name1))"
    );
    assert_eq!(
        state.puts[0].expression_attribute_names["#condition_attribute_name0"],
        "pk"
    );
}

#[tokio::test]
async fn test_should_overwrite_without_guard() {
    let store = store();
    let table = notification_table(&store);
    let mut record = notification(&table, "acc-1", "t0", "alert");
    table.save(&record, None, true).await.unwrap();
    record.set("message", "changed").unwrap();
    table.save(&record, None, false).await.unwrap();

    let state = store.state.lock();
    assert!(state.puts[1].condition_expression.is_none());
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0]["message"], AttributeValue::s("changed"));
}

#[tokio::test]
async fn test_should_prepend_guard_to_user_condition() {
    let store = store();
    let table = notification_table(&store);
    let record = notification(&table, "acc-1", "t0", "alert");
    let user = Attr::new("status").ne("archived");
    table.save(&record, Some(&user), true).await.unwrap();

    let state = store.state.lock();
    let put = &state.puts[0];
    assert_eq!(
        put.condition_expression.as_deref(),
        Some(
            "((attribute_not_exists(#condition_attribute_name0) AND \
             attribute_not_exists(#condition_attribute_name1)) AND \
             #condition_attribute_name2 <> :condition_attribute_value0)"
        )
    );
    assert_eq!(put.expression_attribute_names["#condition_attribute_name2"], "status");
}

#[tokio::test]
async fn test_should_skip_update_without_changes() {
    let store = store();
    let table = notification_table(&store);
    let record = notification(&table, "acc-1", "t0", "alert");
    table.save(&record, None, true).await.unwrap();

    assert!(table.update(&record, None).await.unwrap().is_none());
    assert!(store.state.lock().updates.is_empty());
}

#[tokio::test]
async fn test_should_update_changed_attributes() {
    let store = store();
    let table = notification_table(&store);
    table
        .save(&notification(&table, "acc-1", "t0", "alert"), None, true)
        .await
        .unwrap();

    let mut record = table
        .fetch("acc-1", Some(Value::from("t0")))
        .await
        .unwrap()
        .unwrap();
    record.set("notificationType", "info").unwrap();
    record.unset("message").unwrap();

    let updated = table.update(&record, None).await.unwrap();
    assert!(updated.is_some());

    let stored = store.item(&record.primary_key().unwrap()).unwrap();
    assert_eq!(stored["notificationType"], AttributeValue::s("info"));
    assert_eq!(stored["gsi0_pk"], AttributeValue::s("info"));
    assert_eq!(stored["typeDate"], AttributeValue::s("info~t0"));
    assert_eq!(stored["lsi0_sk"], AttributeValue::s("info~t0"));
    assert!(!stored.contains_key("message"));

    // The snapshot still reflects the loaded state.
    assert!(record.has_changed());
}

#[tokio::test]
async fn test_should_reject_primary_key_update() {
    let store = store();
    let table = notification_table(&store);
    let mut record = notification(&table, "acc-1", "t0", "alert");
    table.save(&record, None, true).await.unwrap();
    record.set("dateTime", "t1").unwrap();

    let err = table.update(&record, None).await.unwrap_err();
    assert!(matches!(err, MapperError::ImmutableKeyUpdate { .. }));
    assert!(store.state.lock().updates.is_empty());

    let err = record.set("accountId", "acc-2").unwrap_err();
    assert!(matches!(err, MapperError::ImmutableKeyUpdate { .. }));
}

#[tokio::test]
async fn test_should_delete_record() {
    let store = store();
    let table = notification_table(&store);
    let record = notification(&table, "acc-1", "t0", "alert");
    table.save(&record, None, true).await.unwrap();
    table.delete(&record).await.unwrap();
    assert!(store.state.lock().items.is_empty());
}

#[tokio::test]
async fn test_should_compile_query_with_default_limit() {
    let store = store();
    let table = notification_table(&store);
    table
        .save(&notification(&table, "acc-1", "t0", "alert"), None, true)
        .await
        .unwrap();

    let request = QueryRequest::new(Key::new("accountId").eq("acc-1")).reverse();
    let results = table.query(&request).await.unwrap();
    assert_eq!(results.items.len(), 1);
    assert_eq!(results.count, 1);
    assert!(results.last_key.is_none());

    let state = store.state.lock();
    let input = &state.queries[0];
    assert_eq!(input.limit, Some(1000));
    assert_eq!(input.scan_index_forward, Some(false));
    assert_eq!(input.index_name, None);
    assert_eq!(
        input.key_condition_expression.as_deref(),
        Some("#key_name0 = :key_value0")
    );
    assert_eq!(input.expression_attribute_names["#key_name0"], "pk");
}

#[tokio::test]
async fn test_should_resolve_lsi_for_joined_sort_key() {
    let store = store();
    let table = notification_table(&store);
    let request = QueryRequest::new(
        Key::new("accountId").eq("acc-1") & Key::new("typeDate").begins_with("alert~"),
    )
    .limit(10);
    table.query_raw(&request).await.unwrap();

    let state = store.state.lock();
    let input = &state.queries[0];
    assert_eq!(input.index_name.as_deref(), Some("lsi0"));
    assert_eq!(input.limit, Some(10));
    assert_eq!(input.expression_attribute_names["#key_name0"], "pk");
    assert_eq!(input.expression_attribute_names["#key_name1"], "lsi0_sk");
}

#[tokio::test]
async fn test_should_follow_pages_in_order() {
    let store = store();
    let table = notification_table(&store);

    let page = |ids: &[&str], last: Option<&str>| {
        let items: Vec<Item> = ids
            .iter()
            .map(|id| {
                HashMap::from([
                    ("pk".to_owned(), AttributeValue::s("acc-1")),
                    ("sk".to_owned(), AttributeValue::s(*id)),
                    ("accountId".to_owned(), AttributeValue::s("acc-1")),
                    ("dateTime".to_owned(), AttributeValue::s(*id)),
                ])
            })
            .collect();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let count = items.len() as i32;
        QueryOutput {
            items,
            count,
            scanned_count: count,
            last_evaluated_key: last
                .map(|l| {
                    HashMap::from([
                        ("pk".to_owned(), AttributeValue::s("acc-1")),
                        ("sk".to_owned(), AttributeValue::s(l)),
                    ])
                })
                .unwrap_or_default(),
        }
    };
    {
        let mut state = store.state.lock();
        state.query_script.push_back(Ok(page(&["t0", "t1"], Some("t1"))));
        state
            .query_script
            .push_back(Err(StoreError::throttled("slow down")));
        state.query_script.push_back(Ok(page(&["t2"], Some("t2"))));
        state.query_script.push_back(Ok(page(&[], None)));
    }

    let records = table
        .query_all(&QueryRequest::new(Key::new("accountId").eq("acc-1")))
        .await
        .unwrap();
    let order: Vec<_> = records
        .iter()
        .map(|r| r.get("dateTime").cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(
        order,
        vec![Value::from("t0"), Value::from("t1"), Value::from("t2")]
    );

    let state = store.state.lock();
    assert_eq!(state.queries.len(), 4);
    assert!(state.queries[0].exclusive_start_key.is_empty());
    assert_eq!(
        state.queries[1].exclusive_start_key["sk"],
        AttributeValue::s("t1")
    );
    assert_eq!(
        state.queries[3].exclusive_start_key["sk"],
        AttributeValue::s("t2")
    );
}

#[tokio::test]
async fn test_should_not_retry_non_retryable_query_errors() {
    let store = store();
    let table = notification_table(&store);
    store
        .state
        .lock()
        .query_script
        .push_back(Err(StoreError::validation("bad key")));
    let err = table
        .query_all(&QueryRequest::new(Key::new("accountId").eq("acc-1")))
        .await
        .unwrap_err();
    assert_eq!(
        err.as_store_error().map(|e| e.code),
        Some(StoreErrorCode::ValidationException)
    );
    assert_eq!(store.state.lock().queries.len(), 1);
}

#[tokio::test]
async fn test_should_batch_get_in_chunks_with_retries() {
    let store = store();
    let table = notification_table(&store).with_config(MapperConfig {
        batch_get_chunk_size: 2,
        retry_base_delay_ms: 1,
        ..MapperConfig::default()
    });
    let mut keys = Vec::new();
    for i in 0..5 {
        let record = notification(&table, "acc-1", &format!("t{i}"), "alert");
        table.save(&record, None, true).await.unwrap();
        keys.push(record.primary_key().unwrap());
    }
    {
        let mut state = store.state.lock();
        state.batch_get_throttles = 1;
        state.batch_get_unprocessed_rounds = 1;
    }

    let records = table.batch_get(keys).await.unwrap();
    assert_eq!(records.len(), 5);

    let state = store.state.lock();
    // throttled, partial, resubmitted remainder, then two more chunks
    assert_eq!(state.batch_gets.len(), 5);
    assert_eq!(state.batch_gets[2].request_items["notifications"].keys.len(), 1);
}

#[tokio::test]
async fn test_should_give_up_after_max_retries() {
    let store = store();
    let table = notification_table(&store).with_config(MapperConfig {
        max_retries: 2,
        retry_base_delay_ms: 1,
        ..MapperConfig::default()
    });
    let record = notification(&table, "acc-1", "t0", "alert");
    table.save(&record, None, true).await.unwrap();
    store.state.lock().batch_get_unprocessed_rounds = 10;

    let err = table
        .batch_get(vec![record.primary_key().unwrap()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MapperError::BatchRetriesExhausted {
            attempts: 3,
            remaining: 1
        }
    ));
}

#[tokio::test]
async fn test_should_pass_batch_writes_through() {
    let store = store();
    let table = notification_table(&store);
    let a = notification(&table, "acc-1", "t0", "alert");
    let b = notification(&table, "acc-1", "t1", "alert");
    table.save(&b, None, true).await.unwrap();

    table
        .batch_write(vec![
            a.to_put_request().unwrap(),
            b.to_delete_request().unwrap(),
        ])
        .await
        .unwrap();

    let state = store.state.lock();
    assert_eq!(state.batch_writes[0].request_items["notifications"].len(), 2);
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0]["sk"], AttributeValue::s("t0"));
}

#[tokio::test]
async fn test_should_load_catalog_from_store() {
    let store = store();
    store.state.lock().table = Some(TableDescription {
        table_name: Some("notifications".to_owned()),
        key_schema: vec![KeySchemaElement::hash("pk"), KeySchemaElement::range("sk")],
        global_secondary_indexes: vec![SecondaryIndexDescription {
            index_name: Some("gsi0".to_owned()),
            key_schema: vec![
                KeySchemaElement::hash("gsi0_pk"),
                KeySchemaElement::range("gsi0_sk"),
            ],
            item_count: None,
        }],
        local_secondary_indexes: Vec::new(),
        item_count: None,
    });

    let catalog = IndexCatalog::load(store.as_ref(), "notifications")
        .await
        .unwrap();
    assert_eq!(catalog.primary().partition_attribute, "pk");
    assert_eq!(catalog.get("gsi0").unwrap().sort_attribute.as_deref(), Some("gsi0_sk"));

    store.state.lock().table = None;
    let err = IndexCatalog::load(store.as_ref(), "missing").await.unwrap_err();
    assert_eq!(
        err.as_store_error().map(|e| e.code),
        Some(StoreErrorCode::ResourceNotFoundException)
    );
}
