mod common;

use common::{context, context_with, customer, doc, line, order, table_config, MockStore, OrderStatus};
use onetable_core::store::{TransactOperation, WriteRequest};
use onetable_core::{CommitMode, EntityState, StoreErrorKind, WriteError};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn atomic_commit_writes_conditional_puts_for_new_aggregate() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    let o1 = order("o1", "c1");
    o1.write().lines.push(line("l1", "SKU-1", 2));
    o1.write().lines.push(line("l2", "SKU-2", 1));
    ctx.add(&o1).unwrap();

    let outcome = ctx.save_changes_atomic().await.unwrap();
    assert_eq!(outcome.mode, CommitMode::Atomic);
    assert_eq!(outcome.added, 3);
    assert!(outcome.is_complete());

    let transactions = store.transactions();
    assert_eq!(transactions.len(), 1);
    let request = &transactions[0];
    assert!(Uuid::parse_str(&request.client_request_token).is_ok());
    assert_eq!(request.items.len(), 3);

    let root = &request.items[0];
    assert_eq!(root.table_name, "shop");
    assert_eq!(
        root.condition_expression.as_deref(),
        Some("attribute_not_exists(#pk) AND attribute_not_exists(#sk)")
    );
    let TransactOperation::Put { item } = &root.operation else {
        panic!("expected put, got {:?}", root.operation);
    };
    assert_eq!(item["PartitionKey"], "ORDER#o1");
    assert_eq!(item["SortKey"], "ORDER#o1");
    assert_eq!(item["GSI1PK"], "CUSTOMER#c1");
    assert_eq!(item["GSI1SK"], "DATE#2024-05-01T09:30:00.0000000+01:00");
    assert_eq!(item["Version"], 1);
    assert!(!item.contains_key("lines"));
    assert!(!item.contains_key("note"));

    let TransactOperation::Put { item: member } = &request.items[1].operation else {
        panic!("expected member put");
    };
    assert_eq!(member["PartitionKey"], "ORDER#o1");
    assert_eq!(member["SortKey"], "LINE#l1");
    assert!(!member.contains_key("Version"));

    assert_eq!(ctx.state(&o1).unwrap(), Some(EntityState::Unchanged));
    assert_eq!(ctx.tracker().entry(&o1).unwrap().unwrap().version, Some(1));
    assert!(ctx.pending_changes().unwrap().is_empty());
}

#[tokio::test]
async fn failed_atomic_commit_keeps_changes_pending() {
    let store = MockStore::new();
    store.fail_writes(StoreErrorKind::ConditionalCheckFailed);
    let mut ctx = context(&store);
    let o1 = order("o1", "c1");
    o1.write().lines.push(line("l1", "SKU-1", 1));
    ctx.add(&o1).unwrap();

    let err = ctx.save_changes_atomic().await.unwrap_err();
    assert!(err.is_conditional_check_failure());
    assert_eq!(ctx.state(&o1).unwrap(), Some(EntityState::Added));
    assert_eq!(ctx.pending_changes().unwrap().added.len(), 2);

    store.heal();
    let outcome = ctx.save_changes_atomic().await.unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(store.transactions().len(), 2);
    assert_eq!(ctx.state(&o1).unwrap(), Some(EntityState::Unchanged));
}

#[tokio::test]
async fn atomic_update_sends_changed_fields_and_checks_version() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    let o1 = order("o1", "c1");
    ctx.add(&o1).unwrap();
    ctx.save_changes_atomic().await.unwrap();

    o1.write().status = OrderStatus::Shipped;
    let outcome = ctx.save_changes_atomic().await.unwrap();
    assert_eq!(outcome.modified, 1);

    let transactions = store.transactions();
    let update = &transactions[1].items[0];
    let TransactOperation::Update {
        key,
        update_expression,
    } = &update.operation
    else {
        panic!("expected update, got {:?}", update.operation);
    };
    assert_eq!(
        key,
        &doc(json!({"PartitionKey": "ORDER#o1", "SortKey": "ORDER#o1"}))
    );
    assert_eq!(update_expression, "SET #n1 = :v0, #ver = #ver + :v1");
    assert_eq!(update.expression_names["#n1"], "status");
    assert_eq!(update.expression_names["#ver"], "Version");
    assert_eq!(update.expression_values[":v0"], "Shipped");
    assert_eq!(
        update.condition_expression.as_deref(),
        Some("attribute_exists(#pk) AND #ver = :v2")
    );
    assert_eq!(update.expression_values[":v2"], 1);
    assert_eq!(ctx.tracker().entry(&o1).unwrap().unwrap().version, Some(2));
}

#[tokio::test]
async fn atomic_delete_of_aggregate_deletes_members() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    let o1 = order("o1", "c1");
    o1.write().lines.push(line("l1", "SKU-1", 1));
    ctx.attach(&o1).unwrap();

    ctx.remove(&o1).unwrap();
    let outcome = ctx.save_changes_atomic().await.unwrap();
    assert_eq!(outcome.deleted, 2);

    let items = &store.transactions()[0].items;
    for item in items {
        assert!(matches!(item.operation, TransactOperation::Delete { .. }));
        assert_eq!(
            item.condition_expression.as_deref(),
            Some("attribute_exists(#pk)")
        );
    }
    let TransactOperation::Delete { key } = &items[1].operation else {
        panic!("expected delete");
    };
    assert_eq!(key["SortKey"], "LINE#l1");
    assert!(ctx.tracker().is_empty());
}

#[tokio::test]
async fn oversized_transaction_is_rejected_before_the_store() {
    let store = MockStore::new();
    let mut config = table_config();
    config.max_transaction_items = 2;
    let mut ctx = context_with(&store, config);
    for n in 0..3 {
        ctx.add(&customer(&format!("c{n}"), "Someone")).unwrap();
    }

    let err = ctx.save_changes_atomic().await.unwrap_err();
    assert!(matches!(
        err,
        WriteError::TransactionTooLarge { items: 3, max: 2 }
    ));
    assert!(store.transactions().is_empty());
    assert_eq!(ctx.pending_changes().unwrap().added.len(), 3);
}

#[tokio::test]
async fn batch_commit_chunks_requests_and_reports_unprocessed() {
    let store = MockStore::new();
    let mut config = table_config();
    config.max_batch_size = 2;
    let mut ctx = context_with(&store, config);
    let customers: Vec<_> = (0..5)
        .map(|n| customer(&format!("c{n}"), "Someone"))
        .collect();
    for c in &customers {
        ctx.add(c).unwrap();
    }
    let leftover = WriteRequest::Put {
        item: doc(json!({"PartitionKey": "CUSTOMER#c0", "SortKey": "CUSTOMER#c0"})),
    };
    store.push_unprocessed(vec![leftover.clone()]);

    let outcome = ctx.save_changes().await.unwrap();
    assert_eq!(outcome.mode, CommitMode::BestEffort);
    assert_eq!(outcome.added, 5);
    assert_eq!(outcome.unprocessed, vec![leftover]);
    assert!(!outcome.is_complete());

    let batches = store.batches();
    let sizes: Vec<usize> = batches.iter().map(|(_, requests)| requests.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(batches.iter().all(|(table, _)| table == "shop"));
    assert!(store.transactions().is_empty());
    assert!(customers
        .iter()
        .all(|c| ctx.state(c).unwrap() == Some(EntityState::Unchanged)));
}

#[tokio::test]
async fn batch_commit_mixes_puts_and_deletes() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    let alice = customer("c1", "Alice");
    let bob = customer("c2", "Bob");
    ctx.attach(&alice).unwrap();
    ctx.attach(&bob).unwrap();

    alice.write().email = Some("alice@example.com".to_string());
    ctx.remove(&bob).unwrap();
    let outcome = ctx.save_changes().await.unwrap();
    assert_eq!((outcome.added, outcome.modified, outcome.deleted), (0, 1, 1));

    let (_, requests) = &store.batches()[0];
    assert_eq!(
        requests[0],
        WriteRequest::Put {
            item: doc(json!({
                "PartitionKey": "CUSTOMER#c1",
                "SortKey": "CUSTOMER#c1",
                "id": "c1",
                "name": "Alice",
                "email": "alice@example.com"
            })),
        }
    );
    assert_eq!(
        requests[1],
        WriteRequest::Delete {
            key: doc(json!({"PartitionKey": "CUSTOMER#c2", "SortKey": "CUSTOMER#c2"})),
        }
    );
    assert_eq!(ctx.tracker().len(), 1);
}

#[tokio::test]
async fn failed_batch_commit_is_not_accepted() {
    let store = MockStore::new();
    store.fail_writes(StoreErrorKind::Network);
    let mut ctx = context(&store);
    let alice = customer("c1", "Alice");
    ctx.add(&alice).unwrap();

    let err = ctx.save_changes().await.unwrap_err();
    assert!(matches!(err, WriteError::Store(ref store_err) if store_err.kind == StoreErrorKind::Network));
    assert!(!err.is_conditional_check_failure());
    assert_eq!(ctx.state(&alice).unwrap(), Some(EntityState::Added));
}

#[tokio::test]
async fn empty_commit_does_not_touch_the_store() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    ctx.attach(&customer("c1", "Alice")).unwrap();

    let outcome = ctx.commit(CommitMode::Atomic).await.unwrap();
    assert_eq!((outcome.added, outcome.modified, outcome.deleted), (0, 0, 0));
    assert!(store.transactions().is_empty());
    assert!(store.batches().is_empty());
}

#[tokio::test]
async fn moved_line_is_rewritten_under_its_new_order() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    let o1 = order("o1", "c1");
    let o2 = order("o2", "c1");
    let l1 = line("l1", "SKU-1", 1);
    o1.write().lines.push(l1.clone());
    ctx.attach(&o1).unwrap();
    ctx.attach(&o2).unwrap();

    o1.write().lines.clear();
    o2.write().lines.push(l1.clone());
    let outcome = ctx.save_changes_atomic().await.unwrap();
    assert_eq!((outcome.added, outcome.modified, outcome.deleted), (1, 0, 1));

    let items = &store.transactions()[0].items;
    assert_eq!(items.len(), 2);
    let TransactOperation::Put { item } = &items[0].operation else {
        panic!("expected put, got {:?}", items[0].operation);
    };
    assert_eq!(item["PartitionKey"], "ORDER#o2");
    assert_eq!(item["SortKey"], "LINE#l1");
    assert_eq!(item["sku"], "SKU-1");
    let TransactOperation::Delete { key } = &items[1].operation else {
        panic!("expected delete, got {:?}", items[1].operation);
    };
    assert_eq!(
        key,
        &doc(json!({"PartitionKey": "ORDER#o1", "SortKey": "LINE#l1"}))
    );
    assert_eq!(ctx.state(&l1).unwrap(), Some(EntityState::Unchanged));
    assert!(ctx.pending_changes().unwrap().is_empty());
}

#[tokio::test]
async fn update_of_tracked_object_writes_only_its_diff() {
    let store = MockStore::new();
    let mut ctx = context(&store);
    let alice = customer("c1", "Alice");
    let bob = customer("c2", "Bob");
    ctx.attach(&alice).unwrap();
    ctx.attach(&bob).unwrap();

    ctx.update(&alice).unwrap();
    ctx.update(&bob).unwrap();
    alice.write().email = Some("alice@example.com".to_string());
    let outcome = ctx.save_changes_atomic().await.unwrap();
    assert_eq!(outcome.modified, 2);

    let items = &store.transactions()[0].items;
    assert_eq!(items.len(), 1);
    let TransactOperation::Update {
        update_expression, ..
    } = &items[0].operation
    else {
        panic!("expected update, got {:?}", items[0].operation);
    };
    assert_eq!(update_expression, "SET #n1 = :v0");
    assert_eq!(items[0].expression_names["#n1"], "email");
    assert_eq!(
        items[0].condition_expression.as_deref(),
        Some("attribute_exists(#pk)")
    );
}
