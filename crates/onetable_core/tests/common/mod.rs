#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use onetable_core::store::{
    BatchWriteOutput, QueryPage, QueryRequest, StoreResult, TransactWriteRequest, WriteRequest,
};
use onetable_core::{
    Document, EntitySchema, EnumType, SchemaRegistry, StoreClient, StoreError, StoreErrorKind,
    TableConfig, TableContext, Tracked,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

pub const TABLE: &str = "shop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Shipped,
    Cancelled,
}

pub const ORDER_STATUS: EnumType = EnumType::new(
    "OrderStatus",
    &[("Pending", 0), ("Shipped", 1), ("Cancelled", 2)],
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

impl onetable_core::Entity for Customer {
    const TYPE_NAME: &'static str = "Customer";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: String,
    pub sku: String,
    pub quantity: u32,
}

impl onetable_core::Entity for OrderLine {
    const TYPE_NAME: &'static str = "OrderLine";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub status: OrderStatus,
    pub total: i64,
    #[serde(with = "onetable_core::date_format")]
    pub placed_at: DateTime<FixedOffset>,
    pub note: Option<String>,
    #[serde(default)]
    pub lines: Vec<Tracked<OrderLine>>,
}

impl onetable_core::Entity for Order {
    const TYPE_NAME: &'static str = "Order";
}

pub fn placed_at() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
        .single()
        .unwrap()
}

pub fn customer(id: &str, name: &str) -> Tracked<Customer> {
    Tracked::new(Customer {
        id: id.to_string(),
        name: name.to_string(),
        email: None,
    })
}

pub fn order(id: &str, customer_id: &str) -> Tracked<Order> {
    Tracked::new(Order {
        id: id.to_string(),
        customer_id: customer_id.to_string(),
        status: OrderStatus::Pending,
        total: 0,
        placed_at: placed_at(),
        note: None,
        lines: Vec::new(),
    })
}

pub fn line(id: &str, sku: &str, quantity: u32) -> Tracked<OrderLine> {
    Tracked::new(OrderLine {
        id: id.to_string(),
        sku: sku.to_string(),
        quantity,
    })
}

pub fn registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntitySchema::builder::<Customer>()
                .identity("id")
                .partition_key("id", "CUSTOMER")
                .sort_key("id", "CUSTOMER")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntitySchema::builder::<OrderLine>()
                .identity("id")
                .sort_key("id", "LINE")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntitySchema::builder::<Order>()
                .identity("id")
                .partition_key("id", "ORDER")
                .sort_key("id", "ORDER")
                .index("ByCustomer", |ix| {
                    ix.partition_key("customer_id", "CUSTOMER")
                        .sort_key("placed_at", "DATE")
                })
                .has_many::<OrderLine>("lines", |o| &o.lines, |o| &mut o.lines)
                .optimistic_locking(true)
                .build()
                .unwrap(),
        )
        .unwrap();
    Arc::new(registry)
}

pub fn table_config() -> TableConfig {
    TableConfig::new(TABLE).with_index("ByCustomer", "GSI1PK", "GSI1SK")
}

pub fn context(store: &Arc<MockStore>) -> TableContext {
    context_with(store, table_config())
}

pub fn context_with(store: &Arc<MockStore>, config: TableConfig) -> TableContext {
    let store: Arc<dyn StoreClient> = store.clone();
    TableContext::new(store, registry(), config).unwrap()
}

pub fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

/// Scripted in-memory store: queued query pages, recorded write calls.
#[derive(Default)]
pub struct MockStore {
    pages: Mutex<VecDeque<StoreResult<QueryPage>>>,
    queries: Mutex<Vec<QueryRequest>>,
    batches: Mutex<Vec<(String, Vec<WriteRequest>)>>,
    transactions: Mutex<Vec<TransactWriteRequest>>,
    unprocessed: Mutex<VecDeque<Vec<WriteRequest>>>,
    write_failure: Mutex<Option<StoreErrorKind>>,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, items: Vec<Document>, next_token: Option<&str>) {
        self.pages.lock().push_back(Ok(QueryPage {
            items,
            next_token: next_token.map(str::to_string),
        }));
    }

    pub fn push_query_error(&self, kind: StoreErrorKind) {
        self.pages
            .lock()
            .push_back(Err(StoreError::new(kind, "scripted query failure")));
    }

    /// Unprocessed requests returned by the next batch call.
    pub fn push_unprocessed(&self, requests: Vec<WriteRequest>) {
        self.unprocessed.lock().push_back(requests);
    }

    pub fn fail_writes(&self, kind: StoreErrorKind) {
        *self.write_failure.lock() = Some(kind);
    }

    pub fn heal(&self) {
        *self.write_failure.lock() = None;
    }

    pub fn queries(&self) -> Vec<QueryRequest> {
        self.queries.lock().clone()
    }

    pub fn batches(&self) -> Vec<(String, Vec<WriteRequest>)> {
        self.batches.lock().clone()
    }

    pub fn transactions(&self) -> Vec<TransactWriteRequest> {
        self.transactions.lock().clone()
    }

    fn write_result(&self) -> StoreResult<()> {
        match *self.write_failure.lock() {
            Some(kind) => Err(StoreError::new(kind, "scripted write failure")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreClient for MockStore {
    async fn execute_query(&self, request: QueryRequest) -> StoreResult<QueryPage> {
        self.queries.lock().push(request);
        self.pages
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryPage::default()))
    }

    async fn batch_write(
        &self,
        table_name: &str,
        requests: Vec<WriteRequest>,
    ) -> StoreResult<BatchWriteOutput> {
        self.batches.lock().push((table_name.to_string(), requests));
        self.write_result()?;
        Ok(BatchWriteOutput {
            unprocessed: self.unprocessed.lock().pop_front().unwrap_or_default(),
        })
    }

    async fn transact_write(&self, request: TransactWriteRequest) -> StoreResult<()> {
        self.transactions.lock().push(request);
        self.write_result()
    }
}
