//! Request and response shapes exchanged with the store client.

use crate::model::document::{Document, Value};
use indexmap::IndexMap;

/// One page request of a parameterized statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Statement text with positional `?` placeholders.
    pub statement: String,
    /// One value per placeholder, in placeholder order.
    pub parameters: Vec<Value>,
    pub limit: Option<u32>,
    pub consistent_read: bool,
    pub next_token: Option<String>,
}

/// One page of statement results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Document>,
    pub next_token: Option<String>,
}

/// Unconditional item write used by batch requests.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put { item: Document },
    Delete { key: Document },
}

/// Store answer to a batch request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutput {
    /// Requests the store did not apply; detecting them is the caller's job.
    pub unprocessed: Vec<WriteRequest>,
}

/// Write operation carried by a transactional item.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactOperation {
    Put {
        item: Document,
    },
    Update {
        key: Document,
        update_expression: String,
    },
    Delete {
        key: Document,
    },
}

/// One item of an all-or-nothing transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactItem {
    pub table_name: String,
    pub operation: TransactOperation,
    pub condition_expression: Option<String>,
    /// `#name` placeholder to attribute name.
    pub expression_names: IndexMap<String, String>,
    /// `:value` placeholder to value.
    pub expression_values: Document,
}

/// All-or-nothing write request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactWriteRequest {
    /// Idempotency token; retries of the same request reuse it.
    pub client_request_token: String,
    pub items: Vec<TransactItem>,
}
