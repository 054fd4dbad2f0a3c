//! Store client boundary.
//!
//! # Responsibility
//! - Define the asynchronous contract the core consumes from the wire client.
//! - Define the store error surface propagated to callers.
//!
//! # Invariants
//! - The core never retries, backs off or times out store calls; every
//!   `StoreError` reaches the caller unchanged.
//! - Conditional-check failures are the only signal for optimistic-lock
//!   conflicts and duplicate keys.
//! - Dropping a returned future cancels the underlying call.

mod request;

use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub use request::{
    BatchWriteOutput, QueryPage, QueryRequest, TransactItem, TransactOperation,
    TransactWriteRequest, WriteRequest,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification of store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// A write condition did not hold; nothing in the request was applied
    /// for transactional writes.
    ConditionalCheckFailed,
    Throttled,
    Network,
    Other,
}

impl Display for StoreErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ConditionalCheckFailed => "conditional_check_failed",
            Self::Throttled => "throttled",
            Self::Network => "network",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Failure reported by a store client.
#[derive(Debug, Error)]
#[error("store error ({kind}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::ConditionalCheckFailed, message)
    }

    pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_conditional_check_failure(&self) -> bool {
        self.kind == StoreErrorKind::ConditionalCheckFailed
    }
}

/// Wire client for the partition/sort-key store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Executes one page of a parameterized statement.
    async fn execute_query(&self, request: QueryRequest) -> StoreResult<QueryPage>;

    /// Best-effort batch write; partial application is possible.
    async fn batch_write(
        &self,
        table_name: &str,
        requests: Vec<WriteRequest>,
    ) -> StoreResult<BatchWriteOutput>;

    /// All-or-nothing conditional write.
    async fn transact_write(&self, request: TransactWriteRequest) -> StoreResult<()>;
}
