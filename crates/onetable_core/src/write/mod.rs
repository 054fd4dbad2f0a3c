//! Write path: document assembly and commit coordination.
//!
//! # Responsibility
//! - Turn pending changes into wire items.
//! - Submit them as batch or transactional writes.
//!
//! # Invariants
//! - Changes are accepted only after every store call of a commit succeeded.
//! - Atomic commits never exceed `TableConfig::max_transaction_items`; the
//!   limit is checked before the store is contacted.
//! - Store errors are returned unchanged; nothing here retries.

pub mod assembler;
pub mod coordinator;

use crate::store::StoreError;
use crate::tracking::TrackingError;
use thiserror::Error;

pub use assembler::{AssemblyError, DocumentAssembler};
pub use coordinator::{CommitMode, CommitOutcome, WriteCoordinator};

pub type WriteResult<T> = Result<T, WriteError>;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("transaction has {items} items; at most {max} are allowed")]
    TransactionTooLarge { items: usize, max: usize },
}

impl WriteError {
    /// Optimistic-lock conflict or duplicate key in an atomic commit.
    pub fn is_conditional_check_failure(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conditional_check_failure())
    }
}
