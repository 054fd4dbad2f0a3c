//! Unit-of-work change tracking.
//!
//! # Responsibility
//! - Own the set of tracked objects of one session.
//! - Detect scalar changes by snapshot diffing and reconcile relation
//!   collections of aggregate roots.
//! - Partition pending work into added, modified and deleted buckets.
//!
//! # Invariants
//! - At most one entry exists per (type, identity) pair.
//! - Parent links are keys, never owning references.
//! - Detection and acceptance take `&mut ChangeTracker`; they cannot race with
//!   `track`/`untrack`, which go through the entry map's lock.
//!
//! # See also
//! - `crate::write::coordinator` for the commit protocol built on top.

pub mod entry;
pub mod tracker;

use crate::model::document::MapperError;
use crate::schema::SchemaError;
use thiserror::Error;

pub use entry::{EntityState, EntryKey, EntrySummary, Identity};
pub use tracker::{ChangeSet, ChangeTracker, ParentDocument, PendingChange};

pub type TrackingResult<T> = Result<T, TrackingError>;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
    /// A parent link names an entry that is not tracked.
    #[error("parent entry `{parent}` is not tracked")]
    ParentNotTracked { parent: String },
}
