//! Single-table persistence core.
//!
//! Maps aggregate objects onto one partition/sort-key addressed table:
//! declarative key schemas, a change tracker, a query compiler and a write
//! coordinator, tied together by [`TableContext`].

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod schema;
pub mod service;
pub mod store;
pub mod tracking;
pub mod write;

pub use config::{ConfigError, IndexConfig, TableConfig};
pub use error::{Error, Result};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::document::{date_format, Document, MapperError, Value};
pub use model::entity::{Entity, Tracked};
pub use query::{attr, EnumType, Predicate, QueryCompilationError, QueryError, SortKeyOperator};
pub use schema::entity_schema::{EntitySchema, RelationKind};
pub use schema::registry::SchemaRegistry;
pub use schema::SchemaError;
pub use service::{QueryBuilder, TableContext};
pub use store::{StoreClient, StoreError, StoreErrorKind};
pub use tracking::{ChangeSet, ChangeTracker, EntityState, TrackingError};
pub use write::{CommitMode, CommitOutcome, WriteError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
