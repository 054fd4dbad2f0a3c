//! Key schema declarations, registry and key building.
//!
//! # Responsibility
//! - Declare how each entity type maps onto the shared table's keys.
//! - Build composite partition/sort/GSI keys from documents.
//!
//! # Invariants
//! - Schemas are created at startup and never mutated afterwards.
//! - Schema errors are fatal and surface at registration time.
//!
//! # See also
//! - `crate::write::assembler` for how keys land in stored items.

pub mod entity_schema;
pub mod key_builder;
pub mod path;
pub mod registry;

use thiserror::Error;

/// Maximum number of global secondary indexes on one table.
pub const MAX_INDEXES_PER_TABLE: usize = 20;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Schema declaration and lookup errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No schema registered under this type name.
    #[error("no schema registered for entity type `{type_name}`")]
    SchemaNotFound { type_name: String },
    /// A declaration did not name an identity property.
    #[error("entity type `{type_name}` declares no identity property")]
    MissingIdentity { type_name: &'static str },
    /// An access expression is not a supported member path.
    #[error("cannot derive a property path from `{expression}`")]
    PathNotFound { expression: String },
    /// A relation points at a type that is not registered yet.
    #[error("relation `{relation}` on `{type_name}` targets unregistered type `{target}`")]
    RelationTargetNotRegistered {
        type_name: &'static str,
        relation: String,
        target: &'static str,
    },
    #[error("entity type `{type_name}` is already registered")]
    DuplicateSchema { type_name: &'static str },
    #[error("entity type `{type_name}` declares {declared} indexes; at most {max} are allowed")]
    TooManyIndexes {
        type_name: &'static str,
        declared: usize,
        max: usize,
    },
}
