//! Query path: predicate AST, statement compilation, pagination and
//! rehydration.
//!
//! # Responsibility
//! - Compile key conditions and filters into parameterized statements.
//! - Page through results sequentially and turn items back into tracked
//!   objects.
//!
//! # Invariants
//! - A missing partition key fails before any store call.
//! - Pages are requested one after another; each request carries the
//!   previous continuation token.
//!
//! # See also
//! - `crate::service::table_context::QueryBuilder` for the typed facade.

pub mod compiler;
pub mod executor;
pub mod predicate;

use crate::model::document::MapperError;
use crate::schema::SchemaError;
use crate::store::StoreError;
use crate::tracking::TrackingError;
use thiserror::Error;

pub use compiler::{
    compile_predicate, compile_query, CompiledStatement, QueryCompilationError, QuerySpec,
    SortKeyCondition, SortKeyOperator,
};
pub use predicate::{attr, ComparisonOp, EnumType, Membership, Operand, Predicate};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Compilation(#[from] QueryCompilationError),
    #[error("query on table `{table}` has no partition key value")]
    MissingPartitionKey { table: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
