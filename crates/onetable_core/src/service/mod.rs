//! Session-level services.

pub mod table_context;

pub use table_context::{QueryBuilder, TableContext};
