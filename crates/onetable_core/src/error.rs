//! Crate-level error for callers that do not care which layer failed.

use crate::config::ConfigError;
use crate::logging::LoggingError;
use crate::model::document::MapperError;
use crate::query::{QueryCompilationError, QueryError};
use crate::schema::SchemaError;
use crate::store::StoreError;
use crate::tracking::TrackingError;
use crate::write::WriteError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QueryCompilationError> for Error {
    fn from(err: QueryCompilationError) -> Self {
        Self::Query(QueryError::Compilation(err))
    }
}

impl Error {
    /// Store-level conditional check failure, wherever it surfaced.
    pub fn is_conditional_check_failure(&self) -> bool {
        match self {
            Self::Store(err) => err.is_conditional_check_failure(),
            Self::Write(err) => err.is_conditional_check_failure(),
            Self::Query(QueryError::Store(err)) => err.is_conditional_check_failure(),
            _ => false,
        }
    }
}
