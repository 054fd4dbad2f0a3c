//! Table-level configuration.
//!
//! # Responsibility
//! - Name the physical table and the attributes keys are written to.
//! - Bound batch and transaction request sizes.
//!
//! # Invariants
//! - A validated config has non-empty attribute names, unique index names,
//!   at most 20 indexes and non-zero request bounds.

use crate::schema::MAX_INDEXES_PER_TABLE;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PARTITION_KEY_ATTRIBUTE: &str = "PartitionKey";
pub const DEFAULT_SORT_KEY_ATTRIBUTE: &str = "SortKey";
pub const DEFAULT_VERSION_ATTRIBUTE: &str = "Version";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;
pub const DEFAULT_MAX_TRANSACTION_ITEMS: usize = 100;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid table config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("table config field `{0}` cannot be empty")]
    EmptyField(&'static str),
    #[error("index `{0}` is configured more than once")]
    DuplicateIndex(String),
    #[error("{configured} indexes configured; at most {max} are allowed")]
    TooManyIndexes { configured: usize, max: usize },
    #[error("table config bound `{0}` must be greater than zero")]
    ZeroBound(&'static str),
}

/// Attribute names of one global secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub partition_key_attribute: String,
    pub sort_key_attribute: String,
}

/// Physical table description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub table_name: String,
    pub partition_key_attribute: String,
    pub sort_key_attribute: String,
    pub version_attribute: String,
    pub indexes: Vec<IndexConfig>,
    pub max_batch_size: usize,
    pub max_transaction_items: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            partition_key_attribute: DEFAULT_PARTITION_KEY_ATTRIBUTE.to_string(),
            sort_key_attribute: DEFAULT_SORT_KEY_ATTRIBUTE.to_string(),
            version_attribute: DEFAULT_VERSION_ATTRIBUTE.to_string(),
            indexes: Vec::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_transaction_items: DEFAULT_MAX_TRANSACTION_ITEMS,
        }
    }
}

impl TableConfig {
    /// Creates a config with default attribute names.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON config; missing fields take defaults.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_index(
        mut self,
        name: impl Into<String>,
        partition_key_attribute: impl Into<String>,
        sort_key_attribute: impl Into<String>,
    ) -> Self {
        self.indexes.push(IndexConfig {
            name: name.into(),
            partition_key_attribute: partition_key_attribute.into(),
            sort_key_attribute: sort_key_attribute.into(),
        });
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let required = [
            ("table_name", &self.table_name),
            ("partition_key_attribute", &self.partition_key_attribute),
            ("sort_key_attribute", &self.sort_key_attribute),
            ("version_attribute", &self.version_attribute),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBound("max_batch_size"));
        }
        if self.max_transaction_items == 0 {
            return Err(ConfigError::ZeroBound("max_transaction_items"));
        }
        if self.indexes.len() > MAX_INDEXES_PER_TABLE {
            return Err(ConfigError::TooManyIndexes {
                configured: self.indexes.len(),
                max: MAX_INDEXES_PER_TABLE,
            });
        }
        for (position, index) in self.indexes.iter().enumerate() {
            if index.name.trim().is_empty() {
                return Err(ConfigError::EmptyField("indexes.name"));
            }
            if self.indexes[..position]
                .iter()
                .any(|other| other.name == index.name)
            {
                return Err(ConfigError::DuplicateIndex(index.name.clone()));
            }
        }
        Ok(())
    }

    /// Partition/sort attribute names for an index.
    ///
    /// Unconfigured indexes default to `<Index>PK` / `<Index>SK`.
    pub fn index_attributes(&self, index_name: &str) -> (String, String) {
        match self.indexes.iter().find(|index| index.name == index_name) {
            Some(index) => (
                index.partition_key_attribute.clone(),
                index.sort_key_attribute.clone(),
            ),
            None => (format!("{index_name}PK"), format!("{index_name}SK")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, TableConfig};

    #[test]
    fn json_config_fills_defaults() {
        let config = TableConfig::from_json_str(
            r#"{"table_name": "app", "indexes": [
                {"name": "GSI1", "partition_key_attribute": "GSI1PK", "sort_key_attribute": "GSI1SK"}
            ]}"#,
        )
        .expect("config should parse");

        assert_eq!(config.table_name, "app");
        assert_eq!(config.partition_key_attribute, "PartitionKey");
        assert_eq!(config.sort_key_attribute, "SortKey");
        assert_eq!(config.max_batch_size, 25);
        assert_eq!(
            config.index_attributes("GSI1"),
            ("GSI1PK".to_string(), "GSI1SK".to_string())
        );
        assert_eq!(
            config.index_attributes("ByStatus"),
            ("ByStatusPK".to_string(), "ByStatusSK".to_string())
        );
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let empty = TableConfig::default().validate();
        assert!(matches!(empty, Err(ConfigError::EmptyField("table_name"))));

        let duplicate = TableConfig::new("app")
            .with_index("GSI1", "a", "b")
            .with_index("GSI1", "c", "d")
            .validate();
        assert!(matches!(duplicate, Err(ConfigError::DuplicateIndex(_))));

        let mut zero = TableConfig::new("app");
        zero.max_batch_size = 0;
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::ZeroBound("max_batch_size"))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = TableConfig::from_json_str("{").expect_err("broken json");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
