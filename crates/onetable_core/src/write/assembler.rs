//! Document assembly for pending changes.
//!
//! # Responsibility
//! - Add primary key, secondary index and version attributes to entity
//!   documents.
//! - Produce unconditional batch writes and conditional transaction items.
//!
//! # Invariants
//! - Relation members take their partition key from the parent document.
//! - Sparse index attributes are omitted, never written empty.
//! - Conditional updates touch only changed fields and affected index
//!   attributes; with optimistic locking they raise the version by one.

use crate::config::TableConfig;
use crate::model::document::{Document, Value};
use crate::schema::entity_schema::IndexKey;
use crate::store::{TransactItem, TransactOperation, WriteRequest};
use crate::tracking::{EntityState, PendingChange};
use indexmap::IndexMap;
use thiserror::Error;

pub type AssemblyResult<T> = Result<T, AssemblyError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("entity `{entry}` produced an empty partition key")]
    MissingPartitionKey { entry: String },
    #[error("entity `{entry}` produced an empty sort key")]
    MissingSortKey { entry: String },
    /// A type without partition segments of its own was not tracked under a
    /// parent aggregate.
    #[error("entity `{entry}` needs a parent aggregate to build its partition key")]
    MissingParent { entry: String },
}

/// Builds wire items for one table.
#[derive(Debug, Clone, Copy)]
pub struct DocumentAssembler<'a> {
    config: &'a TableConfig,
}

impl<'a> DocumentAssembler<'a> {
    pub fn new(config: &'a TableConfig) -> Self {
        Self { config }
    }

    pub fn partition_key(&self, change: &PendingChange) -> AssemblyResult<String> {
        let own = change.schema.partition_key();
        let key = match &change.parent {
            Some(parent) if own.is_empty() => parent.schema.partition_key().build(&parent.document),
            Some(parent) => own.build(&parent.document),
            None if own.is_empty() => {
                return Err(AssemblyError::MissingParent {
                    entry: change.key.to_string(),
                })
            }
            None => own.build(&change.document),
        };
        if key.is_empty() {
            return Err(AssemblyError::MissingPartitionKey {
                entry: change.key.to_string(),
            });
        }
        Ok(key)
    }

    pub fn sort_key(&self, change: &PendingChange) -> AssemblyResult<String> {
        let key = change.schema.sort_key().build(&change.document);
        if key.is_empty() {
            return Err(AssemblyError::MissingSortKey {
                entry: change.key.to_string(),
            });
        }
        Ok(key)
    }

    /// Partition and sort key attributes only.
    pub fn primary_key(&self, change: &PendingChange) -> AssemblyResult<Document> {
        let mut key = Document::new();
        key.insert(
            self.config.partition_key_attribute.clone(),
            Value::String(self.partition_key(change)?),
        );
        key.insert(
            self.config.sort_key_attribute.clone(),
            Value::String(self.sort_key(change)?),
        );
        Ok(key)
    }

    /// Index attribute names with their values; `None` marks a sparse-absent
    /// key.
    pub fn index_attributes(&self, change: &PendingChange) -> Vec<(String, Option<String>)> {
        change
            .schema
            .indexes()
            .iter()
            .flat_map(|index| self.attributes_of(index, &change.document))
            .collect()
    }

    /// Complete item for a put.
    pub fn full_item(&self, change: &PendingChange) -> AssemblyResult<Document> {
        let mut item = self.primary_key(change)?;
        for (name, value) in &change.document {
            if !value.is_null() {
                item.insert(name.clone(), value.clone());
            }
        }
        for (attribute, value) in self.index_attributes(change) {
            if let Some(value) = value {
                item.insert(attribute, Value::String(value));
            }
        }
        if change.schema.optimistic_locking() {
            item.insert(
                self.config.version_attribute.clone(),
                Value::from(next_version(change.version)),
            );
        }
        Ok(item)
    }

    /// Unconditional batch write for a pending change.
    pub fn write_request(&self, change: &PendingChange) -> AssemblyResult<WriteRequest> {
        match change.state {
            EntityState::Deleted => Ok(WriteRequest::Delete {
                key: self.primary_key(change)?,
            }),
            _ => Ok(WriteRequest::Put {
                item: self.full_item(change)?,
            }),
        }
    }

    /// Conditional transaction item; `None` when a modified entry has nothing
    /// to write.
    pub fn transact_item(&self, change: &PendingChange) -> AssemblyResult<Option<TransactItem>> {
        let mut expression = ExpressionBuilder::default();
        let pk = expression.alias("#pk", &self.config.partition_key_attribute);
        let (operation, condition) = match change.state {
            EntityState::Added | EntityState::Unchanged => {
                let sk = expression.alias("#sk", &self.config.sort_key_attribute);
                (
                    TransactOperation::Put {
                        item: self.full_item(change)?,
                    },
                    format!("attribute_not_exists({pk}) AND attribute_not_exists({sk})"),
                )
            }
            EntityState::Deleted => (
                TransactOperation::Delete {
                    key: self.primary_key(change)?,
                },
                format!("attribute_exists({pk})"),
            ),
            EntityState::Modified => {
                let key = self.primary_key(change)?;
                let Some(update_expression) = self.update_expression(change, &mut expression)
                else {
                    return Ok(None);
                };
                let mut condition = format!("attribute_exists({pk})");
                if change.schema.optimistic_locking() {
                    let version = expression.alias("#ver", &self.config.version_attribute);
                    match change.version {
                        Some(expected) => {
                            let expected = expression.value(Value::from(expected));
                            condition.push_str(&format!(" AND {version} = {expected}"));
                        }
                        None => condition.push_str(&format!(" AND attribute_not_exists({version})")),
                    }
                }
                (
                    TransactOperation::Update {
                        key,
                        update_expression,
                    },
                    condition,
                )
            }
        };

        Ok(Some(TransactItem {
            table_name: self.config.table_name.clone(),
            operation,
            condition_expression: Some(condition),
            expression_names: expression.names,
            expression_values: expression.values,
        }))
    }

    fn update_expression(
        &self,
        change: &PendingChange,
        expression: &mut ExpressionBuilder,
    ) -> Option<String> {
        let mut sets: Vec<String> = Vec::new();
        let mut removes: Vec<String> = Vec::new();

        for property in &change.modified_properties {
            let name = expression.name(property);
            match change.document.get(property) {
                Some(value) if !value.is_null() => {
                    let placeholder = expression.value(value.clone());
                    sets.push(format!("{name} = {placeholder}"));
                }
                _ => removes.push(name),
            }
        }

        let touched = |index: &IndexKey| {
            index
                .partition_key()
                .source_properties()
                .chain(index.sort_key().source_properties())
                .any(|source| change.modified_properties.iter().any(|p| p == source))
        };
        for index in change.schema.indexes().iter().filter(|index| touched(*index)) {
            for (attribute, value) in self.attributes_of(index, &change.document) {
                let name = expression.name(&attribute);
                match value {
                    Some(value) => {
                        let placeholder = expression.value(Value::String(value));
                        sets.push(format!("{name} = {placeholder}"));
                    }
                    None => removes.push(name),
                }
            }
        }

        if change.schema.optimistic_locking() {
            let version = expression.alias("#ver", &self.config.version_attribute);
            let one = expression.value(Value::from(1));
            match change.version {
                Some(_) => sets.push(format!("{version} = {version} + {one}")),
                None => sets.push(format!("{version} = {one}")),
            }
        }

        if sets.is_empty() && removes.is_empty() {
            return None;
        }
        let mut clauses = Vec::new();
        if !sets.is_empty() {
            clauses.push(format!("SET {}", sets.join(", ")));
        }
        if !removes.is_empty() {
            clauses.push(format!("REMOVE {}", removes.join(", ")));
        }
        Some(clauses.join(" "))
    }

    fn attributes_of(&self, index: &IndexKey, document: &Document) -> [(String, Option<String>); 2] {
        let (pk_attribute, sk_attribute) = self.config.index_attributes(index.name());
        let non_empty = |key: String| (!key.is_empty()).then_some(key);
        [
            (pk_attribute, non_empty(index.partition_key().build(document))),
            (sk_attribute, non_empty(index.sort_key().build(document))),
        ]
    }
}

fn next_version(current: Option<i64>) -> i64 {
    current.unwrap_or(0) + 1
}

/// Allocates `#name` / `:value` placeholders for one expression set.
#[derive(Debug, Default)]
struct ExpressionBuilder {
    names: IndexMap<String, String>,
    values: Document,
}

impl ExpressionBuilder {
    fn alias(&mut self, alias: &str, attribute: &str) -> String {
        self.names.insert(alias.to_string(), attribute.to_string());
        alias.to_string()
    }

    fn name(&mut self, attribute: &str) -> String {
        if let Some((alias, _)) = self.names.iter().find(|(_, value)| *value == attribute) {
            return alias.clone();
        }
        let alias = format!("#n{}", self.names.len());
        self.names.insert(alias.clone(), attribute.to_string());
        alias
    }

    fn value(&mut self, value: Value) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
}
