//! Key schema registry shared by tracker, assembler and query layers.

use crate::model::entity::Entity;
use crate::schema::entity_schema::EntitySchema;
use crate::schema::{SchemaError, SchemaResult, MAX_INDEXES_PER_TABLE};
use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;

/// Registration-time table of entity schemas.
///
/// Built once at startup, then shared read-only behind an `Arc`.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<&'static str, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one schema.
    ///
    /// Relation targets must be registered first (leaf-first order).
    pub fn register(&mut self, schema: EntitySchema) -> SchemaResult<()> {
        let type_name = schema.type_name();
        if self.schemas.contains_key(type_name) {
            return Err(SchemaError::DuplicateSchema { type_name });
        }
        if schema.indexes().len() > MAX_INDEXES_PER_TABLE {
            return Err(SchemaError::TooManyIndexes {
                type_name,
                declared: schema.indexes().len(),
                max: MAX_INDEXES_PER_TABLE,
            });
        }
        for relation in schema.relations() {
            if !self.schemas.contains_key(relation.target()) {
                return Err(SchemaError::RelationTargetNotRegistered {
                    type_name,
                    relation: relation.name().to_string(),
                    target: relation.target(),
                });
            }
        }

        debug!(
            "event=schema_register module=schema status=ok type={} relations={} indexes={}",
            type_name,
            schema.relations().len(),
            schema.indexes().len()
        );
        self.schemas.insert(type_name, Arc::new(schema));
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> SchemaResult<Arc<EntitySchema>> {
        self.schemas
            .get(type_name)
            .cloned()
            .ok_or_else(|| SchemaError::SchemaNotFound {
                type_name: type_name.to_string(),
            })
    }

    pub fn get_for<T: Entity>(&self) -> SchemaResult<Arc<EntitySchema>> {
        self.get(T::TYPE_NAME)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered type names in registration order.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.schemas.keys().copied().collect()
    }
}
