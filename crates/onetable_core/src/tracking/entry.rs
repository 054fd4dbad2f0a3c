//! Tracked entry state and identity.

use super::tracker::ParentDocument;
use crate::model::document::{Document, MapperResult};
use crate::model::entity::{AnyTracked, Entity, Tracked};
use crate::schema::entity_schema::EntitySchema;
use indexmap::IndexMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Lifecycle state of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl Display for EntityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// Identity of a tracked object within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Rendered value of the schema identity property.
    Value(String),
    /// Handle address; used when the identity property is absent.
    Instance(usize),
}

/// Map key of a tracked entry: one entry per (type, identity).
///
/// Also serves as the non-owning parent back-reference of relation members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    type_name: &'static str,
    identity: Identity,
}

impl EntryKey {
    pub(crate) fn new(type_name: &'static str, identity: Identity) -> Self {
        Self {
            type_name,
            identity,
        }
    }

    pub(crate) fn resolve(
        schema: &EntitySchema,
        object: &dyn AnyTracked,
        document: &Document,
    ) -> Self {
        let identity = match schema.identity_value(document) {
            Some(value) => Identity::Value(value),
            None => Identity::Instance(object.instance_id()),
        };
        Self::new(schema.type_name(), identity)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Display for EntryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.identity {
            Identity::Value(value) => write!(f, "{}:{}", self.type_name, value),
            Identity::Instance(address) => write!(f, "{}:@{:x}", self.type_name, address),
        }
    }
}

/// Tracker bookkeeping for exactly one application object.
pub(crate) struct TrackedEntry {
    pub(crate) key: EntryKey,
    pub(crate) object: Box<dyn AnyTracked>,
    pub(crate) schema: Arc<EntitySchema>,
    pub(crate) state: EntityState,
    /// Document at last load or accepted commit, without relation properties.
    pub(crate) original: Option<Document>,
    /// Document computed by the latest detection pass.
    pub(crate) current: Option<Document>,
    pub(crate) modified_properties: Vec<String>,
    pub(crate) parent: Option<EntryKey>,
    /// Owner the stored item was last written under.
    pub(crate) persisted_parent: Option<EntryKey>,
    /// Owner of the stored item a move to another aggregate leaves behind.
    pub(crate) moved_from: Option<ParentDocument>,
    /// Membership recorded by the latest reconciliation, per relation.
    pub(crate) relation_snapshots: IndexMap<String, Vec<EntryKey>>,
    pub(crate) version: Option<i64>,
}

impl TrackedEntry {
    pub(crate) fn new(
        key: EntryKey,
        object: Box<dyn AnyTracked>,
        schema: Arc<EntitySchema>,
        state: EntityState,
    ) -> Self {
        Self {
            key,
            object,
            schema,
            state,
            original: None,
            current: None,
            modified_properties: Vec::new(),
            parent: None,
            persisted_parent: None,
            moved_from: None,
            relation_snapshots: IndexMap::new(),
            version: None,
        }
    }

    /// Serializes the object without its relation collections.
    pub(crate) fn scalar_document(&self) -> MapperResult<Document> {
        let document = self.object.to_document()?;
        Ok(crate::model::document::without_properties(
            document,
            self.schema.relation_names(),
        ))
    }

    /// Added and never snapshotted: nothing exists in the store yet.
    pub(crate) fn is_unsaved(&self) -> bool {
        self.state == EntityState::Added && self.original.is_none()
    }

    /// Saved member whose current owner differs from the one it is stored under.
    pub(crate) fn is_relocated(&self) -> bool {
        self.original.is_some()
            && self.persisted_parent.is_some()
            && self.persisted_parent != self.parent
    }

    pub(crate) fn downcast<T: Entity>(&self) -> Option<Tracked<T>> {
        self.object.as_any().downcast_ref::<Tracked<T>>().cloned()
    }

    pub(crate) fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key.clone(),
            state: self.state,
            modified_properties: self.modified_properties.clone(),
            parent: self.parent.clone(),
            version: self.version,
        }
    }
}

impl Debug for TrackedEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedEntry")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("modified_properties", &self.modified_properties)
            .field("parent", &self.parent)
            .field("persisted_parent", &self.persisted_parent)
            .field("version", &self.version)
            .finish()
    }
}

/// Read-only view of one tracked entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub key: EntryKey,
    pub state: EntityState,
    pub modified_properties: Vec<String>,
    pub parent: Option<EntryKey>,
    pub version: Option<i64>,
}
