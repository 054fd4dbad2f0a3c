//! Per-type key schema and its fluent declaration API.
//!
//! # Responsibility
//! - Describe identity, primary keys, GSI keys, relations and locking for one
//!   entity type.
//! - Build the typed accessor table (decoder and relation accessors) at
//!   declaration time so nothing is reflected at runtime.
//!
//! # Invariants
//! - A built schema is immutable and always has an identity path.
//! - Declaration errors are deferred to `build()`; the first one wins.
//! - Constant key segments exist only on secondary indexes.

use crate::model::document::{from_document, Document, MapperResult};
use crate::model::entity::{AnyTracked, Entity, Tracked};
use crate::schema::key_builder::{render_value, KeySpec};
use crate::schema::path::PropertyPath;
use crate::schema::{SchemaError, SchemaResult};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// Cardinality tag of a declared relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToMany,
    ManyToMany,
}

/// Reads and extends a relation collection on a type-erased owner.
pub(crate) trait RelationAccessor: Send + Sync {
    fn members(&self, owner: &dyn AnyTracked) -> Vec<Box<dyn AnyTracked>>;
    /// Adds `member` to the owner's collection unless already present.
    fn attach(&self, owner: &dyn AnyTracked, member: &dyn AnyTracked) -> bool;
}

struct TypedRelation<P, C> {
    get: fn(&P) -> &Vec<Tracked<C>>,
    get_mut: fn(&mut P) -> &mut Vec<Tracked<C>>,
}

impl<P: Entity, C: Entity> RelationAccessor for TypedRelation<P, C> {
    fn members(&self, owner: &dyn AnyTracked) -> Vec<Box<dyn AnyTracked>> {
        let Some(owner) = owner.as_any().downcast_ref::<Tracked<P>>() else {
            return Vec::new();
        };
        let guard = owner.read();
        (self.get)(&guard)
            .iter()
            .map(|member| Box::new(member.clone()) as Box<dyn AnyTracked>)
            .collect()
    }

    fn attach(&self, owner: &dyn AnyTracked, member: &dyn AnyTracked) -> bool {
        let (Some(owner), Some(member)) = (
            owner.as_any().downcast_ref::<Tracked<P>>(),
            member.as_any().downcast_ref::<Tracked<C>>(),
        ) else {
            return false;
        };
        let mut guard = owner.write();
        let collection = (self.get_mut)(&mut guard);
        if !collection.iter().any(|existing| existing.ptr_eq(member)) {
            collection.push(member.clone());
        }
        true
    }
}

/// Declared relation from an aggregate root to member entities.
#[derive(Clone)]
pub struct Relation {
    name: String,
    target: &'static str,
    kind: RelationKind,
    accessor: Arc<dyn RelationAccessor>,
}

impl Relation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the member entity.
    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub(crate) fn accessor(&self) -> &dyn RelationAccessor {
        self.accessor.as_ref()
    }
}

impl Debug for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Key declaration for one global secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexKey {
    name: String,
    partition_key: KeySpec,
    sort_key: KeySpec,
}

impl IndexKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_key(&self) -> &KeySpec {
        &self.partition_key
    }

    pub fn sort_key(&self) -> &KeySpec {
        &self.sort_key
    }
}

type Decoder = fn(Document) -> MapperResult<Box<dyn AnyTracked>>;

fn decode_tracked<T: Entity>(document: Document) -> MapperResult<Box<dyn AnyTracked>> {
    let value: T = from_document(T::TYPE_NAME, document)?;
    Ok(Box::new(Tracked::new(value)))
}

/// Immutable key schema for one entity type.
pub struct EntitySchema {
    type_name: &'static str,
    identity: PropertyPath,
    partition_key: KeySpec,
    sort_key: KeySpec,
    indexes: Vec<IndexKey>,
    relations: Vec<Relation>,
    optimistic_locking: bool,
    decoder: Decoder,
}

impl EntitySchema {
    /// Starts a declaration for `T`.
    pub fn builder<T: Entity>() -> EntitySchemaBuilder<T> {
        EntitySchemaBuilder::new()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn identity(&self) -> &PropertyPath {
        &self.identity
    }

    pub fn partition_key(&self) -> &KeySpec {
        &self.partition_key
    }

    pub fn sort_key(&self) -> &KeySpec {
        &self.sort_key
    }

    pub fn indexes(&self) -> &[IndexKey] {
        &self.indexes
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|relation| relation.name.as_str())
    }

    /// An aggregate root owns at least one relation collection.
    pub fn is_aggregate_root(&self) -> bool {
        !self.relations.is_empty()
    }

    pub fn optimistic_locking(&self) -> bool {
        self.optimistic_locking
    }

    /// Identity value rendered as text; `None` when the property is absent.
    pub fn identity_value(&self, document: &Document) -> Option<String> {
        self.identity.resolve(document).and_then(render_value)
    }

    pub(crate) fn decode(&self, document: Document) -> MapperResult<Box<dyn AnyTracked>> {
        (self.decoder)(document)
    }
}

impl Debug for EntitySchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySchema")
            .field("type_name", &self.type_name)
            .field("identity", &self.identity)
            .field("partition_key", &self.partition_key)
            .field("sort_key", &self.sort_key)
            .field("indexes", &self.indexes)
            .field("relations", &self.relations)
            .field("optimistic_locking", &self.optimistic_locking)
            .finish()
    }
}

/// Fluent declaration of an `EntitySchema`.
pub struct EntitySchemaBuilder<T> {
    identity: Option<PropertyPath>,
    partition_key: KeySpec,
    sort_key: KeySpec,
    indexes: Vec<IndexKey>,
    relations: Vec<Relation>,
    optimistic_locking: bool,
    error: Option<SchemaError>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> EntitySchemaBuilder<T> {
    fn new() -> Self {
        Self {
            identity: None,
            partition_key: KeySpec::new(),
            sort_key: KeySpec::new(),
            indexes: Vec::new(),
            relations: Vec::new(),
            optimistic_locking: false,
            error: None,
            _entity: PhantomData,
        }
    }

    /// Declares the identity property.
    pub fn identity(mut self, expression: &str) -> Self {
        if let Some(path) = self.parse(expression) {
            self.identity = Some(path);
        }
        self
    }

    /// Appends a partition key segment.
    pub fn partition_key(mut self, expression: &str, prefix: &str) -> Self {
        if let Some(path) = self.parse(expression) {
            self.partition_key.push_path(path, prefix);
        }
        self
    }

    /// Appends a sort key segment.
    pub fn sort_key(mut self, expression: &str, prefix: &str) -> Self {
        if let Some(path) = self.parse(expression) {
            self.sort_key.push_path(path, prefix);
        }
        self
    }

    /// Declares, or extends, a global secondary index.
    pub fn index(
        mut self,
        name: &str,
        declare: impl FnOnce(IndexKeyBuilder) -> IndexKeyBuilder,
    ) -> Self {
        let existing = self.indexes.iter().position(|index| index.name == name);
        let seed = match existing {
            Some(position) => self.indexes.remove(position),
            None => IndexKey {
                name: name.to_string(),
                ..IndexKey::default()
            },
        };
        let declared = declare(IndexKeyBuilder {
            index: seed,
            error: None,
        });
        if let Some(err) = declared.error {
            self.error.get_or_insert(err);
        }
        self.indexes.push(declared.index);
        self
    }

    /// Declares a one-to-many relation collection.
    pub fn has_many<C: Entity>(
        self,
        name: &str,
        get: fn(&T) -> &Vec<Tracked<C>>,
        get_mut: fn(&mut T) -> &mut Vec<Tracked<C>>,
    ) -> Self {
        self.relation(name, RelationKind::OneToMany, get, get_mut)
    }

    /// Declares a many-to-many relation collection.
    pub fn many_to_many<C: Entity>(
        self,
        name: &str,
        get: fn(&T) -> &Vec<Tracked<C>>,
        get_mut: fn(&mut T) -> &mut Vec<Tracked<C>>,
    ) -> Self {
        self.relation(name, RelationKind::ManyToMany, get, get_mut)
    }

    pub fn optimistic_locking(mut self, enabled: bool) -> Self {
        self.optimistic_locking = enabled;
        self
    }

    pub fn build(self) -> SchemaResult<EntitySchema> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let identity = self.identity.ok_or(SchemaError::MissingIdentity {
            type_name: T::TYPE_NAME,
        })?;
        Ok(EntitySchema {
            type_name: T::TYPE_NAME,
            identity,
            partition_key: self.partition_key,
            sort_key: self.sort_key,
            indexes: self.indexes,
            relations: self.relations,
            optimistic_locking: self.optimistic_locking,
            decoder: decode_tracked::<T>,
        })
    }

    fn relation<C: Entity>(
        mut self,
        name: &str,
        kind: RelationKind,
        get: fn(&T) -> &Vec<Tracked<C>>,
        get_mut: fn(&mut T) -> &mut Vec<Tracked<C>>,
    ) -> Self {
        if self.parse(name).is_none() {
            return self;
        }
        self.relations.retain(|relation| relation.name != name);
        self.relations.push(Relation {
            name: name.to_string(),
            target: C::TYPE_NAME,
            kind,
            accessor: Arc::new(TypedRelation::<T, C> { get, get_mut }),
        });
        self
    }

    fn parse(&mut self, expression: &str) -> Option<PropertyPath> {
        match PropertyPath::parse(expression) {
            Ok(path) => Some(path),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }
}

/// Fluent declaration of one GSI's keys.
pub struct IndexKeyBuilder {
    index: IndexKey,
    error: Option<SchemaError>,
}

impl IndexKeyBuilder {
    pub fn partition_key(mut self, expression: &str, prefix: &str) -> Self {
        match PropertyPath::parse(expression) {
            Ok(path) => self.index.partition_key.push_path(path, prefix),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Fixed partition value, e.g. one bucket per entity type.
    pub fn partition_constant(mut self, value: &str) -> Self {
        self.index.partition_key.push_constant(value);
        self
    }

    pub fn sort_key(mut self, expression: &str, prefix: &str) -> Self {
        match PropertyPath::parse(expression) {
            Ok(path) => self.index.sort_key.push_path(path, prefix),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    pub fn sort_constant(mut self, value: &str) -> Self {
        self.index.sort_key.push_constant(value);
        self
    }
}
