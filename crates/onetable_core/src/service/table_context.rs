//! Unit-of-work facade over one table.
//!
//! # Responsibility
//! - Tie schema registry, change tracker, query compiler and write
//!   coordinator together behind one session object.
//!
//! # Invariants
//! - One `TableContext` is one unit of work; its tracker is never shared.
//! - Commits need `&mut self`, so no tracking call can race with them.

use crate::config::{ConfigResult, TableConfig};
use crate::model::document::Value;
use crate::model::entity::{Entity, Tracked};
use crate::query::compiler::{
    compile_query, CompiledStatement, QuerySpec, SortKeyCondition, SortKeyOperator,
};
use crate::query::executor::{execute_paged, rehydrate};
use crate::query::predicate::Predicate;
use crate::query::QueryResult;
use crate::schema::registry::SchemaRegistry;
use crate::store::StoreClient;
use crate::tracking::{ChangeSet, ChangeTracker, EntityState, TrackingResult};
use crate::write::{CommitMode, CommitOutcome, WriteCoordinator, WriteResult};
use log::info;
use std::marker::PhantomData;
use std::sync::Arc;

/// Session over one table: track objects, query them, commit changes.
pub struct TableContext {
    store: Arc<dyn StoreClient>,
    config: TableConfig,
    tracker: ChangeTracker,
}

impl TableContext {
    /// Creates a session after validating `config`.
    pub fn new(
        store: Arc<dyn StoreClient>,
        registry: Arc<SchemaRegistry>,
        config: TableConfig,
    ) -> ConfigResult<Self> {
        config.validate()?;
        info!(
            "event=context_open module=service status=ok table={} schemas={}",
            config.table_name,
            registry.len()
        );
        Ok(Self {
            store,
            config,
            tracker: ChangeTracker::new(registry),
        })
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.tracker.registry()
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    /// Schedules a new object (and its relation members) for insertion.
    pub fn add<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<()> {
        self.tracker.track(object, EntityState::Added).map(|_| ())
    }

    /// Starts tracking an object that already exists in the store.
    pub fn attach<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<()> {
        self.tracker.track(object, EntityState::Unchanged).map(|_| ())
    }

    /// Marks an object modified.
    ///
    /// An object with a snapshot still writes only its changed fields; one
    /// without a snapshot writes every field.
    pub fn update<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<()> {
        self.tracker.track(object, EntityState::Modified).map(|_| ())
    }

    pub fn remove<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<()> {
        self.tracker.mark_deleted(object)
    }

    pub fn detach<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<bool> {
        self.tracker.untrack(object)
    }

    pub fn state<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<Option<EntityState>> {
        self.tracker.state(object)
    }

    pub fn pending_changes(&mut self) -> TrackingResult<ChangeSet> {
        self.tracker.fetch_changes()
    }

    pub fn query<T: Entity>(&self) -> QueryBuilder<'_, T> {
        QueryBuilder::new(self)
    }

    /// Loads the single item addressed by a full primary key.
    pub async fn find<T: Entity>(
        &self,
        partition_key: &str,
        sort_key: &str,
    ) -> QueryResult<Option<Tracked<T>>> {
        self.query::<T>()
            .partition_key(partition_key)
            .sort_key(SortKeyOperator::Equal, [sort_key])
            .first()
            .await
    }

    /// Best-effort batch commit.
    pub async fn save_changes(&mut self) -> WriteResult<CommitOutcome> {
        self.commit(CommitMode::BestEffort).await
    }

    /// All-or-nothing transactional commit.
    pub async fn save_changes_atomic(&mut self) -> WriteResult<CommitOutcome> {
        self.commit(CommitMode::Atomic).await
    }

    pub async fn commit(&mut self, mode: CommitMode) -> WriteResult<CommitOutcome> {
        WriteCoordinator::new(self.store.as_ref(), &self.config)
            .commit(&mut self.tracker, mode)
            .await
    }
}

/// Typed query over the context's table.
pub struct QueryBuilder<'a, T> {
    context: &'a TableContext,
    index_name: Option<String>,
    partition_key: Option<Value>,
    sort_key: Option<SortKeyCondition>,
    filter: Option<Predicate>,
    limit: Option<u32>,
    consistent_read: bool,
    descending: bool,
    no_tracking: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: Entity> QueryBuilder<'a, T> {
    fn new(context: &'a TableContext) -> Self {
        Self {
            context,
            index_name: None,
            partition_key: None,
            sort_key: None,
            filter: None,
            limit: None,
            consistent_read: false,
            descending: false,
            no_tracking: false,
            _entity: PhantomData,
        }
    }

    pub fn partition_key(mut self, value: impl Into<String>) -> Self {
        self.partition_key = Some(Value::String(value.into()));
        self
    }

    pub fn sort_key<I, V>(mut self, operator: SortKeyOperator, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.sort_key = Some(SortKeyCondition::new(
            operator,
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Adds a filter; repeated calls are combined with AND.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Queries a secondary index instead of the table.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn consistent_read(mut self, enabled: bool) -> Self {
        self.consistent_read = enabled;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Returns objects without registering them with the tracker.
    pub fn no_tracking(mut self) -> Self {
        self.no_tracking = true;
        self
    }

    pub fn spec(&self) -> QuerySpec {
        let config = &self.context.config;
        let (partition_key_attribute, sort_key_attribute) = match &self.index_name {
            Some(index) => config.index_attributes(index),
            None => (
                config.partition_key_attribute.clone(),
                config.sort_key_attribute.clone(),
            ),
        };
        QuerySpec {
            table_name: config.table_name.clone(),
            index_name: self.index_name.clone(),
            partition_key_attribute,
            sort_key_attribute,
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
            filter: self.filter.clone(),
            limit: self.limit,
            consistent_read: self.consistent_read,
            descending: self.descending,
        }
    }

    pub fn compile(&self) -> QueryResult<CompiledStatement> {
        compile_query(&self.spec())
    }

    /// Executes the query and returns every matching root in store order.
    pub async fn to_list(self) -> QueryResult<Vec<Tracked<T>>> {
        let spec = self.spec();
        let compiled = compile_query(&spec)?;
        let context = self.context;
        let items = execute_paged(
            context.store.as_ref(),
            &compiled,
            spec.limit,
            spec.consistent_read,
        )
        .await?;
        let tracker = (!self.no_tracking).then_some(&context.tracker);
        rehydrate::<T>(context.registry(), &context.config, tracker, items)
    }

    pub async fn first(self) -> QueryResult<Option<Tracked<T>>> {
        Ok(self.to_list().await?.into_iter().next())
    }
}
