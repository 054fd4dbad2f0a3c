//! Change tracker: entry map, detection passes and change sets.

use super::entry::{EntityState, EntryKey, EntrySummary, Identity, TrackedEntry};
use super::{TrackingError, TrackingResult};
use crate::model::document::{changed_properties, Document};
use crate::model::entity::{AnyTracked, Entity, Tracked};
use crate::schema::entity_schema::EntitySchema;
use crate::schema::registry::SchemaRegistry;
use indexmap::IndexMap;
use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Owning aggregate's schema and document, used to build member keys.
#[derive(Debug, Clone)]
pub struct ParentDocument {
    pub schema: Arc<EntitySchema>,
    pub document: Document,
}

/// Owned snapshot of one pending entry, detached from the tracker.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub key: EntryKey,
    pub schema: Arc<EntitySchema>,
    pub state: EntityState,
    /// Scalar document; for deletes, the last persisted one when known.
    pub document: Document,
    pub original: Option<Document>,
    pub modified_properties: Vec<String>,
    /// Version last read from or written to the store.
    pub version: Option<i64>,
    pub parent: Option<ParentDocument>,
}

/// Pending work partitioned by state, in tracking order.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<PendingChange>,
    pub modified: Vec<PendingChange>,
    pub deleted: Vec<PendingChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.deleted.iter())
    }
}

type Handle = (&'static str, usize);

fn handle_of(object: &dyn AnyTracked) -> Handle {
    (object.type_name(), object.instance_id())
}

/// Entries in tracking order plus an index from object handle to entry key.
#[derive(Debug, Default)]
struct EntryTable {
    entries: IndexMap<EntryKey, TrackedEntry>,
    handles: HashMap<Handle, EntryKey>,
}

impl EntryTable {
    fn get(&self, key: &EntryKey) -> Option<&TrackedEntry> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &EntryKey) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(key)
    }

    fn contains_key(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> indexmap::map::Iter<'_, EntryKey, TrackedEntry> {
        self.entries.iter()
    }

    fn values(&self) -> indexmap::map::Values<'_, EntryKey, TrackedEntry> {
        self.entries.values()
    }

    fn values_mut(&mut self) -> indexmap::map::ValuesMut<'_, EntryKey, TrackedEntry> {
        self.entries.values_mut()
    }

    fn key_of_handle(&self, object: &dyn AnyTracked) -> Option<&EntryKey> {
        self.handles.get(&handle_of(object))
    }

    fn insert(&mut self, entry: TrackedEntry) {
        self.handles
            .insert(handle_of(entry.object.as_ref()), entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Points an existing entry at `object`.
    fn rebind(&mut self, key: &EntryKey, object: Box<dyn AnyTracked>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let previous = handle_of(entry.object.as_ref());
        let next = handle_of(object.as_ref());
        if previous != next {
            if self.handles.get(&previous) == Some(key) {
                self.handles.remove(&previous);
            }
            self.handles.insert(next, key.clone());
        }
        entry.object = object;
    }

    fn remove(&mut self, key: &EntryKey) -> Option<TrackedEntry> {
        let entry = self.entries.shift_remove(key)?;
        let handle = handle_of(entry.object.as_ref());
        if self.handles.get(&handle) == Some(key) {
            self.handles.remove(&handle);
        }
        Some(entry)
    }
}

/// Identity map and state machine of one unit of work.
#[derive(Debug)]
pub struct ChangeTracker {
    registry: Arc<SchemaRegistry>,
    entries: RwLock<EntryTable>,
}

impl ChangeTracker {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            entries: RwLock::new(EntryTable::default()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Registers `object` or updates the state of its existing entry.
    ///
    /// A new entry tracked as `Unchanged` snapshots the object and the
    /// membership of its relation collections immediately.
    pub fn track<T: Entity>(
        &self,
        object: &Tracked<T>,
        state: EntityState,
    ) -> TrackingResult<EntryKey> {
        let mut entries = self.entries.write();
        track_entry(
            &self.registry,
            &mut entries,
            Box::new(object.clone()),
            state,
            None,
            None,
        )
    }

    /// Same as [`ChangeTracker::track`], recording `parent` as owner.
    pub fn track_with_parent<T: Entity>(
        &self,
        object: &Tracked<T>,
        state: EntityState,
        parent: &EntryKey,
    ) -> TrackingResult<EntryKey> {
        let mut entries = self.entries.write();
        ensure_tracked(&entries, parent)?;
        track_entry(
            &self.registry,
            &mut entries,
            Box::new(object.clone()),
            state,
            Some(parent.clone()),
            None,
        )
    }

    /// Tracks a root read from the store.
    pub(crate) fn track_loaded(
        &self,
        object: Box<dyn AnyTracked>,
        version: Option<i64>,
    ) -> TrackingResult<EntryKey> {
        let mut entries = self.entries.write();
        track_entry(
            &self.registry,
            &mut entries,
            object,
            EntityState::Unchanged,
            None,
            version,
        )
    }

    /// Tracks a relation member read from the store and records it in the
    /// parent's baseline membership, so it is not reported as added.
    pub(crate) fn track_loaded_member(
        &self,
        parent: &EntryKey,
        relation: &str,
        object: Box<dyn AnyTracked>,
        version: Option<i64>,
    ) -> TrackingResult<EntryKey> {
        let mut entries = self.entries.write();
        ensure_tracked(&entries, parent)?;
        let key = track_entry(
            &self.registry,
            &mut entries,
            object,
            EntityState::Unchanged,
            Some(parent.clone()),
            version,
        )?;
        if let Some(root) = entries.get_mut(parent) {
            let members = root
                .relation_snapshots
                .entry(relation.to_string())
                .or_default();
            if !members.contains(&key) {
                members.push(key.clone());
            }
        }
        Ok(key)
    }

    /// Updates only the state of a tracked entry; `false` when untracked.
    pub fn change_state<T: Entity>(
        &self,
        object: &Tracked<T>,
        state: EntityState,
    ) -> TrackingResult<bool> {
        let mut entries = self.entries.write();
        let Some(key) = locate(&self.registry, &entries, object)? else {
            return Ok(false);
        };
        if let Some(entry) = entries.get_mut(&key) {
            entry.state = state;
        }
        Ok(true)
    }

    /// Removes the entry and, for aggregate roots, every member entry.
    pub fn untrack<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<bool> {
        let mut entries = self.entries.write();
        let Some(key) = locate(&self.registry, &entries, object)? else {
            return Ok(false);
        };
        let removed = untrack_cascading(&mut entries, &key);
        debug!(
            "event=untrack module=tracking status=ok key={} removed={}",
            key, removed
        );
        Ok(true)
    }

    /// Schedules `object` for deletion.
    ///
    /// Unsaved objects are simply forgotten; untracked objects are tracked as
    /// `Deleted`.
    pub fn mark_deleted<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<()> {
        let mut entries = self.entries.write();
        match locate(&self.registry, &entries, object)? {
            Some(key) => {
                let unsaved = entries.get(&key).is_some_and(TrackedEntry::is_unsaved);
                if unsaved {
                    untrack_cascading(&mut entries, &key);
                } else if let Some(entry) = entries.get_mut(&key) {
                    entry.state = EntityState::Deleted;
                }
            }
            None => {
                track_entry(
                    &self.registry,
                    &mut entries,
                    Box::new(object.clone()),
                    EntityState::Deleted,
                    None,
                    None,
                )?;
            }
        }
        Ok(())
    }

    pub fn entry<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<Option<EntrySummary>> {
        let entries = self.entries.read();
        let key = locate(&self.registry, &entries, object)?;
        Ok(key
            .and_then(|key| entries.get(&key))
            .map(TrackedEntry::summary))
    }

    pub fn state<T: Entity>(&self, object: &Tracked<T>) -> TrackingResult<Option<EntityState>> {
        Ok(self.entry(object)?.map(|summary| summary.state))
    }

    /// Identity-map lookup by identity value.
    pub fn tracked<T: Entity>(&self, identity: &str) -> Option<Tracked<T>> {
        let key = EntryKey::new(T::TYPE_NAME, Identity::Value(identity.to_string()));
        self.entries.read().get(&key).and_then(TrackedEntry::downcast::<T>)
    }

    pub(crate) fn tracked_erased(
        &self,
        type_name: &'static str,
        identity: &str,
    ) -> Option<Box<dyn AnyTracked>> {
        let key = EntryKey::new(type_name, Identity::Value(identity.to_string()));
        self.entries
            .read()
            .get(&key)
            .map(|entry| entry.object.clone_boxed())
    }

    pub(crate) fn contains_key(&self, key: &EntryKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Summaries of every entry in tracking order.
    pub fn entries(&self) -> Vec<EntrySummary> {
        self.entries
            .read()
            .values()
            .map(TrackedEntry::summary)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Runs one full detection pass: relation reconciliation, scalar diff and
    /// delete cascade.
    pub fn detect_changes(&mut self) -> TrackingResult<()> {
        let registry = Arc::clone(&self.registry);
        let entries = self.entries.get_mut();
        reconcile_relations(&registry, entries)?;
        diff_scalars(entries)?;
        cascade_deletes(entries);
        Ok(())
    }

    /// Detects changes, then partitions pending entries by state.
    ///
    /// A member moved to another aggregate yields a put under its new owner
    /// and a delete of the item stored under the old one.
    /// Repeated calls without intervening mutation return the same set.
    pub fn fetch_changes(&mut self) -> TrackingResult<ChangeSet> {
        self.detect_changes()?;
        let entries: &EntryTable = self.entries.get_mut();
        let mut changes = ChangeSet::default();
        for entry in entries.values() {
            let bucket = match entry.state {
                EntityState::Added => &mut changes.added,
                EntityState::Modified => &mut changes.modified,
                EntityState::Deleted => &mut changes.deleted,
                EntityState::Unchanged => continue,
            };
            bucket.push(pending_change(entries, entry));
            if entry.state != EntityState::Deleted {
                if let Some(origin) = &entry.moved_from {
                    changes.deleted.push(change_record(
                        entry,
                        EntityState::Deleted,
                        Some(origin.clone()),
                    ));
                }
            }
        }
        debug!(
            "event=fetch_changes module=tracking status=ok entries={} added={} modified={} deleted={}",
            entries.len(),
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Marks all pending work as persisted.
    ///
    /// Deleted entries are untracked (cascading to members); added and
    /// modified entries become `Unchanged` with a fresh snapshot and, under
    /// optimistic locking, a version one higher.
    pub fn accept_changes(&mut self) -> TrackingResult<()> {
        self.detect_changes()?;
        let entries = self.entries.get_mut();

        let deleted: Vec<EntryKey> = entries
            .iter()
            .filter(|(_, entry)| entry.state == EntityState::Deleted)
            .map(|(key, _)| key.clone())
            .collect();
        let mut removed = 0;
        for key in &deleted {
            removed += untrack_cascading(entries, key);
        }

        let mut accepted = 0;
        for entry in entries.values_mut() {
            if !matches!(entry.state, EntityState::Added | EntityState::Modified) {
                continue;
            }
            if entry.schema.optimistic_locking() {
                entry.version = Some(entry.version.unwrap_or(0) + 1);
            }
            entry.state = EntityState::Unchanged;
            entry.original = entry.current.clone();
            entry.modified_properties.clear();
            entry.persisted_parent = entry.parent.clone();
            entry.moved_from = None;
            accepted += 1;
        }
        debug!(
            "event=accept_changes module=tracking status=ok accepted={} removed={}",
            accepted, removed
        );
        Ok(())
    }
}

fn ensure_tracked(entries: &EntryTable, parent: &EntryKey) -> TrackingResult<()> {
    if entries.contains_key(parent) {
        Ok(())
    } else {
        Err(TrackingError::ParentNotTracked {
            parent: parent.to_string(),
        })
    }
}

/// Key of the entry holding `object`: the same handle first, then identity.
fn resolve_key(
    entries: &EntryTable,
    schema: &EntitySchema,
    object: &dyn AnyTracked,
) -> TrackingResult<EntryKey> {
    if let Some(key) = entries.key_of_handle(object) {
        return Ok(key.clone());
    }
    let document = object.to_document()?;
    Ok(EntryKey::resolve(schema, object, &document))
}

fn locate(
    registry: &SchemaRegistry,
    entries: &EntryTable,
    object: &dyn AnyTracked,
) -> TrackingResult<Option<EntryKey>> {
    let schema = registry.get(object.type_name())?;
    let key = resolve_key(entries, &schema, object)?;
    Ok(entries.contains_key(&key).then_some(key))
}

fn track_entry(
    registry: &SchemaRegistry,
    entries: &mut EntryTable,
    object: Box<dyn AnyTracked>,
    state: EntityState,
    parent: Option<EntryKey>,
    version: Option<i64>,
) -> TrackingResult<EntryKey> {
    let schema = registry.get(object.type_name())?;
    let key = resolve_key(entries, &schema, object.as_ref())?;

    if entries.contains_key(&key) {
        entries.rebind(&key, object);
        if let Some(entry) = entries.get_mut(&key) {
            entry.state = state;
            if parent.is_some() {
                entry.parent = parent;
            }
            if state == EntityState::Unchanged && entry.parent.is_some() {
                entry.persisted_parent = entry.parent.clone();
                entry.moved_from = None;
            }
            if version.is_some() {
                entry.version = version;
            }
        }
        return Ok(key);
    }

    let mut entry = TrackedEntry::new(key.clone(), object, Arc::clone(&schema), state);
    entry.parent = parent;
    entry.version = version;
    if state != EntityState::Unchanged {
        entries.insert(entry);
        debug!(
            "event=track module=tracking status=ok key={} state={}",
            key, state
        );
        return Ok(key);
    }

    let snapshot = entry.scalar_document()?;
    entry.current = Some(snapshot.clone());
    entry.original = Some(snapshot);
    entry.persisted_parent = entry.parent.clone();
    let owner = entry.object.clone_boxed();
    entries.insert(entry);

    let mut baseline = IndexMap::new();
    for relation in schema.relations() {
        let mut members: Vec<EntryKey> = Vec::new();
        for member in relation.accessor().members(owner.as_ref()) {
            let member_key = track_entry(
                registry,
                entries,
                member,
                EntityState::Unchanged,
                Some(key.clone()),
                None,
            )?;
            if !members.contains(&member_key) {
                members.push(member_key);
            }
        }
        baseline.insert(relation.name().to_string(), members);
    }
    if let Some(entry) = entries.get_mut(&key) {
        entry.relation_snapshots = baseline;
    }
    debug!(
        "event=track module=tracking status=ok key={} state={}",
        key, state
    );
    Ok(key)
}

/// Removes `key` and every entry whose parent chain leads to it.
fn untrack_cascading(entries: &mut EntryTable, key: &EntryKey) -> usize {
    let mut worklist = vec![key.clone()];
    let mut removed = 0;
    while let Some(current) = worklist.pop() {
        if entries.remove(&current).is_none() {
            continue;
        }
        removed += 1;
        worklist.extend(
            entries
                .iter()
                .filter(|(_, entry)| entry.parent.as_ref() == Some(&current))
                .map(|(child, _)| child.clone()),
        );
    }
    removed
}

fn reconcile_relations(
    registry: &SchemaRegistry,
    entries: &mut EntryTable,
) -> TrackingResult<()> {
    let mut roots: VecDeque<EntryKey> = entries
        .iter()
        .filter(|(_, entry)| {
            entry.schema.is_aggregate_root() && entry.state != EntityState::Deleted
        })
        .map(|(key, _)| key.clone())
        .collect();

    while let Some(root_key) = roots.pop_front() {
        let Some(root) = entries.get(&root_key) else {
            continue;
        };
        let owner = root.object.clone_boxed();
        let schema = Arc::clone(&root.schema);
        let mut snapshots = IndexMap::new();

        for relation in schema.relations() {
            let target = registry.get(relation.target())?;
            let previous = entries
                .get(&root_key)
                .and_then(|entry| entry.relation_snapshots.get(relation.name()))
                .cloned()
                .unwrap_or_default();

            let mut current: Vec<EntryKey> = Vec::new();
            for member in relation.accessor().members(owner.as_ref()) {
                let key = resolve_key(entries, &target, member.as_ref())?;
                if current.contains(&key) {
                    continue;
                }
                let was_member = previous.contains(&key);
                if entries.contains_key(&key) {
                    let origin = relocation_origin(entries, &key, &root_key);
                    entries.rebind(&key, member);
                    if let Some(entry) = entries.get_mut(&key) {
                        settle_member(entry, &root_key, was_member, origin);
                    }
                } else {
                    let mut entry = TrackedEntry::new(
                        key.clone(),
                        member,
                        Arc::clone(&target),
                        EntityState::Added,
                    );
                    entry.parent = Some(root_key.clone());
                    entries.insert(entry);
                    if target.is_aggregate_root() {
                        roots.push_back(key.clone());
                    }
                }
                current.push(key);
            }

            for key in previous.iter().filter(|key| !current.contains(key)) {
                let unsaved = match entries.get_mut(key) {
                    // Now owned by another aggregate.
                    Some(entry) if entry.parent.as_ref() != Some(&root_key) => false,
                    Some(entry) if entry.is_unsaved() => true,
                    Some(entry) => {
                        entry.state = EntityState::Deleted;
                        false
                    }
                    None => false,
                };
                if unsaved {
                    untrack_cascading(entries, key);
                }
            }
            snapshots.insert(relation.name().to_string(), current);
        }

        if let Some(root) = entries.get_mut(&root_key) {
            root.relation_snapshots = snapshots;
        }
    }
    Ok(())
}

/// Owner document of the stored item when a saved member first shows up in a
/// different aggregate.
fn relocation_origin(
    entries: &EntryTable,
    key: &EntryKey,
    root_key: &EntryKey,
) -> Option<ParentDocument> {
    let entry = entries.get(key)?;
    if entry.original.is_none() || entry.moved_from.is_some() {
        return None;
    }
    let stored_under = entry
        .persisted_parent
        .as_ref()
        .filter(|owner| *owner != root_key)?;
    entries.get(stored_under).map(|owner| ParentDocument {
        schema: Arc::clone(&owner.schema),
        document: owner
            .original
            .clone()
            .or_else(|| owner.current.clone())
            .unwrap_or_default(),
    })
}

/// Assigns a tracked member to `root_key` and settles its state.
fn settle_member(
    entry: &mut TrackedEntry,
    root_key: &EntryKey,
    was_member: bool,
    origin: Option<ParentDocument>,
) {
    entry.parent = Some(root_key.clone());
    if origin.is_some() {
        entry.moved_from = origin;
    }
    if entry.is_relocated() {
        // An explicit delete inside the new aggregate stands.
        if entry.state != EntityState::Deleted || !was_member {
            entry.state = EntityState::Added;
        }
    } else if entry.moved_from.take().is_some()
        || (entry.state == EntityState::Deleted && !was_member)
    {
        entry.state = if entry.original.is_some() {
            EntityState::Unchanged
        } else {
            EntityState::Added
        };
    }
}

fn diff_scalars(entries: &mut EntryTable) -> TrackingResult<()> {
    for entry in entries.values_mut() {
        let current = entry.scalar_document()?;
        entry.modified_properties = match &entry.original {
            Some(original) => changed_properties(original, &current),
            // Explicitly modified without a baseline: every field is written.
            None if entry.state == EntityState::Modified => current.keys().cloned().collect(),
            None => Vec::new(),
        };
        let changed = entry.original.is_some() && !entry.modified_properties.is_empty();
        if changed
            && !entry.is_relocated()
            && matches!(entry.state, EntityState::Unchanged | EntityState::Added)
        {
            entry.state = EntityState::Modified;
        }
        entry.current = Some(current);
    }
    Ok(())
}

/// Marks members of deleted aggregates as deleted, transitively.
fn cascade_deletes(entries: &mut EntryTable) {
    let mut worklist: Vec<EntryKey> = entries
        .iter()
        .filter(|(_, entry)| {
            entry.state == EntityState::Deleted && entry.schema.is_aggregate_root()
        })
        .map(|(key, _)| key.clone())
        .collect();
    let mut visited = HashSet::new();
    let mut discarded = Vec::new();

    while let Some(root_key) = worklist.pop() {
        if !visited.insert(root_key.clone()) {
            continue;
        }
        let members: Vec<EntryKey> = entries
            .iter()
            .filter(|(_, entry)| entry.parent.as_ref() == Some(&root_key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in members {
            match entries.get_mut(&key) {
                Some(entry) if entry.is_unsaved() => discarded.push(key),
                Some(entry) => {
                    entry.state = EntityState::Deleted;
                    worklist.push(key);
                }
                None => {}
            }
        }
    }

    for key in discarded {
        untrack_cascading(entries, &key);
    }
}

fn pending_change(entries: &EntryTable, entry: &TrackedEntry) -> PendingChange {
    let parent = match (&entry.moved_from, entry.state) {
        // Nothing was written under the new owner; delete the stored item.
        (Some(origin), EntityState::Deleted) => Some(origin.clone()),
        _ => entry
            .parent
            .as_ref()
            .and_then(|key| entries.get(key))
            .map(|parent| ParentDocument {
                schema: Arc::clone(&parent.schema),
                document: parent
                    .current
                    .clone()
                    .or_else(|| parent.original.clone())
                    .unwrap_or_default(),
            }),
    };
    change_record(entry, entry.state, parent)
}

fn change_record(
    entry: &TrackedEntry,
    state: EntityState,
    parent: Option<ParentDocument>,
) -> PendingChange {
    let document = match state {
        EntityState::Deleted => entry.original.clone().or_else(|| entry.current.clone()),
        _ => entry.current.clone(),
    }
    .unwrap_or_default();
    PendingChange {
        key: entry.key.clone(),
        schema: Arc::clone(&entry.schema),
        state,
        document,
        original: entry.original.clone(),
        modified_properties: entry.modified_properties.clone(),
        version: entry.version,
        parent,
    }
}
