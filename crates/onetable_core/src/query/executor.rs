//! Paginated execution and rehydration of query results.

use super::compiler::CompiledStatement;
use super::QueryResult;
use crate::config::TableConfig;
use crate::model::document::{from_document, Document, Value};
use crate::model::entity::{Entity, Tracked};
use crate::schema::entity_schema::{EntitySchema, Relation};
use crate::schema::registry::SchemaRegistry;
use crate::schema::key_builder::KEY_SEPARATOR;
use crate::store::{QueryRequest, StoreClient};
use crate::tracking::{ChangeTracker, EntityState, EntryKey, Identity};
use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;

/// Runs `compiled` page by page until the store runs out of pages or
/// `limit` items were collected.
///
/// Each page request asks only for the items still missing; the result is
/// truncated to `limit`.
pub async fn execute_paged(
    store: &dyn StoreClient,
    compiled: &CompiledStatement,
    limit: Option<u32>,
    consistent_read: bool,
) -> QueryResult<Vec<Document>> {
    let limit = limit.map(|value| value as usize);
    if limit == Some(0) {
        return Ok(Vec::new());
    }

    let mut items: Vec<Document> = Vec::new();
    let mut next_token: Option<String> = None;
    let mut pages = 0usize;
    loop {
        let remaining = limit.map(|limit| (limit - items.len()) as u32);
        let request = QueryRequest {
            statement: compiled.statement.clone(),
            parameters: compiled.parameters.clone(),
            limit: remaining,
            consistent_read,
            next_token: next_token.take(),
        };
        let page = store.execute_query(request).await?;
        pages += 1;
        debug!(
            "event=query_page module=query status=ok page={} items={} more={}",
            pages,
            page.items.len(),
            page.next_token.is_some()
        );
        items.extend(page.items);
        next_token = page.next_token;

        let satisfied = limit.is_some_and(|limit| items.len() >= limit);
        if next_token.is_none() || satisfied {
            break;
        }
    }

    if let Some(limit) = limit {
        items.truncate(limit);
    }
    Ok(items)
}

struct MemberKind<'a> {
    relation: &'a Relation,
    schema: Arc<EntitySchema>,
    prefix: String,
}

struct LoadedMember {
    kind: usize,
    partition: String,
    document: Document,
    version: Option<i64>,
}

/// Turns raw items into roots of `T` with their relation members attached.
///
/// Items are classified by sort key prefix: a relation target's leading
/// prefix marks a member, the root's own prefix (when declared) marks a
/// root, anything else is skipped. Members attach to the root sharing their
/// partition key. With a tracker, already tracked roots are reused, roots
/// pending deletion are left out together with their members, and new
/// objects are tracked as unchanged.
pub(crate) fn rehydrate<T: Entity>(
    registry: &SchemaRegistry,
    config: &TableConfig,
    tracker: Option<&ChangeTracker>,
    items: Vec<Document>,
) -> QueryResult<Vec<Tracked<T>>> {
    let root_schema = registry.get_for::<T>()?;
    let mut kinds: Vec<MemberKind<'_>> = Vec::new();
    for relation in root_schema.relations() {
        let schema = registry.get(relation.target())?;
        if let Some(prefix) = schema.sort_key().leading_prefix() {
            let prefix = prefix.to_string();
            kinds.push(MemberKind {
                relation,
                schema,
                prefix,
            });
        }
    }
    let root_prefix = root_schema.sort_key().leading_prefix();
    let table_attributes = table_attributes(config, &root_schema, &kinds);

    let mut roots: Vec<Tracked<T>> = Vec::new();
    let mut root_keys: Vec<Option<EntryKey>> = Vec::new();
    let mut by_partition: IndexMap<String, usize> = IndexMap::new();
    let mut members: Vec<LoadedMember> = Vec::new();
    let mut skipped = 0usize;

    for mut document in items {
        let partition = text_attribute(&document, &config.partition_key_attribute);
        let sort = text_attribute(&document, &config.sort_key_attribute);
        let version = document
            .get(&config.version_attribute)
            .and_then(Value::as_i64);
        for attribute in &table_attributes {
            document.shift_remove(attribute.as_str());
        }

        if let Some(kind) = kinds.iter().position(|kind| has_prefix(&sort, &kind.prefix)) {
            members.push(LoadedMember {
                kind,
                partition,
                document,
                version,
            });
            continue;
        }
        if let Some(prefix) = root_prefix {
            if !sort.is_empty() && !has_prefix(&sort, prefix) {
                skipped += 1;
                continue;
            }
        }

        let identity = root_schema.identity_value(&document);
        let existing = match (tracker, identity.as_deref()) {
            (Some(tracker), Some(identity)) => tracker.tracked::<T>(identity),
            _ => None,
        };
        if let (Some(tracker), Some(root)) = (tracker, &existing) {
            if tracker.state(root)? == Some(EntityState::Deleted) {
                skipped += 1;
                continue;
            }
        }
        let (root, key) = match existing {
            Some(root) => {
                let key = identity.map(|value| EntryKey::new(T::TYPE_NAME, Identity::Value(value)));
                (root, key)
            }
            None => {
                let root = Tracked::new(from_document::<T>(T::TYPE_NAME, document)?);
                let key = match tracker {
                    Some(tracker) => Some(tracker.track_loaded(Box::new(root.clone()), version)?),
                    None => None,
                };
                (root, key)
            }
        };
        by_partition.entry(partition).or_insert(roots.len());
        roots.push(root);
        root_keys.push(key);
    }

    let mut attached = 0usize;
    for member in members {
        let Some(&position) = by_partition.get(&member.partition) else {
            skipped += 1;
            continue;
        };
        let kind = &kinds[member.kind];
        if let (Some(tracker), Some(identity)) =
            (tracker, kind.schema.identity_value(&member.document))
        {
            if tracker
                .tracked_erased(kind.schema.type_name(), &identity)
                .is_some()
            {
                continue;
            }
        }

        let object = kind.schema.decode(member.document)?;
        kind.relation.accessor().attach(&roots[position], object.as_ref());
        attached += 1;
        if let (Some(tracker), Some(root_key)) = (tracker, &root_keys[position]) {
            if tracker.contains_key(root_key) {
                tracker.track_loaded_member(
                    root_key,
                    kind.relation.name(),
                    object,
                    member.version,
                )?;
            }
        }
    }

    debug!(
        "event=rehydrate module=query status=ok type={} roots={} members={} skipped={} tracked={}",
        T::TYPE_NAME,
        roots.len(),
        attached,
        skipped,
        tracker.is_some()
    );
    Ok(roots)
}

fn text_attribute(document: &Document, attribute: &str) -> String {
    document
        .get(attribute)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn has_prefix(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(KEY_SEPARATOR))
}

/// Attributes written by the assembler rather than by the entity.
fn table_attributes(
    config: &TableConfig,
    root: &EntitySchema,
    kinds: &[MemberKind<'_>],
) -> Vec<String> {
    let mut attributes = vec![
        config.partition_key_attribute.clone(),
        config.sort_key_attribute.clone(),
        config.version_attribute.clone(),
    ];
    let schemas = std::iter::once(root).chain(kinds.iter().map(|kind| kind.schema.as_ref()));
    for schema in schemas {
        for index in schema.indexes() {
            let (partition, sort) = config.index_attributes(index.name());
            attributes.push(partition);
            attributes.push(sort);
        }
    }
    attributes.dedup();
    attributes
}

#[cfg(test)]
mod tests {
    use super::has_prefix;

    #[test]
    fn prefix_match_requires_a_separator() {
        assert!(has_prefix("LINE#1", "LINE"));
        assert!(has_prefix("LINE", "LINE"));
        assert!(!has_prefix("LINEITEM#1", "LINE"));
        assert!(!has_prefix("ORDER#1", "LINE"));
    }
}
