mod common;

use common::{doc, placed_at, registry};
use onetable_core::model::document::to_document;
use onetable_core::schema::key_builder::{build_key, KeySpec};
use onetable_core::schema::path::PropertyPath;
use onetable_core::{date_format, Entity, EntitySchema, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Address {
    country: String,
    city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Store {
    id: String,
    address: Address,
    #[serde(default)]
    tags: Vec<String>,
}

impl Entity for Store {
    const TYPE_NAME: &'static str = "Store";
}

#[test]
fn declared_segments_join_and_skip_absent_values() {
    let mut spec = KeySpec::new();
    spec.push_path(PropertyPath::parse("A").unwrap(), "P1");
    spec.push_path(PropertyPath::parse("B").unwrap(), "P2");

    assert_eq!(
        build_key(&spec, &doc(json!({"A": "v1", "B": "v2"}))),
        "P1#v1#P2#v2"
    );
    assert_eq!(build_key(&spec, &doc(json!({"A": "v1"}))), "P1#v1");
}

#[test]
fn hierarchical_key_from_nested_paths() {
    let schema = EntitySchema::builder::<Store>()
        .identity("id")
        .partition_key("|s| s.address.country", "COUNTRY")
        .partition_key("address.city", "CITY")
        .sort_key("id", "STORE")
        .build()
        .unwrap();

    let full = doc(json!({"id": "s1", "address": {"country": "NO", "city": "Oslo"}}));
    assert_eq!(schema.partition_key().build(&full), "COUNTRY#NO#CITY#Oslo");

    let partial = doc(json!({"id": "s2", "address": {"country": "NO", "city": null}}));
    assert_eq!(schema.partition_key().build(&partial), "COUNTRY#NO");
}

#[test]
fn array_values_join_with_separator() {
    let schema = EntitySchema::builder::<Store>()
        .identity("id")
        .index("ByTags", |ix| ix.partition_constant("STORE").sort_key("tags", "TAGS"))
        .build()
        .unwrap();
    let index = &schema.indexes()[0];

    let tagged = doc(json!({"id": "s1", "tags": ["a", "b"]}));
    assert_eq!(index.partition_key().build(&tagged), "STORE");
    assert_eq!(index.sort_key().build(&tagged), "TAGS#a#b");

    let untagged = doc(json!({"id": "s1", "tags": []}));
    assert_eq!(index.sort_key().build(&untagged), "");
}

#[test]
fn dates_render_in_fixed_iso_format() {
    let registry = registry();
    let schema = registry.get("Order").unwrap();
    let order = common::order("o1", "c1");
    let document = to_document("Order", &*order.read()).unwrap();

    let by_customer = &schema.indexes()[0];
    assert_eq!(by_customer.partition_key().build(&document), "CUSTOMER#c1");
    assert_eq!(
        by_customer.sort_key().build(&document),
        format!("DATE#{}", date_format::format(&placed_at()))
    );
    assert_eq!(
        by_customer.sort_key().build(&document),
        "DATE#2024-05-01T09:30:00.0000000+01:00"
    );
}

#[test]
fn unsupported_accessor_shapes_fail_at_build() {
    let err = EntitySchema::builder::<Store>()
        .identity("id")
        .sort_key("|s| s.tags.len()", "X")
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::PathNotFound { .. }));
}
