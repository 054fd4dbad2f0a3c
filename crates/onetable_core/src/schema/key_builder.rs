//! Composite key construction.
//!
//! # Responsibility
//! - Hold ordered key segment declarations (`KeySpec`).
//! - Render `prefix#value` segments from documents and join them with `#`.
//!
//! # Invariants
//! - Segments whose source path is absent are skipped, never an error. This
//!   is what makes sparse secondary indexes work.
//! - Re-declaring a path replaces its prefix in place; declaration order is
//!   otherwise preserved.
//! - Constant segments ignore the document entirely.

use crate::model::document::{Document, Value};
use crate::schema::path::PropertyPath;
use indexmap::IndexMap;

/// Separator between prefixes, values and segments.
pub const KEY_SEPARATOR: &str = "#";

/// One declared key segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// Value read from a document path, optionally prefixed.
    Path { path: PropertyPath, prefix: String },
    /// Fixed value, e.g. a fan-out bucket name.
    Constant(String),
}

/// Ordered list of key segments for one key attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpec {
    segments: IndexMap<String, KeySegment>,
}

impl KeySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a path segment, or replaces the prefix of an existing one.
    pub fn push_path(&mut self, path: PropertyPath, prefix: impl Into<String>) {
        let slot = format!("path:{}", path.as_str());
        self.segments.insert(
            slot,
            KeySegment::Path {
                path,
                prefix: prefix.into(),
            },
        );
    }

    pub fn push_constant(&mut self, value: impl Into<String>) {
        let value = value.into();
        self.segments
            .insert(format!("const:{value}"), KeySegment::Constant(value));
    }

    pub fn segments(&self) -> impl Iterator<Item = &KeySegment> {
        self.segments.values()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Prefix of the first segment, used to classify items by key.
    pub fn leading_prefix(&self) -> Option<&str> {
        match self.segments.values().next()? {
            KeySegment::Path { prefix, .. } if !prefix.is_empty() => Some(prefix.as_str()),
            KeySegment::Constant(value) => Some(value.as_str()),
            KeySegment::Path { .. } => None,
        }
    }

    /// Top-level properties this key reads from.
    pub fn source_properties(&self) -> impl Iterator<Item = &str> {
        self.segments.values().filter_map(|segment| match segment {
            KeySegment::Path { path, .. } => Some(path.root()),
            KeySegment::Constant(_) => None,
        })
    }

    /// Builds the composite key; empty when every segment was absent.
    pub fn build(&self, document: &Document) -> String {
        build_key(self, document)
    }
}

/// Joins every present segment of `spec`, rendered from `document`.
pub fn build_key(spec: &KeySpec, document: &Document) -> String {
    let mut parts: Vec<String> = Vec::new();
    for segment in spec.segments() {
        match segment {
            KeySegment::Constant(value) => parts.push(value.clone()),
            KeySegment::Path { path, prefix } => {
                let Some(rendered) = path.resolve(document).and_then(render_value) else {
                    continue;
                };
                if prefix.is_empty() {
                    parts.push(rendered);
                } else {
                    parts.push(format!("{prefix}{KEY_SEPARATOR}{rendered}"));
                }
            }
        }
    }
    parts.join(KEY_SEPARATOR)
}

/// Renders one document value as key text.
///
/// Dates are already fixed-format strings in documents, so strings pass
/// through unchanged. Arrays join their rendered children.
pub(crate) fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().filter_map(render_value).collect();
            if rendered.is_empty() {
                None
            } else {
                Some(rendered.join(KEY_SEPARATOR))
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}
