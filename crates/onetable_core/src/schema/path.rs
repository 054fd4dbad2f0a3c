//! Property path derivation for schema declarations.
//!
//! # Responsibility
//! - Turn a property access expression into a dotted member path.
//! - Resolve paths against documents.
//!
//! # Invariants
//! - Accepted shapes: `a.b.c`, `|x| x.a.b`, and either form followed by one or
//!   more pass-through coercions (`total as i64`).
//! - Everything else fails with `SchemaError::PathNotFound`.
//! - `null` values resolve as absent.

use crate::model::document::{Document, Value};
use crate::schema::{SchemaError, SchemaResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{Display, Formatter};

static MEMBER_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid path regex")
});
static COERCION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<inner>.+?)\s+as\s+[A-Za-z_][A-Za-z0-9_:<>]*$").expect("valid coercion regex")
});
static CLOSURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\|\s*(?P<param>[A-Za-z_][A-Za-z0-9_]*)\s*(:[^|]*)?\|\s*(?P<body>.+)$")
        .expect("valid closure regex")
});

/// Dotted member path, e.g. `customer.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    dotted: String,
    segments: Vec<String>,
}

impl PropertyPath {
    /// Derives a member path from an access expression.
    pub fn parse(expression: &str) -> SchemaResult<Self> {
        let not_found = || SchemaError::PathNotFound {
            expression: expression.to_string(),
        };

        let mut body = expression.trim();
        if let Some(caps) = CLOSURE_RE.captures(body) {
            let param = caps.name("param").map_or("", |m| m.as_str());
            let inner = caps.name("body").map_or("", |m| m.as_str()).trim();
            body = strip_coercions(inner)
                .strip_prefix(param)
                .and_then(|rest| rest.strip_prefix('.'))
                .ok_or_else(not_found)?;
        } else {
            body = strip_coercions(body);
        }

        let body = body.trim();
        if !MEMBER_PATH_RE.is_match(body) {
            return Err(not_found());
        }

        Ok(Self {
            dotted: body.to_string(),
            segments: body.split('.').map(str::to_string).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.dotted
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Top-level property the path starts from.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Resolves the path against a document; `None` when absent or `null`.
    pub fn resolve<'a>(&self, document: &'a Document) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = document.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }
}

impl Display for PropertyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dotted)
    }
}

fn strip_coercions(mut expression: &str) -> &str {
    loop {
        let trimmed = expression.trim();
        let trimmed = trimmed
            .strip_prefix('(')
            .and_then(|inner| inner.strip_suffix(')'))
            .unwrap_or(trimmed);
        match COERCION_RE.captures(trimmed).and_then(|caps| caps.name("inner")) {
            Some(inner) => expression = inner.as_str(),
            None => return trimmed,
        }
    }
}
