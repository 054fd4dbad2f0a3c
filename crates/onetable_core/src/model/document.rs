//! Generic document tree used for snapshots, key building and wire items.
//!
//! # Responsibility
//! - Convert entities to and from order-preserving JSON documents.
//! - Provide the structural equality routine used by snapshot diffing.
//! - Define the fixed ISO-8601 date format stored in documents and keys.
//!
//! # Invariants
//! - A `Document` always has an object at its root.
//! - `values_equal` ignores object key order and numeric representation.
//! - Dates always carry 7 fractional digits and an explicit offset.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use serde_json::Value;

/// Order-preserving attribute map; the root of every stored item.
pub type Document = serde_json::Map<String, Value>;

pub type MapperResult<T> = Result<T, MapperError>;

/// Object mapping failures.
#[derive(Debug, Error)]
pub enum MapperError {
    /// Entity serialized to something other than an object.
    #[error("entity `{type_name}` did not serialize to an object")]
    NotAnObject { type_name: &'static str },
    /// serde_json rejected the value in either direction.
    #[error("failed to map entity `{type_name}`: {source}")]
    Serde {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Serializes one entity into a document.
pub fn to_document<T: Serialize>(type_name: &'static str, value: &T) -> MapperResult<Document> {
    match serde_json::to_value(value) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(MapperError::NotAnObject { type_name }),
        Err(source) => Err(MapperError::Serde { type_name, source }),
    }
}

/// Deserializes one entity from a document.
///
/// Attributes unknown to `T` (key attributes, version) are ignored unless
/// `T` opts into `deny_unknown_fields`.
pub fn from_document<T: DeserializeOwned>(
    type_name: &'static str,
    document: Document,
) -> MapperResult<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|source| MapperError::Serde { type_name, source })
}

/// Recursive structural equality for document values.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return a == b;
            }
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return a == b;
            }
            a.as_f64() == b.as_f64()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

/// Returns top-level property names whose values differ between documents.
///
/// Missing attributes compare as `null`. Current-document order comes first,
/// followed by properties that only exist in `original`.
pub fn changed_properties(original: &Document, current: &Document) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, value) in current {
        let before = original.get(name).unwrap_or(&Value::Null);
        if !values_equal(before, value) {
            changed.push(name.clone());
        }
    }
    for (name, value) in original {
        if !current.contains_key(name) && !value.is_null() {
            changed.push(name.clone());
        }
    }
    changed
}

/// Returns `document` without the listed top-level properties.
pub(crate) fn without_properties<'a>(
    mut document: Document,
    excluded: impl IntoIterator<Item = &'a str>,
) -> Document {
    for name in excluded {
        document.shift_remove(name);
    }
    document
}

/// Fixed-format ISO-8601 dates: `YYYY-MM-DDTHH:MM:SS.fffffff+HH:MM`.
///
/// Usable as `#[serde(with = "onetable_core::date_format")]` on
/// `DateTime<FixedOffset>` fields.
pub mod date_format {
    use chrono::{DateTime, FixedOffset, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    const PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

    /// Renders a date with exactly 7 fractional digits.
    pub fn format(value: &DateTime<FixedOffset>) -> String {
        let ticks = (value.nanosecond() % 1_000_000_000) / 100;
        format!(
            "{}.{:07}{}",
            value.format("%Y-%m-%dT%H:%M:%S"),
            ticks,
            value.format("%:z")
        )
    }

    pub fn parse(text: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
        DateTime::parse_from_str(text, PARSE_FORMAT)
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{changed_properties, date_format, values_equal, Document, Value};
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("fixture should be an object")
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!(2)));
    }

    #[test]
    fn objects_compare_without_key_order() {
        let left = json!({"a": 1, "b": {"c": [1, 2]}});
        let right = json!({"b": {"c": [1, 2]}, "a": 1});
        assert!(values_equal(&left, &right));
    }

    #[test]
    fn changed_properties_reports_updates_and_removals() {
        let original = doc(json!({"name": "a", "total": 3, "note": "x"}));
        let current = doc(json!({"name": "b", "total": 3}));
        assert_eq!(changed_properties(&original, &current), vec!["name", "note"]);
    }

    #[test]
    fn missing_and_null_are_equivalent() {
        let original = doc(json!({"name": "a", "email": null}));
        let current = doc(json!({"name": "a"}));
        assert!(changed_properties(&original, &current).is_empty());
    }

    #[test]
    fn date_format_uses_seven_fraction_digits_and_round_trips() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        let value = offset
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid date")
            + chrono::Duration::nanoseconds(123_456_700);

        let text = date_format::format(&value);
        assert_eq!(text, "2024-03-09T14:05:07.1234567+02:00");
        assert_eq!(date_format::parse(&text).expect("should parse"), value);
    }
}
