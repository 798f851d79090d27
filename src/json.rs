//! Variance-tolerant JSON field probing.
//!
//! The wire protocol has grown several spellings for the same logical field
//! (`displayName` next to `display_name`, `createdAt` next to `created_at`),
//! and optional fields are frequently absent. Every accessor here takes an
//! ordered alias list and resolves the first name present, so the fallback
//! chain stays declarative and testable on its own.
//!
//! Absent optional fields yield defaults; a *required* nested object that is
//! missing or mistyped is a hard [`ApiError::Protocol`] failure, never a
//! silent default.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::error::ApiError;

/// Looks up the first alias present on `value` as a string.
///
/// Non-string scalars are rendered to text so numeric identifiers survive
/// backends that serialize them as numbers. JSON `null` counts as absent.
#[must_use]
pub fn string_field(value: &Value, aliases: &[&str]) -> Option<String> {
    first_present(value, aliases).and_then(|field| match field {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

/// Looks up the first alias present as an integer.
///
/// Accepts JSON numbers and numeric strings; returns `None` otherwise so the
/// caller picks the documented default (0 for "zero", -1 for "unknown").
#[must_use]
pub fn int_field(value: &Value, aliases: &[&str]) -> Option<i64> {
    first_present(value, aliases).and_then(|field| match field {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Looks up the first alias present as an array of values.
#[must_use]
pub fn array_field<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Vec<Value>> {
    first_present(value, aliases).and_then(Value::as_array)
}

/// Looks up the first alias present as an object.
#[must_use]
pub fn object_field<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    first_present(value, aliases).filter(|field| field.is_object())
}

/// Looks up the first alias present as a flat string map.
///
/// Null entry values are coerced to empty strings, matching what the backend
/// accepts on the way out.
#[must_use]
pub fn string_map_field(value: &Value, aliases: &[&str]) -> BTreeMap<String, String> {
    let Some(Value::Object(entries)) = first_present(value, aliases) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .map(|(key, entry)| {
            let rendered = match entry {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

/// Looks up the first alias present as a creation timestamp, in epoch
/// milliseconds. Returns -1 when the field is absent or unparseable.
#[must_use]
pub fn timestamp_field(value: &Value, aliases: &[&str]) -> i64 {
    string_field(value, aliases)
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(-1)
}

/// Parses a backend timestamp string to epoch milliseconds.
///
/// Accepts RFC 3339 with an offset as well as the older offset-less
/// `2012-06-18T14:47:02` form, which is interpreted as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Unwraps the required singular wrapper object (`{"server": {...}}`).
///
/// # Errors
///
/// Returns [`ApiError::Protocol`] when the key is absent or the value under
/// it is not an object.
pub fn require_object<'a>(value: &'a Value, key: &str) -> Result<&'a Value, ApiError> {
    match value.get(key) {
        Some(inner) if inner.is_object() => Ok(inner),
        Some(_) => Err(ApiError::Protocol {
            message: format!("'{key}' is not an object"),
        }),
        None => Err(ApiError::Protocol {
            message: format!("missing '{key}' object"),
        }),
    }
}

/// Unwraps the required plural wrapper (`{"servers": [...]}`).
///
/// # Errors
///
/// Returns [`ApiError::Protocol`] when the key is absent or not an array.
pub fn require_array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, ApiError> {
    match value.get(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(ApiError::Protocol {
            message: format!("'{key}' is not an array"),
        }),
        None => Err(ApiError::Protocol {
            message: format!("missing '{key}' collection"),
        }),
    }
}

/// Offset-based pagination markers on a collection wrapper.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageInfo {
    /// Total entries across all pages.
    pub total_entries: i64,
    /// Offset of the first entry on this page.
    pub offset: i64,
}

/// Reads the `totalEntries`/`offset` pagination markers when the backend
/// paginates the collection. `None` means the response is a single page.
#[must_use]
pub fn page_info(value: &Value) -> Option<PageInfo> {
    let total_entries = int_field(value, &["totalEntries", "total_entries"])?;
    Some(PageInfo {
        total_entries,
        offset: int_field(value, &["offset"]).unwrap_or(0),
    })
}

fn first_present<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    // A key holding explicit null counts as absent and must not stop the
    // fallback chain, so the null check applies per alias.
    aliases
        .iter()
        .find_map(|name| value.get(name).filter(|field| !field.is_null()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn string_field_prefers_modern_spelling() {
        let value = json!({"displayName": "new", "display_name": "old"});
        assert_eq!(
            string_field(&value, &["displayName", "display_name"]),
            Some("new".to_owned())
        );
    }

    #[rstest]
    fn string_field_falls_back_to_legacy_spelling() {
        let value = json!({"display_name": "old"});
        assert_eq!(
            string_field(&value, &["displayName", "display_name"]),
            Some("old".to_owned())
        );
    }

    #[rstest]
    fn string_field_treats_null_as_absent() {
        let value = json!({"displayName": null, "display_name": "old"});
        assert_eq!(
            string_field(&value, &["displayName", "display_name"]),
            Some("old".to_owned())
        );
    }

    #[rstest]
    fn alias_chain_skips_every_null_link() {
        let value = json!({"createdAt": null, "created_at": null, "created": "2012-06-18T14:47:02"});
        assert_eq!(
            timestamp_field(&value, &["createdAt", "created_at", "created"]),
            1_340_030_822_000
        );
        let all_null = json!({"displayName": null, "display_name": null});
        assert_eq!(string_field(&all_null, &["displayName", "display_name"]), None);
    }

    #[rstest]
    fn string_field_renders_numeric_ids() {
        let value = json!({"id": 42});
        assert_eq!(string_field(&value, &["id"]), Some("42".to_owned()));
    }

    #[rstest]
    #[case(json!({"size": 5}), Some(5))]
    #[case(json!({"size": "5"}), Some(5))]
    #[case(json!({"size": true}), None)]
    #[case(json!({}), None)]
    fn int_field_accepts_numbers_and_numeric_strings(
        #[case] value: Value,
        #[case] expected: Option<i64>,
    ) {
        assert_eq!(int_field(&value, &["size"]), expected);
    }

    #[rstest]
    fn string_map_coerces_null_values() {
        let value = json!({"metadata": {"a": "1", "b": null}});
        let map = string_map_field(&value, &["metadata"]);
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("b").map(String::as_str), Some(""));
    }

    #[rstest]
    #[case("2012-06-18T14:47:02", 1_340_030_822_000)]
    #[case("2012-06-18T14:47:02Z", 1_340_030_822_000)]
    #[case("2012-06-18T14:47:02+00:00", 1_340_030_822_000)]
    fn parse_timestamp_handles_both_forms(#[case] raw: &str, #[case] expected: i64) {
        assert_eq!(parse_timestamp(raw), Some(expected));
    }

    #[rstest]
    fn timestamp_field_defaults_to_unknown() {
        assert_eq!(timestamp_field(&json!({}), &["createdAt", "created_at"]), -1);
        assert_eq!(
            timestamp_field(&json!({"created_at": "garbage"}), &["createdAt", "created_at"]),
            -1
        );
    }

    #[rstest]
    fn page_info_defaults_offset_to_zero() {
        let value = json!({"servers": [], "totalEntries": 120});
        assert_eq!(
            page_info(&value),
            Some(PageInfo {
                total_entries: 120,
                offset: 0
            })
        );
        assert_eq!(page_info(&json!({"servers": []})), None);
    }

    #[rstest]
    fn require_object_rejects_missing_wrapper() {
        let err = require_object(&json!({"other": {}}), "server").expect_err("must fail");
        assert!(matches!(err, ApiError::Protocol { .. }));
    }

    #[rstest]
    fn require_object_rejects_mistyped_wrapper() {
        let err = require_object(&json!({"server": [1, 2]}), "server").expect_err("must fail");
        assert!(matches!(err, ApiError::Protocol { .. }));
    }

    #[rstest]
    fn require_array_rejects_missing_collection() {
        let err = require_array(&json!({}), "servers").expect_err("must fail");
        assert!(matches!(err, ApiError::Protocol { .. }));
    }
}
