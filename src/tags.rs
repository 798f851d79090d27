//! Tag (metadata) passthrough helpers.
//!
//! Tags ride under a `metadata` key on create and through a `.../metadata`
//! sub-resource afterwards. Inbound null values are coerced to empty strings
//! during translation, so a [`TagMap`] never holds an absent value.

use std::collections::BTreeMap;

use serde_json::{Value, json};

/// Flat string-to-string tag map, as the backend stores it.
pub type TagMap = BTreeMap<String, String>;

/// Wraps a tag map in the wire body used by the metadata sub-resource.
#[must_use]
pub fn metadata_body(tags: &TagMap) -> Value {
    json!({ "metadata": tags })
}
