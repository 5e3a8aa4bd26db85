/*!
Compact wire codec for entry collections.

Stored and exported entry arrays use a shortened key schema (`i`, `d`, `c`,
`img`) to cut JSON verbosity. Encoding is a pure field-renaming projection;
decoding is its exact inverse for the defined fields. Two forms are provided:
a typed pair over [`Entry`] values, and value-level transforms that rename
keys directly on parsed JSON. The value-level form is what crosses the
background worker channel and what the store uses to upgrade previously
compacted arrays; on well-typed input both forms agree.
*/

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::{Entry, ImageAttachment};
use crate::error::{DaybookError, Result};

/// Field renaming table, canonical name first.
const FIELD_MAP: [(&str, &str); 4] = [
    ("id", "i"),
    ("date", "d"),
    ("content", "c"),
    ("images", "img"),
];

/// A diary entry under the compact key schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompactEntry {
    pub i: i64,
    pub d: String,
    pub c: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<Vec<ImageAttachment>>,
}

impl From<Entry> for CompactEntry {
    fn from(entry: Entry) -> Self {
        CompactEntry {
            i: entry.id,
            d: entry.date,
            c: entry.content,
            img: entry.images,
        }
    }
}

impl From<CompactEntry> for Entry {
    fn from(compact: CompactEntry) -> Self {
        Entry {
            id: compact.i,
            date: compact.d,
            content: compact.c,
            images: compact.img,
        }
    }
}

/// Project a collection into the compact schema. Pure and total.
pub fn encode(entries: &[Entry]) -> Vec<CompactEntry> {
    entries.iter().cloned().map(CompactEntry::from).collect()
}

/// Restore a compact collection to canonical form. Pure and total.
pub fn decode(compact: Vec<CompactEntry>) -> Vec<Entry> {
    compact.into_iter().map(Entry::from).collect()
}

/// Rename canonical keys to compact keys on a parsed JSON array.
///
/// Unknown fields are dropped and null fields are treated as absent; element
/// shape is otherwise not enforced here, validation is the gate for that.
/// Fails only when the top level is not an array.
pub fn compact_value(value: Value) -> Result<Value> {
    rename_elements(value, |canonical| {
        FIELD_MAP
            .iter()
            .find(|(from, _)| *from == canonical)
            .map(|(_, to)| *to)
    })
}

/// Rename compact keys back to canonical keys on a parsed JSON array.
pub fn expand_value(value: Value) -> Result<Value> {
    rename_elements(value, |compact| {
        FIELD_MAP
            .iter()
            .find(|(_, to)| *to == compact)
            .map(|(from, _)| *from)
    })
}

fn rename_elements<F>(value: Value, rename: F) -> Result<Value>
where
    F: Fn(&str) -> Option<&'static str>,
{
    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| rename_keys(item, &rename))
                .collect(),
        )),
        _ => Err(DaybookError::unrecognized_format(
            "expected a JSON array of entries",
        )),
    }
}

fn rename_keys<F>(item: Value, rename: &F) -> Value
where
    F: Fn(&str) -> Option<&'static str>,
{
    match item {
        Value::Object(fields) => {
            let mut renamed = Map::with_capacity(FIELD_MAP.len());
            for (key, field) in fields {
                if field.is_null() {
                    continue;
                }
                if let Some(target) = rename(&key) {
                    renamed.insert(target.to_string(), field);
                }
            }
            Value::Object(renamed)
        }
        // Non-objects pass through; the validator rejects them downstream.
        other => other,
    }
}

/// True when the value is a non-empty array whose first element carries the
/// compact `i` key.
pub fn looks_compact(value: &Value) -> bool {
    first_element(value).map_or(false, |first| first.get("i").is_some())
}

/// True when the value is a non-empty array whose first element carries the
/// canonical `id` key.
pub fn looks_canonical(value: &Value) -> bool {
    first_element(value).map_or(false, |first| first.get("id").is_some())
}

fn first_element(value: &Value) -> Option<&Value> {
    value.as_array().and_then(|items| items.first())
}
