/*!
Structural validation for imported entry data.

Imported and downloaded collections are duck-typed JSON until they pass this
gate; nothing reaches the persistence store without it.
*/

use serde_json::Value;

use crate::error::{DaybookError, Result};

/// True iff the candidate is an object with a numeric `id`, a non-empty
/// string `date`, and a non-empty string `content`. No trimming is applied.
pub fn is_valid_entry(candidate: &Value) -> bool {
    let Some(fields) = candidate.as_object() else {
        return false;
    };
    let id_ok = fields.get("id").map_or(false, Value::is_number);
    let date_ok = fields
        .get("date")
        .and_then(Value::as_str)
        .map_or(false, |date| !date.is_empty());
    let content_ok = fields
        .get("content")
        .and_then(Value::as_str)
        .map_or(false, |content| !content.is_empty());
    id_ok && date_ok && content_ok
}

/// True iff the candidate is an array and every element is a valid entry.
pub fn is_valid_collection(candidates: &Value) -> bool {
    candidates
        .as_array()
        .map_or(false, |items| items.iter().all(is_valid_entry))
}

/// Validation with a positioned error message for reporting.
pub fn require_valid_collection(candidates: &Value) -> Result<()> {
    let items = candidates
        .as_array()
        .ok_or_else(|| DaybookError::validation("entry data is not an array"))?;
    match items.iter().position(|item| !is_valid_entry(item)) {
        Some(index) => Err(DaybookError::validation(format!(
            "entry at index {index} is not a valid diary entry"
        ))),
        None => Ok(()),
    }
}
