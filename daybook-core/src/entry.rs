/*!
Canonical diary entry model.

An entry's `date` is a rendered display string captured at creation time, not
a parseable timestamp; ordering comes from the numeric `id` (epoch
milliseconds) and from the collection's newest-first convention.
*/

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

/// A single diary entry in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    /// Creation timestamp in epoch milliseconds; unique within a collection.
    pub id: i64,
    /// Human-readable creation date, display only.
    pub date: String,
    /// Entry body; non-empty.
    pub content: String,
    /// Attached images, absent rather than empty when there are none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageAttachment>>,
}

impl Entry {
    /// Create a new entry dated now.
    pub fn new<S: Into<String>>(content: S) -> Self {
        let now = Local::now();
        Entry {
            id: Utc::now().timestamp_millis(),
            date: now.format("%Y-%m-%d %H:%M").to_string(),
            content: content.into(),
            images: None,
        }
    }

    /// Attach images to the entry.
    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = Some(images);
        self
    }
}

/// An image attached to an entry, stored inline as a base64 data URI.
/// Owned exclusively by its parent entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAttachment {
    /// Epoch-millisecond id; fractional because the original data source
    /// appends a random fraction to disambiguate same-millisecond uploads.
    pub id: f64,
    /// Original file name.
    pub name: String,
    /// Base64 data URI of the (already resized) image.
    pub data: String,
    /// Smaller base64 preview, when one was generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Informational size in kilobytes, rendered with two decimals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl ImageAttachment {
    /// Create an attachment from a file name and its data URI payload.
    pub fn new<S: Into<String>>(name: S, data: S) -> Self {
        let data = data.into();
        let size = Some(approx_kilobytes(&data));
        ImageAttachment {
            id: Utc::now().timestamp_millis() as f64,
            name: name.into(),
            data,
            thumbnail: None,
            size,
        }
    }
}

/// Decoded size of a base64 data URI in kilobytes, two decimals.
fn approx_kilobytes(data_uri: &str) -> String {
    let payload_len = match data_uri.find(',') {
        Some(idx) => data_uri.len() - idx - 1,
        None => data_uri.len(),
    };
    let bytes = payload_len * 3 / 4;
    format!("{:.2}", bytes as f64 / 1024.0)
}
