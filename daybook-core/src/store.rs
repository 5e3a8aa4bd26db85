/*!
Reactive key-value persistence over a local storage area.

A [`StorageArea`] is a string keyspace with change notifications, matching
browser-local-storage semantics; [`FileArea`] backs one with a single JSON
file written atomically. [`StoredKey`] binds a typed value to one key:
reads fall back to a default instead of failing, entry arrays are
transparently stored under the compact schema and upgraded back on read, and
writes never propagate storage errors into the caller. [`EntryStore`] layers
the diary collection operations on top.
*/

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::codec;
use crate::entry::Entry;
use crate::error::Result;

/// Storage keys used by the diary application.
pub mod keys {
    /// The entry collection, persisted under the compact schema.
    pub const ENTRIES: &str = "diary.entries";
    /// Color scheme preference, `"dark"` or `"light"`.
    pub const THEME: &str = "diary.theme";
    /// UI language code.
    pub const LANGUAGE: &str = "diary.language";
}

/// Notification that a key in a storage area changed.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
}

/// A local-storage-like string keyspace with change notifications.
pub trait StorageArea: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// File-backed storage area: one JSON object per file, written via a
/// temp file and rename so readers never observe a partial write.
pub struct FileArea {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileArea {
    /// Open or create the storage file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "storage file is unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        let (events, _) = broadcast::channel(64);
        Ok(FileArea {
            path,
            state: Mutex::new(state),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_state(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn publish(&self, key: &str) {
        // No receivers is fine; events are best-effort.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
        });
    }
}

impl StorageArea for FileArea {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock_state().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock_state();
        state.insert(key.to_string(), value.to_string());
        self.persist(&state)?;
        drop(state);
        self.publish(key);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut state = self.lock_state();
        if state.remove(key).is_some() {
            self.persist(&state)?;
            drop(state);
            self.publish(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// In-memory storage area for tests.
#[cfg(test)]
pub(crate) struct MemoryArea {
    state: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

#[cfg(test)]
impl MemoryArea {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        MemoryArea {
            state: Mutex::new(HashMap::new()),
            events,
        }
    }
}

#[cfg(test)]
impl StorageArea for MemoryArea {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
        });
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.state.lock().unwrap().remove(key);
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// A typed value bound to one storage key.
///
/// Reads that fail for any reason fall back to the binding's default; writes
/// update the in-memory value first and log (never propagate) persistence
/// failures. Entry-shaped arrays are persisted compact and upgraded back to
/// canonical form on read, so either storage generation loads.
pub struct StoredKey<T> {
    area: Arc<dyn StorageArea>,
    key: String,
    default: T,
    value: Mutex<T>,
}

impl<T> StoredKey<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Bind `key` in `area`, reading the current value eagerly.
    pub fn bind<K: Into<String>>(area: Arc<dyn StorageArea>, key: K, default: T) -> Self {
        let key = key.into();
        let value = Mutex::new(read_value(area.as_ref(), &key, &default));
        StoredKey {
            area,
            key,
            default,
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current in-memory value.
    pub fn get(&self) -> T {
        self.lock_value().clone()
    }

    /// Replace the value and persist it.
    pub fn set(&self, value: T) {
        *self.lock_value() = value.clone();
        self.persist(&value);
    }

    /// Read-modify-write; returns the new value.
    pub fn update<F: FnOnce(T) -> T>(&self, f: F) -> T {
        let mut guard = self.lock_value();
        let next = f(guard.clone());
        *guard = next.clone();
        drop(guard);
        self.persist(&next);
        next
    }

    /// Re-read from the storage area, replacing the in-memory value. Call
    /// after a [`StorageEvent`] for this key to pick up foreign writes.
    pub fn refresh(&self) -> T {
        let fresh = read_value(self.area.as_ref(), &self.key, &self.default);
        *self.lock_value() = fresh.clone();
        fresh
    }

    /// Change events for the underlying area (all keys; filter on
    /// [`StorageEvent::key`]).
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.area.subscribe()
    }

    fn lock_value(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, value: &T) {
        match to_stored_text(value) {
            Ok(text) => {
                if let Err(err) = self.area.set_item(&self.key, &text) {
                    warn!(key = %self.key, error = %err, "failed to persist value");
                }
            }
            Err(err) => warn!(key = %self.key, error = %err, "failed to serialize value"),
        }
    }
}

fn read_value<T: DeserializeOwned + Clone>(area: &dyn StorageArea, key: &str, default: &T) -> T {
    let raw = match area.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return default.clone(),
        Err(err) => {
            warn!(key, error = %err, "failed to read stored value, using default");
            return default.clone();
        }
    };
    match decode_stored_text(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "stored value is unreadable, using default");
            default.clone()
        }
    }
}

fn decode_stored_text<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let parsed: Value = serde_json::from_str(raw)?;
    let canonical = if codec::looks_compact(&parsed) {
        debug!("upgrading compact stored array to canonical form");
        codec::expand_value(parsed)?
    } else {
        parsed
    };
    Ok(serde_json::from_value(canonical)?)
}

fn to_stored_text<T: Serialize>(value: &T) -> Result<String> {
    let as_value = serde_json::to_value(value)?;
    Ok(compact_if_entries(as_value).to_string())
}

/// Entry collections are persisted compact; other values, including arrays
/// of something else, are persisted as-is.
fn compact_if_entries(value: Value) -> Value {
    let non_empty_array = value.as_array().map_or(false, |items| !items.is_empty());
    if !non_empty_array {
        return value;
    }
    match serde_json::from_value::<Vec<Entry>>(value.clone()) {
        Ok(entries) => serde_json::to_value(codec::encode(&entries)).unwrap_or(value),
        Err(_) => value,
    }
}

/// The diary entry collection bound to [`keys::ENTRIES`], newest first.
pub struct EntryStore {
    inner: StoredKey<Vec<Entry>>,
}

impl EntryStore {
    pub fn new(area: Arc<dyn StorageArea>) -> Self {
        EntryStore {
            inner: StoredKey::bind(area, keys::ENTRIES, Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.inner.get()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_value().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_value().is_empty()
    }

    /// Prepend a new entry (newest first).
    pub fn save(&self, entry: Entry) {
        self.inner.update(|mut entries| {
            entries.insert(0, entry);
            entries
        });
    }

    /// Rewrite one entry's content in place; false when the id is unknown.
    pub fn update_content<S: Into<String>>(&self, id: i64, content: S) -> bool {
        let content = content.into();
        let mut found = false;
        self.inner.update(|mut entries| {
            if let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) {
                entry.content = content;
                found = true;
            }
            entries
        });
        found
    }

    /// Remove an entry by id; false when the id is unknown.
    pub fn delete(&self, id: i64) -> bool {
        let mut removed = false;
        self.inner.update(|mut entries| {
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            removed = entries.len() != before;
            entries
        });
        removed
    }

    /// Swap the whole collection; the restore path.
    pub fn replace(&self, entries: Vec<Entry>) {
        self.inner.set(entries);
    }

    pub fn refresh(&self) -> Vec<Entry> {
        self.inner.refresh()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.subscribe()
    }
}

/// Theme preference binding (`"dark"` or `"light"`).
pub fn theme_binding(area: Arc<dyn StorageArea>) -> StoredKey<String> {
    StoredKey::bind(area, keys::THEME, "light".to_string())
}

/// UI language binding.
pub fn language_binding(area: Arc<dyn StorageArea>) -> StoredKey<String> {
    StoredKey::bind(area, keys::LANGUAGE, "en".to_string())
}
