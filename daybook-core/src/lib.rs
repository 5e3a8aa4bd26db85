/*!
# Daybook Core Engine

Local-first diary persistence and backup/restore core library.

This crate provides the data layer of a personal diary application:

- A compact on-disk encoding for entry collections (shortened key schema)
- A reactive key-value persistence store over a local storage area
- An offload dispatcher that moves encode/decode work for large payloads
  onto a background worker, falling back to inline execution
- A backup pipeline covering file export/import and drive upload/download
  with size ceilings, format sniffing, validation, and retry

## Architecture

Components depend leaves-first: the codec and validator stand alone; the
dispatcher owns the background worker and falls back to the codec inline;
the store applies the codec transparently for entry arrays; the backup
engine orchestrates dispatcher, validator, store, and the drive boundary.

## Usage

```rust,no_run
use std::sync::Arc;
use daybook_core::{
    BackupConfig, BackupEngine, Entry, EntryStore, FileArea, FolderDrive,
    OffloadDispatcher,
};

# async fn run() -> daybook_core::Result<()> {
let area = Arc::new(FileArea::open("diary/storage.json")?);
let store = Arc::new(EntryStore::new(area));
store.save(Entry::new("Dear diary, today I wrote some Rust."));

let engine = BackupEngine::new(
    Arc::clone(&store),
    OffloadDispatcher::global(),
    Arc::new(FolderDrive::new("diary/drive")),
    BackupConfig::new("diary/backups"),
)?;

// Write a dated backup file
engine.export().await?;

// Restore, asking before overwriting existing entries
engine.import("diary/backups/diary-backup-2026-08-25.json".as_ref(), || true).await?;
# Ok(())
# }
```
*/

pub mod backup;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod drive;
pub mod entry;
pub mod error;
pub mod store;
pub mod validate;

pub use backup::{
    backup_file_name, BackupEngine, BackupFormat, ExportOutcome, RestoreOutcome, SizeSavings,
    UploadOutcome,
};
pub use config::{BackupConfig, LOCAL_BACKUP_LIMIT_BYTES, REMOTE_BACKUP_LIMIT_BYTES};
pub use dispatch::{CodecOp, DispatchConfig, OffloadDispatcher};
pub use drive::{DriveClient, FolderDrive, REMOTE_BACKUP_NAME};
pub use entry::{Entry, ImageAttachment};
pub use error::{DaybookError, Result};
pub use store::{EntryStore, FileArea, StorageArea, StorageEvent, StoredKey};
