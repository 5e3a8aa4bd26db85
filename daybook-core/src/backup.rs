/*!
Backup and restore pipeline.

Four independently triggerable operations over the entry collection:
export to a dated local file, import from a file, upload to the remote
drive, download from the remote drive. Each runs guard → transform →
transport/storage → report in order. Encoding and decoding go through the
offload dispatcher; restores are gated by validation and, when entries
would be overwritten, by a caller-supplied confirmation. Drive transfers
retry with the configured linear policy and surface only the final failure.
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, error, info};

use daybook_retry::{transient_error, with_retry_policy};

use crate::codec;
use crate::config::BackupConfig;
use crate::dispatch::{CodecOp, OffloadDispatcher};
use crate::drive::{DriveClient, REMOTE_BACKUP_NAME};
use crate::entry::Entry;
use crate::error::{DaybookError, Result};
use crate::store::EntryStore;
use crate::validate;

/// Which generation a backup payload is in, decided once per restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    Compact,
    Canonical,
}

impl BackupFormat {
    /// Sniff the payload shape from the first array element. Empty arrays
    /// and non-arrays are unrecognized, as is any other element shape.
    pub fn detect(payload: &Value) -> Result<Self> {
        let items = payload
            .as_array()
            .ok_or_else(|| DaybookError::unrecognized_format("backup is not a JSON array"))?;
        if items.is_empty() {
            return Err(DaybookError::unrecognized_format(
                "backup contains no entries",
            ));
        }
        if codec::looks_compact(payload) {
            return Ok(BackupFormat::Compact);
        }
        if codec::looks_canonical(payload) {
            return Ok(BackupFormat::Canonical);
        }
        Err(DaybookError::unrecognized_format(
            "entries are neither compact nor canonical",
        ))
    }
}

/// Byte counts before and after compact encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSavings {
    pub original_bytes: usize,
    pub encoded_bytes: usize,
}

impl SizeSavings {
    /// Share of JSON verbosity shaved off by the compact schema.
    pub fn percent_saved(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.encoded_bytes as f64 / self.original_bytes as f64) * 100.0
    }
}

/// Result of an export run.
#[derive(Debug)]
pub enum ExportOutcome {
    /// Nothing to export; no file was produced.
    NoData,
    Written { path: PathBuf, savings: SizeSavings },
}

/// Result of an upload run.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Nothing to upload.
    NoData,
    Uploaded { savings: SizeSavings },
}

/// Result of an import or download run.
#[derive(Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The user declined the overwrite confirmation; not an error.
    Cancelled,
    Imported { count: usize },
}

/// Local backup file name for the given date.
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("diary-backup-{}.json", date.format("%Y-%m-%d"))
}

/// Orchestrates backup and restore over the store, dispatcher, and drive.
pub struct BackupEngine {
    store: Arc<EntryStore>,
    dispatcher: Arc<OffloadDispatcher>,
    drive: Arc<dyn DriveClient>,
    config: BackupConfig,
}

impl BackupEngine {
    pub fn new(
        store: Arc<EntryStore>,
        dispatcher: Arc<OffloadDispatcher>,
        drive: Arc<dyn DriveClient>,
        config: BackupConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(BackupEngine {
            store,
            dispatcher,
            drive,
            config,
        })
    }

    /// Export the collection to a dated file in the backups directory.
    pub async fn export(&self) -> Result<ExportOutcome> {
        let entries = self.store.entries();
        if entries.is_empty() {
            info!("no entries to export");
            return Ok(ExportOutcome::NoData);
        }

        let (text, savings) = self.encode_collection(&entries).await?;
        if text.len() > self.config.local_limit {
            return Err(DaybookError::SizeExceeded {
                size: text.len(),
                limit: self.config.local_limit,
            });
        }

        fs::create_dir_all(&self.config.backups_dir).await?;
        let path = self
            .config
            .backups_dir
            .join(backup_file_name(Utc::now().date_naive()));
        fs::write(&path, &text).await?;
        info!(
            path = %path.display(),
            count = entries.len(),
            percent = savings.percent_saved(),
            "exported backup"
        );
        Ok(ExportOutcome::Written { path, savings })
    }

    /// Import entries from a local backup file, replacing the collection.
    /// `confirm` runs only when existing entries would be overwritten.
    pub async fn import<F>(&self, file: &Path, confirm: F) -> Result<RestoreOutcome>
    where
        F: FnOnce() -> bool + Send,
    {
        let metadata = fs::metadata(file).await?;
        if metadata.len() as usize > self.config.local_limit {
            return Err(DaybookError::SizeExceeded {
                size: metadata.len() as usize,
                limit: self.config.local_limit,
            });
        }

        let text = fs::read_to_string(file).await?;
        debug!(file = %file.display(), bytes = text.len(), "read backup file");
        let entries = self.decode_payload(&text).await?;
        self.commit(entries, confirm)
    }

    /// Upload the collection to the remote drive under the fixed name.
    pub async fn upload(&self) -> Result<UploadOutcome> {
        let entries = self.store.entries();
        if entries.is_empty() {
            info!("no entries to upload");
            return Ok(UploadOutcome::NoData);
        }

        let (text, savings) = self.encode_collection(&entries).await?;
        if text.len() > self.config.remote_limit {
            return Err(DaybookError::SizeExceeded {
                size: text.len(),
                limit: self.config.remote_limit,
            });
        }

        let drive = Arc::clone(&self.drive);
        let payload = Arc::new(text);
        with_retry_policy("drive_upload", self.config.retry, move |_attempt| {
            let drive = Arc::clone(&drive);
            let payload = Arc::clone(&payload);
            Box::pin(async move {
                drive
                    .upload(REMOTE_BACKUP_NAME, &payload)
                    .await
                    .map_err(|err| transient_error!("drive_upload", err))
            })
        })
        .await
        .map_err(|err| {
            error!(error = %err, "upload failed after retries");
            DaybookError::sync(err.to_string())
        })?;

        info!(percent = savings.percent_saved(), "backup uploaded");
        Ok(UploadOutcome::Uploaded { savings })
    }

    /// Fetch the remote backup and restore it, with the same gating as
    /// [`BackupEngine::import`].
    pub async fn download<F>(&self, confirm: F) -> Result<RestoreOutcome>
    where
        F: FnOnce() -> bool + Send,
    {
        let drive = Arc::clone(&self.drive);
        let text = with_retry_policy("drive_download", self.config.retry, move |_attempt| {
            let drive = Arc::clone(&drive);
            Box::pin(async move {
                drive
                    .download(REMOTE_BACKUP_NAME)
                    .await
                    .map_err(|err| transient_error!("drive_download", err))
            })
        })
        .await
        .map_err(|err| {
            error!(error = %err, "download failed after retries");
            DaybookError::sync(err.to_string())
        })?;

        debug!(bytes = text.len(), "fetched remote backup");
        let entries = self.decode_payload(&text).await?;
        self.commit(entries, confirm)
    }

    async fn encode_collection(&self, entries: &[Entry]) -> Result<(String, SizeSavings)> {
        let canonical = serde_json::to_value(entries)?;
        let original_bytes = canonical.to_string().len();
        let compact = self
            .dispatcher
            .transform(CodecOp::Compress, canonical)
            .await?;
        let text = compact.to_string();
        let savings = SizeSavings {
            original_bytes,
            encoded_bytes: text.len(),
        };
        debug!(
            original = savings.original_bytes,
            encoded = savings.encoded_bytes,
            "collection encoded"
        );
        Ok((text, savings))
    }

    /// Parse → sniff → decode → validate, shared by import and download.
    async fn decode_payload(&self, text: &str) -> Result<Vec<Entry>> {
        let parsed: Value = serde_json::from_str(text)?;
        let canonical = match BackupFormat::detect(&parsed)? {
            BackupFormat::Compact => {
                debug!("compact backup detected, decoding");
                self.dispatcher
                    .transform(CodecOp::Decompress, parsed)
                    .await?
            }
            BackupFormat::Canonical => parsed,
        };
        validate::require_valid_collection(&canonical)?;
        serde_json::from_value(canonical)
            .map_err(|err| DaybookError::validation(format!("malformed entry data: {err}")))
    }

    fn commit<F>(&self, entries: Vec<Entry>, confirm: F) -> Result<RestoreOutcome>
    where
        F: FnOnce() -> bool,
    {
        if !self.store.is_empty() && !confirm() {
            info!("restore declined, keeping current entries");
            return Ok(RestoreOutcome::Cancelled);
        }
        let count = entries.len();
        self.store.replace(entries);
        info!(count, "entry collection restored");
        Ok(RestoreOutcome::Imported { count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;
    use crate::drive::FolderDrive;
    use crate::store::{MemoryArea, StorageArea};
    use async_trait::async_trait;
    use daybook_retry::RetryPolicy;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(id: i64, content: &str) -> Entry {
        Entry {
            id,
            date: format!("2026-01-{:02}", id),
            content: content.to_string(),
            images: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn engine_with_drive(
        backups_dir: &Path,
        drive: Arc<dyn DriveClient>,
    ) -> (BackupEngine, Arc<EntryStore>) {
        let area: Arc<dyn StorageArea> = Arc::new(MemoryArea::new());
        let store = Arc::new(EntryStore::new(area));
        let dispatcher = Arc::new(OffloadDispatcher::new(DispatchConfig::default()));
        let mut config = BackupConfig::new(backups_dir);
        config.retry = fast_retry();
        let engine =
            BackupEngine::new(Arc::clone(&store), dispatcher, drive, config).unwrap();
        (engine, store)
    }

    fn folder_engine(dir: &TempDir) -> (BackupEngine, Arc<EntryStore>) {
        let drive = Arc::new(FolderDrive::new(dir.path().join("drive")));
        engine_with_drive(&dir.path().join("backups"), drive)
    }

    /// Drive that fails its first `failures` calls, then behaves.
    struct FlakyDrive {
        failures: usize,
        calls: AtomicUsize,
        objects: Mutex<HashMap<String, String>>,
    }

    impl FlakyDrive {
        fn new(failures: usize) -> Self {
            FlakyDrive {
                failures,
                calls: AtomicUsize::new(0),
                objects: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DriveClient for FlakyDrive {
        async fn upload(&self, name: &str, content: &str) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(DaybookError::storage("simulated drive outage"));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(name.to_string(), content.to_string());
            Ok(())
        }

        async fn download(&self, name: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(DaybookError::storage("simulated drive outage"));
            }
            self.objects
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| DaybookError::storage("object not found"))
        }
    }

    #[test]
    fn test_backup_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
        assert_eq!(backup_file_name(date), "diary-backup-2026-08-25.json");
    }

    #[test]
    fn test_format_detection() {
        let compact = serde_json::json!([{"i": 1, "d": "x", "c": "y"}]);
        let canonical = serde_json::json!([{"id": 1, "date": "x", "content": "y"}]);
        assert_eq!(BackupFormat::detect(&compact).unwrap(), BackupFormat::Compact);
        assert_eq!(
            BackupFormat::detect(&canonical).unwrap(),
            BackupFormat::Canonical
        );

        for bad in [
            serde_json::json!([]),
            serde_json::json!({"id": 1}),
            serde_json::json!([{"what": "ever"}]),
        ] {
            assert!(matches!(
                BackupFormat::detect(&bad),
                Err(DaybookError::UnrecognizedFormat(_))
            ));
        }
    }

    #[test]
    fn test_savings_percent() {
        let savings = SizeSavings {
            original_bytes: 1000,
            encoded_bytes: 600,
        };
        assert!((savings.percent_saved() - 40.0).abs() < f64::EPSILON);
        let empty = SizeSavings {
            original_bytes: 0,
            encoded_bytes: 0,
        };
        assert_eq!(empty.percent_saved(), 0.0);
    }

    #[tokio::test]
    async fn test_export_empty_collection_produces_no_file() {
        let dir = TempDir::new().unwrap();
        let (engine, _store) = folder_engine(&dir);

        let outcome = engine.export().await.unwrap();
        assert!(matches!(outcome, ExportOutcome::NoData));
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_export_writes_compact_file() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = folder_engine(&dir);
        store.replace(vec![entry(1, "hello"), entry(2, "world")]);

        let outcome = engine.export().await.unwrap();
        let ExportOutcome::Written { path, savings } = outcome else {
            panic!("expected a written backup");
        };

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"i\""));
        assert!(!text.contains("\"id\""));
        assert!(savings.encoded_bytes < savings.original_bytes);
        assert!(savings.percent_saved() > 0.0);
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("diary-backup-"));
    }

    #[tokio::test]
    async fn test_export_size_limit() {
        let dir = TempDir::new().unwrap();
        let (mut engine, store) = folder_engine(&dir);
        engine.config.local_limit = 10;
        store.replace(vec![entry(1, "this will not fit in ten bytes")]);

        let err = engine.export().await.unwrap_err();
        assert!(matches!(err, DaybookError::SizeExceeded { limit: 10, .. }));
    }

    #[tokio::test]
    async fn test_import_round_trip_equals_original() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = folder_engine(&dir);
        let original = vec![entry(1, "hello")];
        store.replace(original.clone());

        let ExportOutcome::Written { path, .. } = engine.export().await.unwrap() else {
            panic!("expected a written backup");
        };

        let (fresh_engine, fresh_store) = folder_engine(&dir);
        let outcome = fresh_engine
            .import(&path, || panic!("confirm must not run for an empty store"))
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Imported { count: 1 });
        assert_eq!(fresh_store.entries(), original);
    }

    #[tokio::test]
    async fn test_import_compact_equals_canonical() {
        let dir = TempDir::new().unwrap();
        let compact_path = dir.path().join("compact.json");
        let canonical_path = dir.path().join("canonical.json");
        std::fs::write(
            &compact_path,
            r#"[{"i":1,"d":"2026-01-01","c":"hello"},{"i":2,"d":"2026-01-02","c":"world"}]"#,
        )
        .unwrap();
        std::fs::write(
            &canonical_path,
            r#"[{"id":1,"date":"2026-01-01","content":"hello"},{"id":2,"date":"2026-01-02","content":"world"}]"#,
        )
        .unwrap();

        let (compact_engine, compact_store) = folder_engine(&dir);
        let (canonical_engine, canonical_store) = folder_engine(&dir);
        compact_engine
            .import(&compact_path, || true)
            .await
            .unwrap();
        canonical_engine
            .import(&canonical_path, || true)
            .await
            .unwrap();

        assert_eq!(compact_store.entries(), canonical_store.entries());
        assert_eq!(compact_store.len(), 2);
    }

    #[tokio::test]
    async fn test_import_invalid_json_is_distinct() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{definitely not json").unwrap();

        let (engine, _store) = folder_engine(&dir);
        let err = engine.import(&path, || true).await.unwrap_err();
        assert!(matches!(err, DaybookError::Json(_)));
    }

    #[tokio::test]
    async fn test_import_unrecognized_formats() {
        let dir = TempDir::new().unwrap();
        let (engine, _store) = folder_engine(&dir);

        for (name, body) in [
            ("empty.json", "[]"),
            ("object.json", r#"{"id":1}"#),
            ("alien.json", r#"[{"title":"not a diary entry"}]"#),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            let err = engine.import(&path, || true).await.unwrap_err();
            assert!(
                matches!(err, DaybookError::UnrecognizedFormat(_)),
                "{name} should be unrecognized"
            );
        }
    }

    #[tokio::test]
    async fn test_import_one_invalid_entry_rejects_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.json");
        std::fs::write(
            &path,
            r#"[{"id":1,"date":"2026-01-01","content":"fine"},{"id":2,"date":"2026-01-02","content":""}]"#,
        )
        .unwrap();

        let (engine, store) = folder_engine(&dir);
        let existing = vec![entry(9, "existing")];
        store.replace(existing.clone());

        let err = engine
            .import(&path, || panic!("validation must fail before confirmation"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaybookError::Validation(_)));
        assert_eq!(store.entries(), existing);
    }

    #[tokio::test]
    async fn test_import_decline_is_cancelled_not_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incoming.json");
        std::fs::write(&path, r#"[{"id":1,"date":"2026-01-01","content":"new"}]"#).unwrap();

        let (engine, store) = folder_engine(&dir);
        let existing = vec![entry(9, "existing")];
        store.replace(existing.clone());

        let outcome = engine.import(&path, || false).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Cancelled);
        assert_eq!(store.entries(), existing);
    }

    #[tokio::test]
    async fn test_import_size_guard_checks_before_reading() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.json");
        std::fs::write(&path, "x".repeat(64)).unwrap();

        let (mut engine, _store) = folder_engine(&dir);
        engine.config.local_limit = 10;

        let err = engine.import(&path, || true).await.unwrap_err();
        assert!(matches!(err, DaybookError::SizeExceeded { size: 64, limit: 10 }));
    }

    #[tokio::test]
    async fn test_upload_empty_collection_is_no_data() {
        let drive = Arc::new(FlakyDrive::new(0));
        let dir = TempDir::new().unwrap();
        let (engine, _store) =
            engine_with_drive(dir.path(), Arc::clone(&drive) as Arc<dyn DriveClient>);

        let outcome = engine.upload().await.unwrap();
        assert!(matches!(outcome, UploadOutcome::NoData));
        assert_eq!(drive.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_fails_twice_then_succeeds() {
        let drive = Arc::new(FlakyDrive::new(2));
        let dir = TempDir::new().unwrap();
        let (engine, store) =
            engine_with_drive(dir.path(), Arc::clone(&drive) as Arc<dyn DriveClient>);
        store.replace(vec![entry(1, "persist me")]);

        let outcome = engine.upload().await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { .. }));
        assert_eq!(drive.calls(), 3);

        let stored = drive.objects.lock().unwrap();
        let body = stored.get(REMOTE_BACKUP_NAME).unwrap();
        assert!(body.contains("\"i\""));
    }

    #[tokio::test]
    async fn test_upload_exhausts_retries() {
        let drive = Arc::new(FlakyDrive::new(usize::MAX));
        let dir = TempDir::new().unwrap();
        let (engine, store) =
            engine_with_drive(dir.path(), Arc::clone(&drive) as Arc<dyn DriveClient>);
        store.replace(vec![entry(1, "never makes it")]);

        let err = engine.upload().await.unwrap_err();
        assert!(matches!(err, DaybookError::Sync(_)));
        assert_eq!(drive.calls(), 3);
    }

    #[tokio::test]
    async fn test_upload_size_limit_checked_before_transport() {
        let drive = Arc::new(FlakyDrive::new(0));
        let dir = TempDir::new().unwrap();
        let (mut engine, store) =
            engine_with_drive(dir.path(), Arc::clone(&drive) as Arc<dyn DriveClient>);
        engine.config.remote_limit = 10;
        store.replace(vec![entry(1, "far larger than the remote ceiling")]);

        let err = engine.upload().await.unwrap_err();
        assert!(matches!(err, DaybookError::SizeExceeded { limit: 10, .. }));
        assert_eq!(drive.calls(), 0);
    }

    #[tokio::test]
    async fn test_download_restores_uploaded_collection() {
        let dir = TempDir::new().unwrap();
        let (uploader, upload_store) = folder_engine(&dir);
        let original = vec![entry(1, "roaming"), entry(2, "entries")];
        upload_store.replace(original.clone());
        uploader.upload().await.unwrap();

        let (downloader, download_store) = folder_engine(&dir);
        let outcome = downloader
            .download(|| panic!("confirm must not run for an empty store"))
            .await
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Imported { count: 2 });
        assert_eq!(download_store.entries(), original);
    }

    #[tokio::test]
    async fn test_download_decline_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let (uploader, upload_store) = folder_engine(&dir);
        upload_store.replace(vec![entry(1, "remote copy")]);
        uploader.upload().await.unwrap();

        let (downloader, download_store) = folder_engine(&dir);
        let existing = vec![entry(9, "local copy")];
        download_store.replace(existing.clone());

        let outcome = downloader.download(|| false).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Cancelled);
        assert_eq!(download_store.entries(), existing);
    }

    #[tokio::test]
    async fn test_download_drive_failure_reports_sync_error() {
        let dir = TempDir::new().unwrap();
        let (engine, _store) = folder_engine(&dir);

        let err = engine.download(|| true).await.unwrap_err();
        assert!(matches!(err, DaybookError::Sync(_)));
    }
}
