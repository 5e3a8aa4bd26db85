/*!
Configuration for the backup pipeline.
*/

use std::path::{Path, PathBuf};

use daybook_retry::RetryPolicy;

use crate::error::{DaybookError, Result};

/// Ceiling for local backup files, both export and import.
pub const LOCAL_BACKUP_LIMIT_BYTES: usize = 50 * 1024 * 1024;

/// Ceiling for uploads, reflecting the remote service's limits.
pub const REMOTE_BACKUP_LIMIT_BYTES: usize = 25 * 1024 * 1024;

/// Pipeline settings; constructors fill in the production defaults.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Directory receiving exported backup files.
    pub backups_dir: PathBuf,
    /// Maximum serialized size for export/import.
    pub local_limit: usize,
    /// Maximum serialized size for upload.
    pub remote_limit: usize,
    /// Retry pacing for drive transfers.
    pub retry: RetryPolicy,
}

impl BackupConfig {
    pub fn new<P: AsRef<Path>>(backups_dir: P) -> Self {
        BackupConfig {
            backups_dir: backups_dir.as_ref().to_path_buf(),
            local_limit: LOCAL_BACKUP_LIMIT_BYTES,
            remote_limit: REMOTE_BACKUP_LIMIT_BYTES,
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_limit == 0 || self.remote_limit == 0 {
            return Err(DaybookError::validation("size limits must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(DaybookError::validation(
                "retry policy needs at least one attempt",
            ));
        }
        Ok(())
    }
}
