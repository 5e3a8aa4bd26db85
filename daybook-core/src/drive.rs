/*!
Remote drive boundary.

The cloud client itself (OAuth, HTTP transport) lives outside this crate;
the pipeline only depends on the [`DriveClient`] contract and treats its
failures opaquely. [`FolderDrive`] implements the contract over a locally
mounted folder, which is what the CLI wires in and what tests script
against.
*/

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{DaybookError, Result};

/// Fixed name of the remote backup object.
pub const REMOTE_BACKUP_NAME: &str = "diary-backup.json";

/// Transport contract for the cloud drive collaborator.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Store `content` under `name`, replacing any previous object.
    async fn upload(&self, name: &str, content: &str) -> Result<()>;

    /// Fetch the object named `name`; fails when it does not exist.
    async fn download(&self, name: &str) -> Result<String>;
}

/// Drive client over a locally mounted, externally synced folder.
pub struct FolderDrive {
    root: PathBuf,
}

impl FolderDrive {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FolderDrive {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DriveClient for FolderDrive {
    async fn upload(&self, name: &str, content: &str) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| DaybookError::storage(format!("cannot prepare drive folder: {err}")))?;
        let target = self.root.join(name);
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|err| DaybookError::storage(format!("drive write failed: {err}")))?;
        fs::rename(&tmp, &target)
            .await
            .map_err(|err| DaybookError::storage(format!("drive write failed: {err}")))?;
        info!(name, bytes = content.len(), "uploaded backup to drive folder");
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<String> {
        let source = self.root.join(name);
        match fs::read_to_string(&source).await {
            Ok(content) => {
                debug!(name, bytes = content.len(), "downloaded backup from drive folder");
                Ok(content)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(DaybookError::storage(
                format!("no backup named '{name}' on the drive"),
            )),
            Err(err) => Err(DaybookError::storage(format!("drive read failed: {err}"))),
        }
    }
}
