//! Non-blocking deploy lock

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::errors::RevlayError;

/// Exclusive advisory lock held for the duration of a deploy or rollback.
///
/// Released when dropped.
#[derive(Debug)]
pub struct DeployLock {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    /// Try to take the lock without waiting
    pub fn try_acquire(path: &Path) -> Result<Self, RevlayError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                RevlayError::StorageError(format!(
                    "failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(RevlayError::LockContention(path.to_path_buf()));
        }

        // Holder pid, for humans only
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!("Acquired deploy lock on {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release deploy lock {}: {}", self.path.display(), e);
        }
    }
}
