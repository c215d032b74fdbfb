//! Directory operations

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::RevlayError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists (symlinks are followed)
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), RevlayError> {
        fs::create_dir_all(&self.path).await.map_err(|e| {
            RevlayError::StorageError(format!(
                "failed to create directory {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), RevlayError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RevlayError::StorageError(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Names of the real (non-symlink) subdirectories, unsorted.
    ///
    /// A missing directory yields an empty list.
    pub async fn list_dir_names(&self) -> Result<Vec<String>, RevlayError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RevlayError::StorageError(format!(
                    "could not list {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(names)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
