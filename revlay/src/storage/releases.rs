//! Release directories, shared paths and the `current` pointer

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::errors::RevlayError;
use crate::storage::layout::StorageLayout;
use crate::template::{self, TemplateVars};

/// Reject names that could escape the releases directory
pub fn validate_release_name(name: &str) -> Result<(), RevlayError> {
    if name.is_empty() {
        return Err(RevlayError::ValidationError(
            "release name must not be empty".into(),
        ));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(RevlayError::ValidationError(format!(
            "invalid release name '{}': must not contain '..', '/' or '\\'",
            name
        )));
    }
    Ok(())
}

/// Timestamp release name, sortable lexicographically
pub fn generate_release_name() -> String {
    chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

/// A release as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub name: String,
    pub path: PathBuf,
    pub current: bool,
}

/// Filesystem operations on releases
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    layout: StorageLayout,
}

impl ReleaseStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn release_path(&self, name: &str) -> PathBuf {
        self.layout.release_dir(name).path().to_path_buf()
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.layout.release_dir(name).exists().await
    }

    /// Release names in ascending order, empty when nothing was deployed yet
    pub async fn list(&self) -> Result<Vec<String>, RevlayError> {
        let mut names = self.layout.releases_dir().list_dir_names().await?;
        names.sort();
        Ok(names)
    }

    /// Name of the release `current` points at, `None` before the first deploy
    pub async fn current(&self) -> Result<Option<String>, RevlayError> {
        let link = self.layout.current_link();
        match fs::read_link(&link).await {
            Ok(target) => Ok(target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RevlayError::StorageError(format!(
                "failed to read {}: {}",
                link.display(),
                e
            ))),
        }
    }

    pub async fn list_info(&self) -> Result<Vec<ReleaseInfo>, RevlayError> {
        let current = self.current().await?;
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|name| ReleaseInfo {
                path: self.release_path(&name),
                current: current.as_deref() == Some(name.as_str()),
                name,
            })
            .collect())
    }

    /// Create `releases/<name>` from `source`.
    ///
    /// With no source an empty directory is created. Symlinks are copied as
    /// links, special files are skipped.
    pub async fn populate(
        &self,
        name: &str,
        source: Option<&Path>,
    ) -> Result<PathBuf, RevlayError> {
        let release_dir = self.layout.release_dir(name);
        if fs::symlink_metadata(release_dir.path()).await.is_ok() {
            return Err(RevlayError::ValidationError(format!(
                "release '{}' already exists",
                name
            )));
        }
        release_dir.create().await?;

        if let Some(source) = source {
            if let Err(e) = copy_tree(source, release_dir.path()).await {
                let _ = release_dir.delete().await;
                return Err(RevlayError::StorageError(format!(
                    "failed to copy {} into release '{}': {}",
                    source.display(),
                    name,
                    e
                )));
            }
        }

        info!(release = %name, "Populated release directory");
        Ok(release_dir.path().to_path_buf())
    }

    /// Link every shared path into the release, replacing copied entries
    pub async fn link_shared(
        &self,
        name: &str,
        shared_paths: &[String],
    ) -> Result<(), RevlayError> {
        let release_path = self.release_path(name);
        let shared_dir = self.layout.shared_dir();

        for shared in shared_paths {
            check_shared_path(shared)?;

            let source = shared_dir.path().join(shared);
            if fs::symlink_metadata(&source).await.is_err() {
                fs::create_dir_all(&source).await?;
            }

            let target = release_path.join(shared);
            remove_any(&target).await?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::symlink(&source, &target).await.map_err(|e| {
                RevlayError::StorageError(format!(
                    "failed to link shared path '{}' into release '{}': {}",
                    shared, name, e
                ))
            })?;
            debug!(release = %name, path = %shared, "Linked shared path");
        }
        Ok(())
    }

    /// Point `current` at the release with a temp symlink and a rename
    pub async fn switch_current(&self, name: &str) -> Result<(), RevlayError> {
        if !self.exists(name).await {
            return Err(RevlayError::ReleaseNotFound(name.to_string()));
        }

        let link = self.layout.current_link();
        let temp = self
            .layout
            .root()
            .join(format!("{}.tmp", crate::storage::layout::CURRENT_LINK));
        remove_any(&temp).await?;

        fs::symlink(self.layout.current_target(name), &temp).await?;
        if let Err(e) = fs::rename(&temp, &link).await {
            let _ = fs::remove_file(&temp).await;
            return Err(RevlayError::StorageError(format!(
                "failed to switch current to '{}': {}",
                name, e
            )));
        }

        info!(release = %name, "Switched current release");
        Ok(())
    }

    /// Remove a release directory
    pub async fn remove(&self, name: &str) -> Result<(), RevlayError> {
        self.layout.release_dir(name).delete().await
    }

    /// Delete the oldest releases beyond `keep`, never the current one.
    ///
    /// `log_templates` are the service log path templates, a log file is
    /// only removed when its template is per release and undated.
    pub async fn prune(
        &self,
        keep: i32,
        app_name: &str,
        log_templates: &[&str],
    ) -> Result<Vec<String>, RevlayError> {
        if keep < 1 {
            return Ok(Vec::new());
        }

        let releases = self
            .list()
            .await
            .map_err(|e| RevlayError::PruneFailed(e.to_string()))?;
        let keep = keep as usize;
        if releases.len() <= keep {
            return Ok(Vec::new());
        }

        let current = self
            .current()
            .await
            .map_err(|e| RevlayError::PruneFailed(e.to_string()))?;
        let candidates = &releases[..releases.len() - keep];
        let mut removed = Vec::new();

        for name in candidates {
            if current.as_deref() == Some(name.as_str()) {
                debug!(release = %name, "Keeping current release");
                continue;
            }

            if let Err(e) = self.remove(name).await {
                warn!(release = %name, "Failed to prune release: {}", e);
                continue;
            }

            let vars = TemplateVars::for_release(app_name, name);
            for log in log_templates {
                // The release date is not recorded, dated names cannot be rebuilt
                if !template::references(log, "ReleaseName")
                    || template::references(log, "Date")
                {
                    continue;
                }
                let path = self.layout.resolve(log, &vars);
                if let Err(e) = crate::filesys::file::File::new(&path).delete().await {
                    warn!(release = %name, "Failed to remove log {}: {}", path.display(), e);
                }
            }

            info!(release = %name, "Pruned release");
            removed.push(name.clone());
        }

        Ok(removed)
    }
}

fn check_shared_path(shared: &str) -> Result<(), RevlayError> {
    let path = Path::new(shared);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if shared.is_empty() || escapes {
        return Err(RevlayError::ValidationError(format!(
            "invalid shared path '{}'",
            shared
        )));
    }
    Ok(())
}

/// Remove a file, symlink or directory tree, missing is fine
async fn remove_any(path: &Path) -> Result<(), RevlayError> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await?,
        Ok(_) => fs::remove_file(path).await?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Copy a directory tree without following symlinks
async fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let src = entry.path();
            let dst = to.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_symlink() {
                let target = fs::read_link(&src).await?;
                fs::symlink(target, &dst).await?;
            } else if file_type.is_dir() {
                fs::create_dir(&dst).await?;
                let perms = entry.metadata().await?.permissions();
                fs::set_permissions(&dst, perms).await?;
                pending.push((src, dst));
            } else if file_type.is_file() {
                fs::copy(&src, &dst).await?;
            } else {
                warn!("Skipping special file {}", src.display());
            }
        }
    }
    Ok(())
}
