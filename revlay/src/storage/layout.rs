//! On-disk layout of a deployment target

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::template::{self, TemplateVars};

/// Name of the symlink designating the active release
pub const CURRENT_LINK: &str = "current";

/// Name of the deploy lock file at the root
pub const LOCK_FILE: &str = "revlay.lock";

/// Storage layout for one deployment root
///
/// ```text
/// <root>/releases/<release-name>/
/// <root>/shared/<path>
/// <root>/current -> releases/<release-name>
/// <root>/.state/active_port
/// <root>/pids/<app-name>.pid
/// <root>/logs/<app-name>-*.log
/// <root>/revlay.lock
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    root: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the releases directory
    pub fn releases_dir(&self) -> Dir {
        Dir::new(self.root.join("releases"))
    }

    /// Get the directory of a single release
    pub fn release_dir(&self, release_name: &str) -> Dir {
        self.releases_dir().subdir(release_name)
    }

    /// Get the shared directory
    pub fn shared_dir(&self) -> Dir {
        Dir::new(self.root.join("shared"))
    }

    /// Path of the `current` symlink
    pub fn current_link(&self) -> PathBuf {
        self.root.join(CURRENT_LINK)
    }

    /// Relative target stored in the `current` symlink for a release
    pub fn current_target(&self, release_name: &str) -> PathBuf {
        Path::new("releases").join(release_name)
    }

    /// Get the state directory
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.root.join(".state"))
    }

    /// Get the active port state file
    pub fn active_port_file(&self) -> File {
        self.state_dir().file("active_port")
    }

    /// Get the pids directory
    pub fn pids_dir(&self) -> Dir {
        Dir::new(self.root.join("pids"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.root.join("logs"))
    }

    /// Path of the deploy lock file
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Render a path template and anchor relative results at the root
    pub fn resolve(&self, path_template: &str, vars: &TemplateVars) -> PathBuf {
        let rendered = PathBuf::from(template::render(path_template, vars));
        if rendered.is_absolute() {
            rendered
        } else {
            self.root.join(rendered)
        }
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::RevlayError> {
        self.releases_dir().create().await?;
        self.shared_dir().create().await?;
        self.pids_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}
