//! Standard filesystem paths for docker-on-top.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default data root, where every volume's main directory lives.
pub static DOT_DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("DOT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/docker-on-top"))
});

/// Pure mapping from (data root, volume name) to the canonical on-disk
/// layout of a volume.
///
/// Each volume owns a *main directory* `<root>/<name>/` containing:
///
/// - `metadata.json`: the options the volume was created with; exists always.
/// - `upper/`: the overlay upperdir; exists always, recreated per activation
///   for volatile volumes.
/// - `activemounts/`: one marker file per active mount request; exists
///   always. Mount/unmount take an exclusive `flock` on this directory.
/// - `workdir/`: the overlay workdir; exists only while mounted.
/// - `mountpoint/`: the overlay mount target; exists only while mounted.
///
/// The accessors never touch the filesystem.
#[derive(Debug, Clone)]
pub struct DotPaths {
    /// Data root directory (default: /var/lib/docker-on-top).
    root: PathBuf,
}

impl DotPaths {
    /// Create paths with the default data root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom data root.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A volume's main directory.
    #[must_use]
    pub fn volume(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// A volume's metadata file.
    #[must_use]
    pub fn metadata(&self, name: &str) -> PathBuf {
        self.volume(name).join("metadata.json")
    }

    /// A volume's overlay upperdir.
    #[must_use]
    pub fn upper(&self, name: &str) -> PathBuf {
        self.volume(name).join("upper")
    }

    /// A volume's overlay workdir.
    #[must_use]
    pub fn workdir(&self, name: &str) -> PathBuf {
        self.volume(name).join("workdir")
    }

    /// A volume's overlay mount target.
    #[must_use]
    pub fn mountpoint(&self, name: &str) -> PathBuf {
        self.volume(name).join("mountpoint")
    }

    /// A volume's active-mount marker directory.
    #[must_use]
    pub fn active_mounts(&self, name: &str) -> PathBuf {
        self.volume(name).join("activemounts")
    }

    /// An individual active-mount marker file.
    #[must_use]
    pub fn active_mount(&self, name: &str, id: &str) -> PathBuf {
        self.active_mounts(name).join(id)
    }
}

impl Default for DotPaths {
    fn default() -> Self {
        Self {
            root: DOT_DATA_ROOT.clone(),
        }
    }
}
