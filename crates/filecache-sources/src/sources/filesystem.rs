use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for reading from the local file system.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FilesystemStorageConfig {
    /// Directory all paths of this storage are relative to.
    pub root: PathBuf,
}

impl FilesystemStorageConfig {
    /// Returns the absolute path of a file on this storage.
    ///
    /// Returns `None` for paths which would escape the storage root, like absolute paths or
    /// paths containing `..`.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let is_contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        is_contained.then(|| self.root.join(relative))
    }
}
