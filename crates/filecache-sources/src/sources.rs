//! Storage backend configuration types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod filesystem;
mod s3;
pub use filesystem::*;
pub use s3::*;

/// Configuration for a named storage backend.
///
/// Storage backends are referenced by name from file URLs of the form `[name]://[path]`. Their
/// configuration is a combination of the location of the storage plus any required
/// authentication.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Local file system.
    Filesystem(Arc<FilesystemStorageConfig>),
    /// Amazon S3 (or S3-compatible) bucket.
    S3(Arc<S3StorageConfig>),
}

impl StorageConfig {
    /// Name of this storage type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Filesystem(..) => "filesystem",
            Self::S3(..) => "s3",
        }
    }
}
