use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use filecache_sources::StorageConfig;
use futures::stream::BoxStream;

use crate::caching::FileCacheError;
use crate::utils::http::DownloadTimeouts;

use super::filesystem::FilesystemBackend;
use super::s3::S3Backend;

/// A stream of chunks read from a source.
pub type SourceStream = BoxStream<'static, Result<Bytes, FileCacheError>>;

/// A named storage that files with a `<name>://<path>` URL are read from.
///
/// Paths are relative to the root of the storage. Implementations return
/// [`FileCacheError::NotFound`] for missing objects where an operation needs one.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, FileCacheError>;

    /// The size of the object at `path` in bytes.
    async fn size(&self, path: &str) -> Result<u64, FileCacheError>;

    /// The MIME type of the object at `path`.
    async fn mime_type(&self, path: &str) -> Result<String, FileCacheError>;

    /// Opens the object at `path` for reading.
    async fn read_stream(&self, path: &str) -> Result<SourceStream, FileCacheError>;

    /// The location of the object on the local file system, if the storage is local.
    ///
    /// Files of local storages are handed out directly instead of being copied into the cache.
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

/// The storage backends available to a cache, by name.
#[derive(Debug, Clone, Default)]
pub struct StorageBackends {
    backends: BTreeMap<String, Arc<dyn StorageBackend>>,
}

impl StorageBackends {
    /// Creates the backends described by the configuration.
    pub fn from_config(
        storage: &BTreeMap<String, StorageConfig>,
        timeouts: DownloadTimeouts,
    ) -> Self {
        let backends = storage
            .iter()
            .map(|(name, config)| {
                let backend: Arc<dyn StorageBackend> = match config {
                    StorageConfig::Filesystem(config) => {
                        Arc::new(FilesystemBackend::new(config.clone()))
                    }
                    StorageConfig::S3(config) => Arc::new(S3Backend::new(config.clone(), timeouts)),
                };
                tracing::debug!("Configured `{}` storage `{}`", config.type_name(), name);
                (name.clone(), backend)
            })
            .collect();

        Self { backends }
    }

    /// Adds or replaces the backend called `name`.
    pub fn with_backend(
        mut self,
        name: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    /// Looks up the backend called `name`.
    pub fn get(&self, name: &str) -> Result<&dyn StorageBackend, FileCacheError> {
        self.backends
            .get(name)
            .map(|backend| backend.as_ref())
            .ok_or_else(|| FileCacheError::BackendNotConfigured(name.to_owned()))
    }
}
