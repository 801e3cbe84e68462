//! Support to read files from a local directory.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use filecache_sources::FilesystemStorageConfig;
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;

use crate::caching::FileCacheError;
use crate::utils::mime;

use super::{SourceStream, StorageBackend};

/// A storage backed by a directory on the local file system.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    config: Arc<FilesystemStorageConfig>,
}

impl FilesystemBackend {
    pub fn new(config: Arc<FilesystemStorageConfig>) -> Self {
        Self { config }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FileCacheError> {
        self.config
            .resolve(path)
            .ok_or_else(|| FileCacheError::NotFound(path.to_owned()))
    }

    async fn metadata(&self, path: &str) -> Result<std::fs::Metadata, FileCacheError> {
        let abspath = self.resolve(path)?;
        match tokio::fs::metadata(&abspath).await {
            Ok(metadata) if metadata.is_file() => Ok(metadata),
            Ok(_) => Err(FileCacheError::NotFound(path.to_owned())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(FileCacheError::NotFound(path.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn exists(&self, path: &str) -> Result<bool, FileCacheError> {
        match self.metadata(path).await {
            Ok(_) => Ok(true),
            Err(FileCacheError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn size(&self, path: &str) -> Result<u64, FileCacheError> {
        Ok(self.metadata(path).await?.len())
    }

    async fn mime_type(&self, path: &str) -> Result<String, FileCacheError> {
        self.metadata(path).await?;
        let abspath = self.resolve(path)?;
        Ok(mime::detect_file(&abspath).await?.to_owned())
    }

    async fn read_stream(&self, path: &str) -> Result<SourceStream, FileCacheError> {
        self.metadata(path).await?;
        let file = tokio::fs::File::open(self.resolve(path)?).await?;
        Ok(Box::pin(ReaderStream::new(file).map_err(FileCacheError::from)))
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.config.resolve(path)
    }
}
