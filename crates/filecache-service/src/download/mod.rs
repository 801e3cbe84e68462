//! Fetching of files from their sources.
//!
//! Files are either fetched from an HTTP server, or read from one of the configured
//! [`StorageBackend`]s. Both are subject to the configured size limit and MIME type allow-list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filecache_sources::{FileLocation, StorageLocation};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::caching::FileCacheError;
use crate::config::Config;
use crate::utils::http::{DownloadTimeouts, create_client};
use crate::utils::mime;

mod filesystem;
mod http;
mod s3;
mod storage;

pub use filesystem::FilesystemBackend;
pub use http::{HttpDownloader, RemoteHead};
pub use s3::S3Backend;
pub use storage::{SourceStream, StorageBackend, StorageBackends};

/// Pulls files from their sources, enforcing the configured limits.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    http: HttpDownloader,
    backends: StorageBackends,
    timeouts: DownloadTimeouts,
    max_file_size: Option<u64>,
    mime_types: Arc<[String]>,
}

impl SourceFetcher {
    pub fn new(config: &Config, backends: StorageBackends) -> Self {
        let timeouts = DownloadTimeouts::from_config(config);
        Self {
            http: HttpDownloader::new(create_client(&timeouts), timeouts),
            backends,
            timeouts,
            max_file_size: config.max_file_size,
            mime_types: config.mime_types.iter().cloned().collect(),
        }
    }

    /// Returns the on-disk path of a file on a local storage.
    ///
    /// Such files are used in place and never copied into the cache. The size limit and MIME
    /// type allow-list still apply. Returns `None` for files that need to be fetched.
    pub async fn local_path(
        &self,
        location: &FileLocation,
    ) -> Result<Option<PathBuf>, FileCacheError> {
        let FileLocation::Storage(location) = location else {
            return Ok(None);
        };
        let backend = self.backends.get(location.backend())?;
        let Some(path) = backend.local_path(location.path()) else {
            return Ok(None);
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(FileCacheError::NotFound(location.path().to_owned())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileCacheError::NotFound(location.path().to_owned()));
            }
            Err(err) => return Err(err.into()),
        };
        self.check_size(metadata.len())?;
        self.check_mime_type(&path).await?;

        Ok(Some(path))
    }

    /// Fetches the file into `destination`, which is the open handle of the file at `path`.
    ///
    /// Returns the number of bytes written. On error, the contents of `destination` are
    /// undefined and the caller is expected to discard the file. An empty source is an error,
    /// see [`FileCacheError::is_empty_source`].
    pub async fn fetch(
        &self,
        location: &FileLocation,
        mut destination: tokio::fs::File,
        path: &Path,
    ) -> Result<u64, FileCacheError> {
        let stream = match location {
            FileLocation::Remote(location) => self.http.get(location).await?,
            FileLocation::Storage(location) => self.read_storage(location).await?,
        };

        let written = self.write_stream(stream, &mut destination).await?;
        if written == 0 {
            return Err(FileCacheError::empty_source());
        }
        self.check_mime_type(path).await?;

        Ok(written)
    }

    async fn read_storage(
        &self,
        location: &StorageLocation,
    ) -> Result<SourceStream, FileCacheError> {
        let backend = self.backends.get(location.backend())?;
        backend.read_stream(location.path()).await
    }

    /// Copies `stream` into `destination` while enforcing the size limit and read timeout.
    async fn write_stream(
        &self,
        mut stream: SourceStream,
        destination: &mut tokio::fs::File,
    ) -> Result<u64, FileCacheError> {
        let read_timeout = self.timeouts.read;
        let mut written = 0u64;

        loop {
            let chunk = tokio::time::timeout(read_timeout, stream.next())
                .await
                .map_err(|_| FileCacheError::SourceTimedOut(read_timeout))?;
            let Some(chunk) = chunk.transpose()? else {
                break;
            };

            written += chunk.len() as u64;
            // Anything beyond the limit means the file is too large, so stop right away instead
            // of downloading the rest of it.
            self.check_size(written)?;
            destination.write_all(&chunk).await?;
        }

        destination.flush().await?;
        Ok(written)
    }

    /// Checks whether the file exists and passes the limits, without fetching it.
    pub async fn exists(&self, location: &FileLocation) -> Result<bool, FileCacheError> {
        match location {
            FileLocation::Remote(location) => {
                let Some(head) = self.http.head(location).await else {
                    return Ok(false);
                };
                if let Some(content_type) = head.content_type.filter(|ty| !ty.is_empty()) {
                    self.ensure_mime_type(&content_type)?;
                }
                self.check_size(head.content_length.unwrap_or_default())?;
                Ok(true)
            }
            FileLocation::Storage(location) => {
                let backend = self.backends.get(location.backend())?;
                let path = location.path();
                if !backend.exists(path).await? {
                    return Ok(false);
                }
                if !self.mime_types.is_empty() {
                    let mime_type = backend.mime_type(path).await?;
                    self.ensure_mime_type(&mime_type)?;
                }
                self.check_size(backend.size(path).await?)?;
                Ok(true)
            }
        }
    }

    fn check_size(&self, size: u64) -> Result<(), FileCacheError> {
        match self.max_file_size {
            Some(max_bytes) if size > max_bytes => Err(FileCacheError::TooLarge { max_bytes }),
            _ => Ok(()),
        }
    }

    async fn check_mime_type(&self, path: &Path) -> Result<(), FileCacheError> {
        if self.mime_types.is_empty() {
            return Ok(());
        }
        let mime_type = mime::detect_file(path).await?;
        self.ensure_mime_type(mime_type)
    }

    fn ensure_mime_type(&self, mime_type: &str) -> Result<(), FileCacheError> {
        if mime::is_allowed(&self.mime_types, mime_type) {
            Ok(())
        } else {
            Err(FileCacheError::MimeTypeNotAllowed(mime_type.to_owned()))
        }
    }
}
