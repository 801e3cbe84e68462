//! The file cache and its public operations.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filecache_sources::{FileLocation, LogicalFile};

use crate::caching::{
    self, ClearStats, FileCacheError, LockWait, PruneStats, SlotKey, SlotLock, SlotState,
};
use crate::config::Config;
use crate::download::{SourceFetcher, StorageBackends};
use crate::utils::http::DownloadTimeouts;

/// Options controlling a retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Delete the cached files after the callback, unless someone else is still using them.
    pub once: bool,
    /// What to do if a file is currently being written by someone else.
    pub lock_wait: LockWait,
}

impl RetrieveOptions {
    /// Options for a retrieval that deletes the files after use.
    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }
}

/// A file made available to a callback.
#[derive(Debug)]
enum Retrieved {
    /// A cache slot, held under a shared lock.
    Cached(SlotLock),
    /// A file on a local storage, which is used in place.
    Local(PathBuf),
}

impl Retrieved {
    fn path(&self) -> &Path {
        match self {
            Retrieved::Cached(lock) => lock.path(),
            Retrieved::Local(path) => path,
        }
    }
}

/// Releases retrieved files in the order they were acquired, including on early return.
struct ReleaseGuard {
    items: Vec<Retrieved>,
    once: bool,
}

impl ReleaseGuard {
    fn release(&mut self) {
        for item in self.items.drain(..) {
            let Retrieved::Cached(lock) = item else {
                continue;
            };
            let path = lock.path().to_owned();
            if lock.release(self.once) {
                tracing::debug!("Deleted cache slot `{}` after use", path.display());
                metric!(counter("caches.file.once_deleted") += 1);
            }
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A local disk cache for remote and storage-backed files.
///
/// Cached files are only ever handed out to callbacks, which run while the files are locked. This
/// way, no file can be deleted while it is in use, and no caller sees a partially written file.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
    fetcher: SourceFetcher,
    max_age: Duration,
    max_size: u64,
}

impl FileCache {
    /// Creates a file cache with the storage backends described in the configuration.
    pub fn new(config: &Config) -> Result<Self, FileCacheError> {
        let timeouts = DownloadTimeouts::from_config(config);
        let backends = StorageBackends::from_config(&config.storage, timeouts);
        Self::with_backends(config, backends)
    }

    /// Creates a file cache with the given storage backends.
    pub fn with_backends(
        config: &Config,
        backends: StorageBackends,
    ) -> Result<Self, FileCacheError> {
        std::fs::create_dir_all(&config.path)?;

        Ok(Self {
            path: config.path.clone(),
            fetcher: SourceFetcher::new(config, backends),
            max_age: config.max_age,
            max_size: config.max_size,
        })
    }

    /// The directory holding the cache slots.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path of the cache slot for a file, regardless of whether it exists.
    pub fn slot_path<F: LogicalFile + ?Sized>(&self, file: &F) -> PathBuf {
        self.path.join(SlotKey::from_url(file.url()))
    }

    /// Retrieves a file and runs `callback` with its local path.
    pub async fn get<'a, F, C, Fut, T>(&self, file: &'a F, callback: C) -> Result<T, FileCacheError>
    where
        F: LogicalFile,
        C: FnOnce(&'a F, PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_with(file, RetrieveOptions::default(), callback)
            .await
    }

    /// Like [`get`](Self::get), but deletes the cached file afterwards.
    pub async fn get_once<'a, F, C, Fut, T>(
        &self,
        file: &'a F,
        callback: C,
    ) -> Result<T, FileCacheError>
    where
        F: LogicalFile,
        C: FnOnce(&'a F, PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_with(file, RetrieveOptions::once(), callback).await
    }

    /// Retrieves a file with the given options and runs `callback` with its local path.
    pub async fn get_with<'a, F, C, Fut, T>(
        &self,
        file: &'a F,
        options: RetrieveOptions,
        callback: C,
    ) -> Result<T, FileCacheError>
    where
        F: LogicalFile,
        C: FnOnce(&'a F, PathBuf) -> Fut,
        Fut: Future<Output = T>,
    {
        self.batch_with(std::slice::from_ref(file), options, |files, paths| {
            let path = paths.into_iter().next().unwrap_or_default();
            callback(&files[0], path)
        })
        .await
    }

    /// Retrieves all files and runs `callback` with their local paths, in the same order.
    pub async fn batch<'a, F, C, Fut, T>(
        &self,
        files: &'a [F],
        callback: C,
    ) -> Result<T, FileCacheError>
    where
        F: LogicalFile,
        C: FnOnce(&'a [F], Vec<PathBuf>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.batch_with(files, RetrieveOptions::default(), callback)
            .await
    }

    /// Like [`batch`](Self::batch), but deletes the cached files afterwards.
    pub async fn batch_once<'a, F, C, Fut, T>(
        &self,
        files: &'a [F],
        callback: C,
    ) -> Result<T, FileCacheError>
    where
        F: LogicalFile,
        C: FnOnce(&'a [F], Vec<PathBuf>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.batch_with(files, RetrieveOptions::once(), callback)
            .await
    }

    /// Retrieves all files with the given options and runs `callback` with their local paths.
    ///
    /// Files are retrieved one after the other, in order. If any of them fails, the files
    /// retrieved so far are released and the error is returned without running the callback.
    /// Once the callback has completed, or its future is dropped, all files are released in
    /// the same order.
    pub async fn batch_with<'a, F, C, Fut, T>(
        &self,
        files: &'a [F],
        options: RetrieveOptions,
        callback: C,
    ) -> Result<T, FileCacheError>
    where
        F: LogicalFile,
        C: FnOnce(&'a [F], Vec<PathBuf>) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = ReleaseGuard {
            items: Vec::with_capacity(files.len()),
            once: options.once,
        };

        for file in files {
            let item = self.retrieve(file.url(), options.lock_wait).await?;
            guard.items.push(item);
        }

        let paths = guard
            .items
            .iter()
            .map(|item| item.path().to_owned())
            .collect();
        let result = callback(files, paths).await;

        guard.release();
        Ok(result)
    }

    /// Makes a single file available locally, fetching it into its cache slot if needed.
    async fn retrieve(&self, url: &str, lock_wait: LockWait) -> Result<Retrieved, FileCacheError> {
        metric!(counter("caches.access") += 1);
        let location = FileLocation::parse(url);

        if let Some(path) = self.fetcher.local_path(&location).await? {
            tracing::trace!("Using local file `{}` for `{}`", path.display(), url);
            return Ok(Retrieved::Local(path));
        }

        // The directory may have been removed since the cache was created.
        tokio::fs::create_dir_all(&self.path).await?;
        let slot_path = self.path.join(SlotKey::from_url(url));

        let state = {
            let slot_path = slot_path.clone();
            tokio::task::spawn_blocking(move || caching::acquire(&slot_path, lock_wait))
                .await
                .map_err(io::Error::other)??
        };

        let slot = match state {
            SlotState::Ready(lock) => {
                tracing::trace!("Cache hit for `{}`", url);
                metric!(counter("caches.file.hit") += 1);
                return Ok(Retrieved::Cached(lock));
            }
            SlotState::Vacant(slot) => slot,
        };

        tracing::debug!("Cache miss for `{}`, fetching into `{}`", url, slot_path.display());
        let destination = tokio::fs::File::from_std(slot.file()?.try_clone()?);
        match self.fetcher.fetch(&location, destination, slot.path()).await {
            Ok(size) => {
                metric!(counter("caches.file.write") += 1);
                metric!(histogram("caches.file.size") = size);
                Ok(Retrieved::Cached(slot.commit()?))
            }
            Err(err) => {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    "Failed to fetch `{}`",
                    url
                );
                metric!(counter("caches.file.write") += 1, "status" => err.as_tag());
                // Dropping the slot removes the partially written file.
                drop(slot);
                Err(err)
            }
        }
    }

    /// Checks whether a file exists at its source and passes the limits.
    ///
    /// This never touches the cache. Remote files are checked with a `HEAD` request, which is
    /// reported as missing if it fails.
    pub async fn exists<F: LogicalFile + ?Sized>(&self, file: &F) -> Result<bool, FileCacheError> {
        self.fetcher.exists(&FileLocation::parse(file.url())).await
    }

    /// Removes files which exceed the configured age or size limits.
    ///
    /// This does file system I/O and blocks on it.
    pub fn prune(&self) -> io::Result<PruneStats> {
        caching::prune(&self.path, self.max_age, self.max_size)
    }

    /// Removes all files which are not currently in use.
    ///
    /// This does file system I/O and blocks on it.
    pub fn clear(&self) -> io::Result<ClearStats> {
        caching::clear(&self.path)
    }
}
