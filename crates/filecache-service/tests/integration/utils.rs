use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use filetime::FileTime;

use filecache_service::cache::FileCache;
use filecache_service::caching::FileCacheError;
use filecache_service::config::Config;
use filecache_service::download::{SourceStream, StorageBackend, StorageBackends};
use filecache_service::sources::{FilesystemStorageConfig, StorageConfig};
use filecache_test as test;

pub use test::{Server, fixture, read_fixture};

/// Setup tests and create a file cache.
///
/// This function returns a tuple containing the cache to test, and a temporary directory
/// containing the cache directory. The directory is cleaned up when the [`TempDir`] instance is
/// dropped. Keep it as guard until the test has finished.
///
/// The cache has a local `test-disk` storage serving the fixtures. The `update_config` closure
/// can modify any default configuration if needed before the cache is created.
///
/// [`TempDir`]: test::TempDir
pub fn setup_cache(update_config: impl FnOnce(&mut Config)) -> (FileCache, test::TempDir) {
    let (config, tempdir) = test_config(update_config);
    (FileCache::new(&config).unwrap(), tempdir)
}

/// Like [`setup_cache`], but also configures the given storage backends.
pub fn setup_cache_with_backends(
    update_config: impl FnOnce(&mut Config),
    backends: StorageBackends,
) -> (FileCache, test::TempDir) {
    let (config, tempdir) = test_config(update_config);
    (FileCache::with_backends(&config, backends).unwrap(), tempdir)
}

fn test_config(update_config: impl FnOnce(&mut Config)) -> (Config, test::TempDir) {
    test::setup();

    let tempdir = test::tempdir();
    let mut config = Config {
        path: tempdir.path().join("cache"),
        storage: BTreeMap::from([(
            "test-disk".to_owned(),
            StorageConfig::Filesystem(Arc::new(FilesystemStorageConfig {
                root: test::fixtures_dir(),
            })),
        )]),
        ..Default::default()
    };
    update_config(&mut config);

    (config, tempdir)
}

/// Returns the names of all files in the cache directory.
pub fn cached_files(cache: &FileCache) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cache.path()) else {
        return vec![];
    };
    let mut files: Vec<_> = entries.map(|entry| entry.unwrap().path()).collect();
    files.sort();
    files
}

/// Moves the access and modification times of a file into the past.
pub fn set_accessed_ago(path: &Path, ago: Duration) {
    let time = FileTime::from_system_time(SystemTime::now() - ago);
    filetime::set_file_times(path, time, time).unwrap();
}

/// A storage backend keeping its objects in memory.
///
/// Its files are not local, so they are copied into the cache like remote files.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: BTreeMap<String, (String, Bytes)>,
}

impl MemoryBackend {
    pub fn with_object(mut self, path: &str, mime_type: &str, contents: &'static [u8]) -> Self {
        self.objects.insert(
            path.to_owned(),
            (mime_type.to_owned(), Bytes::from_static(contents)),
        );
        self
    }

    fn object(&self, path: &str) -> Result<&(String, Bytes), FileCacheError> {
        self.objects
            .get(path)
            .ok_or_else(|| FileCacheError::NotFound(path.to_owned()))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn exists(&self, path: &str) -> Result<bool, FileCacheError> {
        Ok(self.objects.contains_key(path))
    }

    async fn size(&self, path: &str) -> Result<u64, FileCacheError> {
        Ok(self.object(path)?.1.len() as u64)
    }

    async fn mime_type(&self, path: &str) -> Result<String, FileCacheError> {
        Ok(self.object(path)?.0.clone())
    }

    async fn read_stream(&self, path: &str) -> Result<SourceStream, FileCacheError> {
        let contents = self.object(path)?.1.clone();
        // split into two chunks to exercise the copy loop
        let (head, tail) = contents.split_at(contents.len() / 2);
        let chunks = vec![
            Ok(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
