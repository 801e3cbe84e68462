use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;

use filecache_service::cache::RetrieveOptions;
use filecache_service::caching::{FileCacheError, LockWait};
use filecache_service::download::StorageBackends;
use filecache_service::sources::GenericFile;

use crate::{
    MemoryBackend, Server, cached_files, fixture, read_fixture, set_accessed_ago, setup_cache,
    setup_cache_with_backends,
};

#[tokio::test]
async fn test_get_remote_creates_slot() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-image.jpg"));

    let (url, path, contents) = cache
        .get(&file, |file, path| async move {
            let contents = tokio::fs::read(&path).await.unwrap();
            (file.to_string(), path, contents)
        })
        .await
        .unwrap();

    assert_eq!(url, server.url("files/test-image.jpg"));
    assert_eq!(path, cache.slot_path(&file));
    assert_eq!(contents, read_fixture("test-image.jpg"));
    assert!(path.exists());
    assert_eq!(cached_files(&cache), [path]);
    assert_eq!(server.hits("files/test-image.jpg"), 1);
}

#[tokio::test]
async fn test_get_existing_updates_access_time() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-image.jpg"));

    let path = cache.get(&file, |_, path| async { path }).await.unwrap();
    set_accessed_ago(&path, Duration::from_secs(3600));
    let before = std::fs::metadata(&path).unwrap();

    let contents = cache
        .get(&file, |_, path| async move { std::fs::read(path).unwrap() })
        .await
        .unwrap();

    let after = std::fs::metadata(&path).unwrap();
    assert_eq!(contents, read_fixture("test-image.jpg"));
    assert!(
        FileTime::from_last_access_time(&after) > FileTime::from_last_access_time(&before)
    );
    assert_eq!(server.hits("files/test-image.jpg"), 1);
}

#[tokio::test]
async fn test_get_once_deletes_slot() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-file.txt"));

    let path = cache
        .get_once(&file, |_, path| async move {
            assert!(path.exists());
            path
        })
        .await
        .unwrap();

    assert!(!path.exists());
    assert!(cached_files(&cache).is_empty());
}

#[tokio::test]
async fn test_get_once_keeps_slot_in_use() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-file.txt"));

    let cache_ref = &cache;
    let path = cache
        .get(&file, |file, outer| async move {
            let inner = cache_ref
                .get_once(file, |_, inner| async move { inner })
                .await
                .unwrap();
            assert_eq!(inner, outer);
            // still held by the outer retrieval
            assert!(outer.exists());
            outer
        })
        .await
        .unwrap();

    assert!(path.exists());
}

#[tokio::test]
async fn test_local_disk_is_used_in_place() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let file = GenericFile::new("test-disk://test-image.jpg");

    let path = cache.get_once(&file, |_, path| async { path }).await.unwrap();

    assert_eq!(path, fixture("test-image.jpg"));
    // local files are never deleted
    assert!(path.exists());
    assert!(cached_files(&cache).is_empty());
}

#[tokio::test]
async fn test_local_disk_missing_file() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let file = GenericFile::new("test-disk://missing.jpg");

    let result = cache.get(&file, |_, path| async { path }).await;

    assert!(matches!(result, Err(FileCacheError::NotFound(ref path)) if path == "missing.jpg"));
}

#[tokio::test]
async fn test_unconfigured_disk() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let file = GenericFile::new("abc://files/test-image.jpg");

    let err = cache.get(&file, |_, path| async { path }).await.unwrap_err();

    assert!(matches!(err, FileCacheError::BackendNotConfigured(ref name) if name == "abc"));
    assert!(err.to_string().contains("abc"));
    assert!(cached_files(&cache).is_empty());
}

#[tokio::test]
async fn test_custom_backend_is_cached() {
    let backend = MemoryBackend::default().with_object("a/b.txt", "text/plain", b"from memory");
    let backends = StorageBackends::default().with_backend("memory", Arc::new(backend));
    let (cache, _tempdir) = setup_cache_with_backends(|_| {}, backends);
    let file = GenericFile::new("memory://a/b.txt");

    let (path, contents) = cache
        .get(&file, |_, path| async move {
            let contents = std::fs::read(&path).unwrap();
            (path, contents)
        })
        .await
        .unwrap();

    assert_eq!(contents, b"from memory");
    assert_eq!(path, cache.slot_path(&file));
    assert!(path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_fetch_once() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let url = server.url("delay/200ms/test-image.jpg");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let file = GenericFile::new(url.clone());
            tokio::spawn(async move {
                cache
                    .get(&file, |_, path| async move { std::fs::read(path).unwrap() })
                    .await
                    .unwrap()
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), read_fixture("test-image.jpg"));
    }
    assert_eq!(server.hits("delay/200ms/test-image.jpg"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_locked_slot_without_waiting() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("delay/500ms/test-image.jpg"));

    let writer = {
        let cache = cache.clone();
        let file = file.clone();
        tokio::spawn(async move { cache.get(&file, |_, path| async { path }).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let options = RetrieveOptions {
        lock_wait: LockWait::Fail,
        ..Default::default()
    };
    let result = cache.get_with(&file, options, |_, path| async { path }).await;
    assert!(matches!(result, Err(FileCacheError::SlotLocked(ref path)) if *path == cache.slot_path(&file)));

    let path = writer.await.unwrap().unwrap();
    assert!(path.exists());

    // once written, not waiting is fine
    let result = cache.get_with(&file, options, |_, path| async { path }).await;
    assert_eq!(result.unwrap(), path);
}

#[tokio::test]
async fn test_cancelled_fetch_leaves_no_slot() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("stall/test-image.jpg"));

    let result = tokio::time::timeout(
        Duration::from_millis(300),
        cache.get(&file, |_, path| async { path }),
    )
    .await;

    assert!(result.is_err());
    assert!(!cache.slot_path(&file).exists());
}

#[tokio::test]
async fn test_callback_error_releases_slot() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-file.txt"));

    let result: Result<(), &str> = cache
        .get_once(&file, |_, _| async { Err("callback failed") })
        .await
        .unwrap();

    assert_eq!(result, Err("callback failed"));
    assert!(!cache.slot_path(&file).exists());
}
