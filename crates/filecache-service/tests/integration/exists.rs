use std::sync::Arc;

use filecache_service::caching::FileCacheError;
use filecache_service::download::StorageBackends;
use filecache_service::sources::GenericFile;

use crate::{MemoryBackend, Server, cached_files, setup_cache, setup_cache_with_backends};

#[tokio::test]
async fn test_exists_remote() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();

    let file = GenericFile::new(server.url("files/test-image.jpg"));
    assert!(cache.exists(&file).await.unwrap());

    let file = GenericFile::new(server.url("status/404"));
    assert!(!cache.exists(&file).await.unwrap());

    let file = GenericFile::new(server.url("status/500"));
    assert!(!cache.exists(&file).await.unwrap());

    // never touches the cache
    assert!(cached_files(&cache).is_empty());
}

#[tokio::test]
async fn test_exists_remote_too_large() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_file_size = Some(10);
    });
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-image.jpg"));

    let result = cache.exists(&file).await;

    assert!(matches!(result, Err(FileCacheError::TooLarge { max_bytes: 10 })));
}

#[tokio::test]
async fn test_exists_remote_mime_type() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.mime_types = vec!["image/jpeg".into()];
    });
    let server = Server::new();

    let file = GenericFile::new(server.url("files/test-file.txt"));
    let result = cache.exists(&file).await;
    assert!(matches!(result, Err(FileCacheError::MimeTypeNotAllowed(ref ty)) if ty == "text/plain"));

    let file = GenericFile::new(server.url("files/test-image.jpg"));
    assert!(cache.exists(&file).await.unwrap());
}

#[tokio::test]
async fn test_exists_local_disk() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.mime_types = vec!["image/jpeg".into()];
    });

    assert!(cache.exists(&GenericFile::new("test-disk://test-image.jpg")).await.unwrap());
    assert!(!cache.exists(&GenericFile::new("test-disk://missing.jpg")).await.unwrap());

    let result = cache.exists(&GenericFile::new("test-disk://test-file.txt")).await;
    assert!(matches!(result, Err(FileCacheError::MimeTypeNotAllowed(_))));
}

#[tokio::test]
async fn test_exists_custom_backend() {
    let backend = MemoryBackend::default().with_object("big.bin", "application/octet-stream", &[0; 64]);
    let backends = StorageBackends::default().with_backend("memory", Arc::new(backend));
    let (cache, _tempdir) = setup_cache_with_backends(
        |config| {
            config.max_file_size = Some(32);
        },
        backends,
    );

    assert!(!cache.exists(&GenericFile::new("memory://missing.bin")).await.unwrap());
    let result = cache.exists(&GenericFile::new("memory://big.bin")).await;
    assert!(matches!(result, Err(FileCacheError::TooLarge { max_bytes: 32 })));
}

#[tokio::test]
async fn test_exists_unconfigured_disk() {
    let (cache, _tempdir) = setup_cache(|_| {});

    let result = cache.exists(&GenericFile::new("nowhere://file.txt")).await;

    assert!(matches!(result, Err(FileCacheError::BackendNotConfigured(ref name)) if name == "nowhere"));
}
