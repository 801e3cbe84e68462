use std::time::Duration;

use filecache_service::sources::GenericFile;

use crate::{Server, cached_files, read_fixture, set_accessed_ago, setup_cache};

#[tokio::test]
async fn test_prune_by_size() {
    let text_size = read_fixture("test-file.txt").len() as u64;
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_size = text_size;
    });
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));
    let text = GenericFile::new(server.url("files/test-file.txt"));

    let image_path = cache.get(&image, |_, path| async { path }).await.unwrap();
    let text_path = cache.get(&text, |_, path| async { path }).await.unwrap();
    set_accessed_ago(&image_path, Duration::from_secs(20));
    set_accessed_ago(&text_path, Duration::from_secs(10));

    let stats = cache.prune().unwrap();

    assert!(!image_path.exists());
    assert!(text_path.exists());
    assert_eq!(stats.evicted_files, 1);
    assert_eq!(stats.retained_bytes, text_size);
}

#[tokio::test]
async fn test_prune_evicts_least_recently_used() {
    let image_size = read_fixture("test-image.jpg").len() as u64;
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_size = image_size;
    });
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));
    let text = GenericFile::new(server.url("files/test-file.txt"));

    let image_path = cache.get(&image, |_, path| async { path }).await.unwrap();
    let text_path = cache.get(&text, |_, path| async { path }).await.unwrap();
    // the text file was used longer ago, so it goes first, even though it is smaller
    set_accessed_ago(&image_path, Duration::from_secs(10));
    set_accessed_ago(&text_path, Duration::from_secs(20));

    cache.prune().unwrap();

    assert!(image_path.exists());
    assert!(!text_path.exists());
}

#[tokio::test]
async fn test_prune_to_zero() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_size = 0;
    });
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));
    let text = GenericFile::new(server.url("files/test-file.txt"));

    cache.get(&image, |_, path| async { path }).await.unwrap();
    cache.get(&text, |_, path| async { path }).await.unwrap();

    let stats = cache.prune().unwrap();

    assert_eq!(stats.evicted_files, 2);
    assert!(cached_files(&cache).is_empty());
}

#[tokio::test]
async fn test_prune_by_age() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_age = Duration::from_secs(3600);
    });
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));
    let text = GenericFile::new(server.url("files/test-file.txt"));

    let image_path = cache.get(&image, |_, path| async { path }).await.unwrap();
    let text_path = cache.get(&text, |_, path| async { path }).await.unwrap();
    set_accessed_ago(&image_path, Duration::from_secs(2 * 3600));

    let stats = cache.prune().unwrap();

    assert!(!image_path.exists());
    assert!(text_path.exists());
    assert_eq!(stats.expired_files, 1);
    assert_eq!(stats.evicted_files, 0);
}

#[tokio::test]
async fn test_prune_zero_age() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_age = Duration::ZERO;
    });
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));

    cache.get(&image, |_, path| async { path }).await.unwrap();
    let stats = cache.prune().unwrap();

    assert_eq!(stats.expired_files, 1);
    assert!(cached_files(&cache).is_empty());
}

#[tokio::test]
async fn test_prune_skips_file_in_use() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_age = Duration::ZERO;
        config.max_size = 0;
    });
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));

    let cache_ref = &cache;
    let (path, stats) = cache
        .get(&image, |_, path| async move {
            let stats = cache_ref.prune().unwrap();
            assert!(path.exists());
            (path, stats)
        })
        .await
        .unwrap();

    assert_eq!(stats.removed_files(), 0);
    assert!(stats.locked_files > 0);
    assert!(path.exists());

    cache.prune().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_prune_ignores_hidden_files() {
    let (cache, _tempdir) = setup_cache(|config| {
        config.max_size = 0;
    });
    let hidden = cache.path().join(".gitignore");
    std::fs::write(&hidden, b"*").unwrap();

    cache.prune().unwrap();
    cache.clear().unwrap();

    assert!(hidden.exists());
}

#[tokio::test]
async fn test_missing_cache_directory() {
    let (cache, _tempdir) = setup_cache(|_| {});
    std::fs::remove_dir(cache.path()).unwrap();

    assert_eq!(cache.prune().unwrap().retained_files, 0);
    assert_eq!(cache.clear().unwrap().removed_files, 0);

    // the directory is created again on the next retrieval
    let server = Server::new();
    let file = GenericFile::new(server.url("files/test-file.txt"));
    let path = cache.get(&file, |_, path| async { path }).await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn test_clear() {
    let (cache, _tempdir) = setup_cache(|_| {});
    let server = Server::new();
    let image = GenericFile::new(server.url("files/test-image.jpg"));
    let text = GenericFile::new(server.url("files/test-file.txt"));

    cache.get(&text, |_, path| async { path }).await.unwrap();

    let cache_ref = &cache;
    let (path, stats) = cache
        .get(&image, |_, path| async move { (path, cache_ref.clear().unwrap()) })
        .await
        .unwrap();

    assert_eq!(stats.removed_files, 1);
    assert_eq!(stats.locked_files, 1);
    assert_eq!(cached_files(&cache), [path]);

    cache.clear().unwrap();
    assert!(cached_files(&cache).is_empty());
}
