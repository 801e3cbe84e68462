//! A local disk cache for remote and storage-backed files.
//!
//! The [`FileCache`](cache::FileCache) lets many concurrent callers, across threads and
//! processes, share cached copies of files without ever observing a partially written entry, and
//! without pruning deleting an entry which is still in use. See the [`caching`] module for the
//! locking protocol that makes this work.

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod caching;
pub mod config;
pub mod download;
pub mod logging;
pub mod utils;

pub use filecache_sources as sources;
