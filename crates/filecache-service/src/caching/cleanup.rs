use std::fs::{Metadata, read_dir};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use filetime::FileTime;

use crate::metric;

use super::slot::{Removal, catch_not_found, try_remove};

/// Statistics of a single [`prune`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    /// Files removed because they were not accessed within `max_age`.
    pub expired_files: usize,
    /// Files removed to bring the total size below `max_size`.
    pub evicted_files: usize,
    pub removed_bytes: u64,

    pub retained_files: usize,
    pub retained_bytes: u64,

    /// Files that were eligible for removal but are currently in use.
    pub locked_files: usize,
}

impl PruneStats {
    pub fn removed_files(&self) -> usize {
        self.expired_files + self.evicted_files
    }
}

/// Statistics of a single [`clear`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClearStats {
    pub removed_files: usize,
    pub removed_bytes: u64,
    /// Files that are currently in use and were left in place.
    pub locked_files: usize,
}

/// A regular file in the cache directory.
struct Entry {
    path: PathBuf,
    size: u64,
    accessed: FileTime,
}

impl Entry {
    fn new(path: PathBuf, metadata: &Metadata) -> Self {
        Self {
            path,
            size: metadata.len(),
            accessed: FileTime::from_last_access_time(metadata),
        }
    }
}

/// Removes files from the cache directory according to the retention limits.
///
/// First, every file that has not been accessed for longer than `max_age` is removed. If the
/// remaining files exceed `max_size` bytes in total, the least recently accessed files are
/// removed until they fit. Files that are currently locked are never removed.
///
/// A missing cache directory is not an error. Errors on individual files are logged and skipped.
pub fn prune(directory: &Path, max_age: Duration, max_size: u64) -> io::Result<PruneStats> {
    let start = Instant::now();
    let mut stats = PruneStats::default();

    let Some(entries) = list_entries(directory)? else {
        tracing::debug!("Cache directory `{}` does not exist", directory.display());
        return Ok(stats);
    };
    tracing::debug!("Pruning cache directory `{}`", directory.display());

    let cutoff = FileTime::from_system_time(
        SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH),
    );

    let mut total_size = 0;
    for entry in entries {
        if max_age.is_zero() || entry.accessed < cutoff {
            match remove_entry(&entry) {
                Some(Removal::Removed) => {
                    stats.expired_files += 1;
                    stats.removed_bytes += entry.size;
                    continue;
                }
                Some(Removal::Locked) => stats.locked_files += 1,
                Some(Removal::Missing) => continue,
                None => {}
            }
        }
        total_size += entry.size;
    }

    if total_size > max_size {
        // The first pass may have raced with new writes and reads, so look at the directory
        // again to get up to date sizes and access times.
        let mut entries = list_entries(directory)?.unwrap_or_default();
        entries.sort_by_key(|entry| entry.accessed);
        total_size = entries.iter().map(|entry| entry.size).sum();

        for entry in entries {
            if total_size <= max_size {
                break;
            }
            match remove_entry(&entry) {
                Some(Removal::Removed) => {
                    stats.evicted_files += 1;
                    stats.removed_bytes += entry.size;
                    total_size -= entry.size;
                }
                Some(Removal::Locked) => stats.locked_files += 1,
                Some(Removal::Missing) => total_size -= entry.size,
                None => {}
            }
        }
    }

    // Count what is left, including files that appeared in the meantime.
    for entry in list_entries(directory)?.unwrap_or_default() {
        stats.retained_files += 1;
        stats.retained_bytes += entry.size;
    }

    tracing::info!(
        "Pruned {} expired and {} evicted files, totaling {} bytes",
        stats.expired_files,
        stats.evicted_files,
        stats.removed_bytes,
    );
    tracing::info!(
        "Retained {} files, totaling {} bytes, {} files skipped while in use",
        stats.retained_files,
        stats.retained_bytes,
        stats.locked_files,
    );

    metric!(timer("caches.prune.duration") = start.elapsed());
    metric!(gauge("caches.size.files") = stats.retained_files as u64);
    metric!(gauge("caches.size.bytes") = stats.retained_bytes);
    metric!(counter("caches.prune.files_removed") += stats.expired_files as i64, "reason" => "age");
    metric!(counter("caches.prune.files_removed") += stats.evicted_files as i64, "reason" => "size");
    metric!(counter("caches.prune.bytes_removed") += stats.removed_bytes as i64);
    metric!(counter("caches.prune.files_locked") += stats.locked_files as i64);

    Ok(stats)
}

/// Removes every file from the cache directory that is not currently locked.
pub fn clear(directory: &Path) -> io::Result<ClearStats> {
    let mut stats = ClearStats::default();

    let Some(entries) = list_entries(directory)? else {
        tracing::debug!("Cache directory `{}` does not exist", directory.display());
        return Ok(stats);
    };

    for entry in entries {
        match remove_entry(&entry) {
            Some(Removal::Removed) => {
                stats.removed_files += 1;
                stats.removed_bytes += entry.size;
            }
            Some(Removal::Locked) => stats.locked_files += 1,
            Some(Removal::Missing) | None => {}
        }
    }

    tracing::info!(
        "Cleared {} files, totaling {} bytes, {} files skipped while in use",
        stats.removed_files,
        stats.removed_bytes,
        stats.locked_files,
    );
    metric!(counter("caches.clear.files_removed") += stats.removed_files as i64);

    Ok(stats)
}

/// Lists the regular, non-hidden files in `directory`.
///
/// Returns `None` if the directory does not exist.
fn list_entries(directory: &Path) -> io::Result<Option<Vec<Entry>>> {
    let Some(dir) = catch_not_found(|| read_dir(directory))? else {
        return Ok(None);
    };

    let mut entries = vec![];
    for dir_entry in dir {
        let dir_entry = dir_entry?;
        if dir_entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = dir_entry.path();
        // Use the metadata of the file itself, not the directory entry, to get a fresh atime.
        let metadata = match catch_not_found(|| path.metadata()) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => continue,
            Err(err) => {
                log_cleanup_error(&path, &err);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        entries.push(Entry::new(path, &metadata));
    }

    Ok(Some(entries))
}

/// Tries to remove a single entry. Returns `None` if removing it failed.
fn remove_entry(entry: &Entry) -> Option<Removal> {
    tracing::trace!("Removing file `{}`", entry.path.display());
    match try_remove(&entry.path) {
        Ok(removed) => Some(removed),
        Err(err) => {
            log_cleanup_error(&entry.path, &err);
            None
        }
    }
}

fn log_cleanup_error(path: &Path, err: &io::Error) {
    sentry::with_scope(
        |scope| scope.set_extra("path", path.display().to_string().into()),
        || tracing::error!("Failed to clean cache file: {:?}", err),
    );
}
