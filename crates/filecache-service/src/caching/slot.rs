use std::fs::{File, OpenOptions, remove_file};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;

use super::FileCacheError;

/// How many times slot resolution is attempted before giving up.
///
/// Every retry is caused by a concurrent writer or cleanup unlinking the slot underneath us, so
/// running out of attempts requires sustained contention on a single slot.
pub const MAX_ATTEMPTS: usize = 10;

/// The backoff between two slot resolution attempts.
const RETRY_DELAY: Duration = Duration::from_millis(20);

/// The outcome of [`try_remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The slot was deleted.
    Removed,
    /// The slot is in use and was left in place.
    Locked,
    /// The slot was already gone, deleted by someone else in the meantime.
    Missing,
}

/// Whether to wait for a slot that is currently being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    /// Block until the writer has finished.
    #[default]
    Block,
    /// Fail with [`FileCacheError::SlotLocked`] right away.
    Fail,
}

/// The outcome of resolving a cache slot.
#[derive(Debug)]
pub enum SlotState {
    /// The slot holds a complete file and is now held under a shared lock.
    Ready(SlotLock),
    /// The slot was freshly created and is held under an exclusive lock.
    ///
    /// The caller is responsible for filling it and calling [`WriteSlot::commit`].
    Vacant(WriteSlot),
}

/// A cache slot that is exclusively locked for writing.
///
/// Dropping it without calling [`commit`](Self::commit) unlinks the slot, so a failed or
/// cancelled fetch never leaves a partial file behind.
#[derive(Debug)]
pub struct WriteSlot {
    file: Option<File>,
    path: PathBuf,
}

impl WriteSlot {
    /// The open handle of the slot, positioned at the start of the empty file.
    pub fn file(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::other("write slot was already released"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the slot as complete and downgrades the exclusive lock to a shared one.
    ///
    /// Waiting readers are released by the downgrade and see the full file.
    pub fn commit(mut self) -> io::Result<SlotLock> {
        let file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("write slot was already released"))?;
        let path = std::mem::take(&mut self.path);

        if let Err(err) = fs2::FileExt::lock_shared(&file) {
            // The file may be partially visible to nobody but us, so get rid of it.
            if let Err(err) = unlink_locked(&file, &path) {
                log_slot_error(&path, &err, "Failed to remove uncommitted cache slot");
            }
            return Err(err);
        }

        Ok(SlotLock { file, path })
    }
}

impl Drop for WriteSlot {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            tracing::debug!("Discarding uncommitted cache slot `{}`", self.path.display());
            if let Err(err) = unlink_locked(&file, &self.path) {
                log_slot_error(&self.path, &err, "Failed to remove uncommitted cache slot");
            }
        }
    }
}

/// A complete cache slot held under a shared lock.
///
/// As long as this lock is alive, neither pruning nor a once-retrieval by another caller can
/// delete the file. Dropping it releases the lock without deleting anything.
#[derive(Debug)]
pub struct SlotLock {
    file: File,
    path: PathBuf,
}

impl SlotLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock.
    ///
    /// With `delete` set, the file is unlinked as well, unless another caller still holds a lock
    /// on it. Returns `true` if the file was deleted.
    pub fn release(self, delete: bool) -> bool {
        if !delete {
            return false;
        }

        match fs2::FileExt::try_lock_exclusive(&self.file) {
            Ok(()) => match unlink_locked(&self.file, &self.path) {
                Ok(deleted) => deleted,
                Err(err) => {
                    log_slot_error(&self.path, &err, "Failed to remove cache slot");
                    false
                }
            },
            Err(err) if is_contended(&err) => {
                tracing::trace!(
                    "Keeping cache slot `{}`, it is still in use",
                    self.path.display()
                );
                false
            }
            Err(err) => {
                log_slot_error(&self.path, &err, "Failed to lock cache slot for removal");
                false
            }
        }
    }
}

/// Resolves the cache slot at `path` to either a readable or a writable state.
///
/// This blocks on file locks and must not run on the async executor.
pub fn acquire(path: &Path, wait: LockWait) -> Result<SlotState, FileCacheError> {
    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            std::thread::sleep(RETRY_DELAY);
        }
        if let Some(state) = try_acquire(path, wait)? {
            return Ok(state);
        }
        tracing::trace!(attempt, "Cache slot `{}` changed, retrying", path.display());
    }

    Err(FileCacheError::Unresolved(MAX_ATTEMPTS))
}

/// A single resolution attempt. `None` means the slot changed underneath us.
fn try_acquire(path: &Path, wait: LockWait) -> Result<Option<SlotState>, FileCacheError> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => {
            fs2::FileExt::lock_exclusive(&file)?;
            // Between creating and locking, a reader may have taken the empty file for the
            // leftover of a crashed writer and removed it.
            if is_unlinked(&file)? {
                return Ok(None);
            }
            return Ok(Some(SlotState::Vacant(WriteSlot {
                file: Some(file),
                path: path.to_owned(),
            })));
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err.into()),
    }

    let Some(file) = catch_not_found(|| File::open(path))? else {
        return Ok(None);
    };

    match wait {
        LockWait::Block => fs2::FileExt::lock_shared(&file)?,
        LockWait::Fail => match fs2::FileExt::try_lock_shared(&file) {
            Ok(()) => {}
            Err(err) if is_contended(&err) => {
                return Err(FileCacheError::SlotLocked(path.to_owned()));
            }
            Err(err) => return Err(err.into()),
        },
    }

    let metadata = file.metadata()?;
    if is_unlinked(&file)? {
        return Ok(None);
    }

    if metadata.len() == 0 {
        // Committed slots are never empty, so this is either a writer that has not locked its
        // slot yet or the leftover of a writer that died. Only the latter can be locked here.
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                tracing::debug!("Removing stale cache slot `{}`", path.display());
                unlink_locked(&file, path)?;
            }
            Err(err) if is_contended(&err) => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(None);
    }

    touch(&file, path);

    Ok(Some(SlotState::Ready(SlotLock {
        file,
        path: path.to_owned(),
    })))
}

/// Marks a slot as recently used, which keeps it from being evicted first.
///
/// Setting explicit times requires owning the file, which a reader in another process may not.
/// A failure is logged and does not affect the hit. Returns `true` if the times were updated.
fn touch(file: &File, path: &Path) -> bool {
    let now = FileTime::now();
    match filetime::set_file_handle_times(file, Some(now), Some(now)) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "Failed to update access time of cache slot `{}`",
                path.display()
            );
            false
        }
    }
}

/// Tries to delete the slot at `path` if nobody holds a lock on it.
pub fn try_remove(path: &Path) -> io::Result<Removal> {
    let Some(file) = catch_not_found(|| File::open(path))? else {
        return Ok(Removal::Missing);
    };

    match fs2::FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(if unlink_locked(&file, path)? {
            Removal::Removed
        } else {
            Removal::Missing
        }),
        Err(err) if is_contended(&err) => Ok(Removal::Locked),
        Err(err) => Err(err),
    }
}

/// Unlinks the file at `path`, which must be exclusively locked through `file`.
///
/// If the file was already unlinked by a previous lock holder, the path may refer to a newer
/// slot by now, which must be left alone.
fn unlink_locked(file: &File, path: &Path) -> io::Result<bool> {
    if is_unlinked(file)? {
        return Ok(false);
    }
    Ok(catch_not_found(|| remove_file(path))?.is_some())
}

#[cfg(unix)]
fn is_unlinked(file: &File) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.nlink() == 0)
}

#[cfg(not(unix))]
fn is_unlinked(_file: &File) -> io::Result<bool> {
    Ok(false)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Converts a `NotFound` error into `Ok(None)`.
pub(crate) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(result) => Ok(Some(result)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn log_slot_error(path: &Path, err: &io::Error, message: &str) {
    sentry::with_scope(
        |scope| scope.set_extra("path", path.display().to_string().into()),
        || tracing::error!(error = %err, "{}", message),
    );
}
