//! Cache slots on disk, and the locking protocol that guards them.
//!
//! Every cached file lives in a single directory, in a slot named after the [`SlotKey`] of its
//! URL. All coordination between concurrent callers, in this or any other process, happens
//! through advisory `flock` locks on the slot files themselves:
//!
//! - A slot that does not exist yet is created with `O_EXCL`. The creator takes an exclusive
//!   lock, fills the file, and downgrades to a shared lock once it is complete.
//! - Anyone reading a slot holds a shared lock for as long as they use the file. Blocking on that
//!   lock is how readers wait for an in-flight write.
//! - A slot is only ever deleted by someone holding an exclusive lock on it. This is how
//!   cleanup skips files in use, and how a once-retrieval only deletes a file nobody else reads.
//! - An empty slot that can be locked exclusively was left behind by a crashed writer, and is
//!   removed and fetched again.
//!
//! Since a deleted slot may be re-created right away, every lock holder checks that its file is
//! still linked after acquiring the lock, and starts over otherwise.

mod cache_error;
mod cache_key;
mod cleanup;
mod slot;

pub use cache_error::FileCacheError;
pub use cache_key::SlotKey;
pub use cleanup::{ClearStats, PruneStats, clear, prune};
pub use slot::{
    LockWait, MAX_ATTEMPTS, Removal, SlotLock, SlotState, WriteSlot, acquire, try_remove,
};
