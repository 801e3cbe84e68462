//! Utilities dealing with the files a file cache is asked for.
//!
//! Includes the [`LogicalFile`] capability implemented by callers, the classification of file
//! URLs into remote and storage-backed locations, and the configuration of storage backends.

#![warn(missing_docs)]

mod file;
mod location;
mod sources;

pub use file::*;
pub use location::*;
pub use sources::*;
