use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The [`FileCacheError::SourceInvalid`] details of a source without any content.
const EMPTY_SOURCE: &str = "source is empty, empty files are not cached";

/// An error that happens while resolving a file through the [`FileCache`](crate::cache::FileCache).
///
/// None of these errors leave a slot file behind. A failed fetch unlinks the partially written
/// slot before the error reaches the caller.
#[derive(Debug, Error)]
pub enum FileCacheError {
    /// The file is larger than the configured `max_file_size`.
    #[error("file is too large, the maximum is {max_bytes} bytes")]
    TooLarge {
        /// The configured maximum size in bytes.
        max_bytes: u64,
    },
    /// The detected or advertised MIME type is not in the configured allow-list.
    #[error("MIME type `{0}` is not allowed")]
    MimeTypeNotAllowed(String),
    /// The source could not be fetched, like a connection failure or a non-success response.
    ///
    /// The attached string describes the failure. A source that was fetched successfully but has
    /// no content is rejected with this error as well, as an empty slot marks a crashed writer.
    /// Use [`is_empty_source`](Self::is_empty_source) to tell it apart from transport failures.
    #[error("invalid source: {0}")]
    SourceInvalid(String),
    /// Fetching the source did not make progress within the configured timeout.
    #[error("source timed out after {0:?}")]
    SourceTimedOut(Duration),
    /// The URL names a storage backend that is not configured.
    #[error("storage backend `{0}` is not configured")]
    BackendNotConfigured(String),
    /// The file does not exist at its source.
    #[error("file not found: {0}")]
    NotFound(String),
    /// The slot is held under an exclusive lock and the caller asked not to wait for it.
    #[error("cache slot `{}` is locked", .0.display())]
    SlotLocked(PathBuf),
    /// The slot kept vanishing under concurrent writers and cleanup.
    #[error("cache slot could not be resolved after {0} attempts")]
    Unresolved(usize),
    /// An unexpected filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for FileCacheError {
    fn from(err: reqwest::Error) -> Self {
        let mut source: &dyn std::error::Error = &err;
        while let Some(inner) = source.source() {
            source = inner;
        }
        Self::SourceInvalid(source.to_string())
    }
}

impl FileCacheError {
    pub(crate) fn empty_source() -> Self {
        Self::SourceInvalid(EMPTY_SOURCE.to_owned())
    }

    /// Whether the source was reachable but did not have any content.
    pub fn is_empty_source(&self) -> bool {
        matches!(self, Self::SourceInvalid(details) if details == EMPTY_SOURCE)
    }

    /// Returns a short, static name of the error kind, suitable as a metrics tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "too_large",
            Self::MimeTypeNotAllowed(_) => "mime_type_not_allowed",
            Self::SourceInvalid(_) if self.is_empty_source() => "source_empty",
            Self::SourceInvalid(_) => "source_invalid",
            Self::SourceTimedOut(_) => "timeout",
            Self::BackendNotConfigured(_) => "backend_not_configured",
            Self::NotFound(_) => "not_found",
            Self::SlotLocked(_) => "slot_locked",
            Self::Unresolved(_) => "unresolved",
            Self::Io(_) => "io",
        }
    }
}
