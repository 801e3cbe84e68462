use std::fmt;

/// A file which can be retrieved through a file cache.
///
/// The only thing a file cache needs to know about a file is its URL. This may be a remote URL
/// starting with `http://` or `https://`, or a storage backend path of the form
/// `[backend-name]://[path]`.
///
/// Domain types (images, videos, documents, ...) implement this trait to be retrievable directly,
/// without being converted into a [`GenericFile`] first.
pub trait LogicalFile: Send + Sync {
    /// Returns the URL identifying this file.
    fn url(&self) -> &str;
}

impl<T: LogicalFile + ?Sized> LogicalFile for &T {
    fn url(&self) -> &str {
        (**self).url()
    }
}

impl<T: LogicalFile + ?Sized> LogicalFile for std::sync::Arc<T> {
    fn url(&self) -> &str {
        (**self).url()
    }
}

/// A [`LogicalFile`] which is nothing but its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericFile {
    url: String,
}

impl GenericFile {
    /// Creates a new [`GenericFile`] for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl LogicalFile for GenericFile {
    fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for GenericFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl From<&str> for GenericFile {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for GenericFile {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}
