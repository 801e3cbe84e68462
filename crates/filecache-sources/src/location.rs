//! Classification of file URLs.

use std::fmt;

/// Where the contents of a [`LogicalFile`](crate::LogicalFile) come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileLocation {
    /// A file served by a web server via `http://` or `https://`.
    Remote(RemoteLocation),
    /// A file stored on a named storage backend.
    Storage(StorageLocation),
}

impl FileLocation {
    /// Classifies the given file URL.
    ///
    /// URLs with an `http` or `https` scheme are [`Remote`](Self::Remote). Everything else is
    /// split at the first `://` into a storage backend name and the path on that backend. A URL
    /// without any `://` is treated as a backend name with an empty path, which will fail to
    /// resolve to a configured backend later on.
    pub fn parse(url: &str) -> Self {
        match url.split_once("://") {
            Some((scheme, _))
                if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
            {
                Self::Remote(RemoteLocation::new(url))
            }
            Some((backend, path)) => Self::Storage(StorageLocation::new(backend, path)),
            None => Self::Storage(StorageLocation::new(url, "")),
        }
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(remote) => remote.fmt(f),
            Self::Storage(storage) => storage.fmt(f),
        }
    }
}

/// The URL of a file on a web server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteLocation(String);

impl RemoteLocation {
    /// Creates a new [`RemoteLocation`].
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Returns the URL as given by the caller.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the URL with characters escaped that may legitimately appear in stored URLs but
    /// are not valid in a request line.
    ///
    /// Only spaces are escaped. Other reserved characters (like `+`) keep their meaning, which a
    /// full percent-encoding would change.
    pub fn request_url(&self) -> String {
        self.0.replace(' ', "%20")
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path on a named storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    backend: String,
    path: String,
}

impl StorageLocation {
    /// Creates a new [`StorageLocation`].
    pub fn new(backend: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            path: path.into(),
        }
    }

    /// The name of the storage backend.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// The path of the file relative to the storage backend root.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.backend, self.path)
    }
}
