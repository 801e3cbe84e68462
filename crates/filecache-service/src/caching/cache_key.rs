use std::fmt;

use sha2::{Digest, Sha256};

/// The name of a cache slot, derived from the URL of the file it holds.
///
/// This is the lowercase hex encoding of the sha-256 digest of the URL's UTF-8 bytes, so it is
/// always 64 characters long and identical URLs always map to the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey(String);

impl SlotKey {
    /// Derives the slot key for the given URL.
    pub fn from_url(url: &str) -> Self {
        Self(hex::encode(Sha256::digest(url.as_bytes())))
    }

    /// Returns the file name of the slot.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for SlotKey {
    fn as_ref(&self) -> &std::path::Path {
        self.0.as_ref()
    }
}
