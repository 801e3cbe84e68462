//! Detection and matching of MIME types.

use std::io;
use std::path::Path;

use tokio::io::AsyncReadExt;

/// The number of leading bytes used to detect the type of a file.
pub const SNIFF_LEN: usize = 8 * 1024;

/// Detects the MIME type of a file from its leading bytes.
///
/// Known binary formats are recognized by their magic bytes. Anything else is `text/plain` if it
/// is valid UTF-8 and `application/octet-stream` otherwise.
pub fn detect(head: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }
    if is_text(head) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Detects the MIME type of the file at `path`.
pub async fn detect_file(path: &Path) -> io::Result<&'static str> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(detect(&head))
}

/// Whether `head` is valid UTF-8, tolerating a code point cut off at the end.
fn is_text(head: &[u8]) -> bool {
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none() && head.len() == SNIFF_LEN,
    }
}

/// Strips parameters like `; charset=utf-8` from a `Content-Type` value.
pub fn essence(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
}

/// Whether `mime_type` passes the allow-list. An empty list allows everything.
pub fn is_allowed(allowed: &[String], mime_type: &str) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
}
