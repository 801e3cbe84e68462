//! Support to fetch files from HTTP servers.

use filecache_sources::RemoteLocation;
use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap};

use crate::caching::FileCacheError;
use crate::utils::http::DownloadTimeouts;
use crate::utils::mime;

use super::SourceStream;

/// The headers of a successful `HEAD` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteHead {
    /// The `Content-Type` without parameters, if the server sent one.
    pub content_type: Option<String>,
    /// The `Content-Length`, if the server sent a valid one.
    pub content_length: Option<u64>,
}

/// Fetches remote files with a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    timeouts: DownloadTimeouts,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client, timeouts: DownloadTimeouts) -> Self {
        Self { client, timeouts }
    }

    /// Sends a `HEAD` request for the file.
    ///
    /// Returns `None` if the request failed or the server did not respond with a success status.
    pub async fn head(&self, location: &RemoteLocation) -> Option<RemoteHead> {
        let request = self
            .client
            .head(location.request_url())
            .timeout(self.timeouts.total)
            .send();

        let response = match request.await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = &err as &dyn std::error::Error, "HEAD `{}` failed", location);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("HEAD `{}` returned {}", location, status);
            return None;
        }

        let headers = response.headers();
        Some(RemoteHead {
            content_type: last_header(headers, header::CONTENT_TYPE)
                .map(|value| mime::essence(value).to_owned()),
            content_length: last_header(headers, header::CONTENT_LENGTH)
                .and_then(|value| value.trim().parse().ok()),
        })
    }

    /// Sends a `GET` request for the file and returns the response body.
    pub async fn get(&self, location: &RemoteLocation) -> Result<SourceStream, FileCacheError> {
        tracing::debug!("Fetching from url: {}", location);
        let response = self
            .client
            .get(location.request_url())
            .send()
            .await
            .map_err(|err| self.map_error(err))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Unexpected status code from `{}`: {}", location, status);
            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    FileCacheError::NotFound(location.to_string())
                }
                _ => FileCacheError::SourceInvalid(format!("unexpected status {status}")),
            });
        }

        let downloader = self.clone();
        Ok(Box::pin(
            response
                .bytes_stream()
                .map_err(move |err| downloader.map_error(err)),
        ))
    }

    fn map_error(&self, err: reqwest::Error) -> FileCacheError {
        if err.is_timeout() {
            FileCacheError::SourceTimedOut(self.timeouts.total)
        } else {
            FileCacheError::from(err)
        }
    }
}

/// Returns the last value of a header, as servers and proxies may append duplicates.
fn last_header(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers
        .get_all(name)
        .iter()
        .next_back()
        .and_then(|value| value.to_str().ok())
}
