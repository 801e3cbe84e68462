//! Support to read files from S3 buckets.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::ecs::EcsCredentialsProvider;
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::Client;
pub use aws_sdk_s3::Error as S3Error;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use filecache_sources::{AwsCredentialsProvider, S3StorageConfig};
use futures::TryStreamExt;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;

use crate::caching::FileCacheError;
use crate::utils::http::DownloadTimeouts;
use crate::utils::mime;

use super::{SourceStream, StorageBackend};

/// A storage backed by an S3 bucket.
///
/// The client is created lazily on first use, as loading the AWS configuration is async.
pub struct S3Backend {
    config: Arc<S3StorageConfig>,
    client: OnceCell<Client>,
    timeouts: DownloadTimeouts,
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.config.bucket)
            .field("prefix", &self.config.prefix)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl S3Backend {
    pub fn new(config: Arc<S3StorageConfig>, timeouts: DownloadTimeouts) -> Self {
        Self {
            config,
            client: OnceCell::new(),
            timeouts,
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                metric!(counter("source.s3.client.create") += 1);
                tracing::debug!(
                    "Using AWS credentials provider: {:?}",
                    self.config.aws_credentials_provider
                );
                match self.config.aws_credentials_provider {
                    AwsCredentialsProvider::Container => {
                        self.create_client(EcsCredentialsProvider::builder().build())
                            .await
                    }
                    AwsCredentialsProvider::Static => {
                        self.create_client(Credentials::from_keys(
                            self.config.access_key.clone(),
                            self.config.secret_key.clone(),
                            None,
                        ))
                        .await
                    }
                }
            })
            .await
    }

    async fn create_client(&self, provider: impl ProvideCredentials + 'static) -> Client {
        let mut config_loader = aws_config::from_env()
            .credentials_provider(provider)
            .region(Region::new(self.config.region.clone()));

        if let Some(endpoint_url) = &self.config.endpoint {
            config_loader = config_loader.endpoint_url(endpoint_url.as_str());
        }

        let config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(self.config.endpoint.is_some())
            .build();
        Client::from_conf(s3_config)
    }

    async fn head(&self, path: &str) -> Result<HeadObjectOutput, FileCacheError> {
        let key = self.config.key(path);
        let bucket = &self.config.bucket;
        tracing::trace!("Checking s3://{}/{}", bucket, key);

        let request = self.client().await.head_object().bucket(bucket).key(&key).send();
        let timeout = self.timeouts.total;
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FileCacheError::SourceTimedOut(timeout))?
            .map_err(|err| self.map_error(err, path))
    }

    /// Converts an S3 request error into the matching [`FileCacheError`].
    fn map_error<E, R>(&self, err: SdkError<E, R>, path: &str) -> FileCacheError
    where
        S3Error: From<SdkError<E, R>>,
    {
        if let SdkError::TimeoutError(_) = err {
            return FileCacheError::SourceTimedOut(self.timeouts.total);
        }

        let err = S3Error::from(err);
        match &err {
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NotFound(_) => {
                FileCacheError::NotFound(path.to_owned())
            }
            // The generic error conversion does not always produce the dedicated variants.
            _ if matches!(err.code(), Some("NoSuchBucket" | "NoSuchKey" | "NotFound")) => {
                FileCacheError::NotFound(path.to_owned())
            }
            _ => {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    "S3 request failed: {:?}",
                    err.code(),
                );
                FileCacheError::SourceInvalid(err.to_string())
            }
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn exists(&self, path: &str) -> Result<bool, FileCacheError> {
        match self.head(path).await {
            Ok(_) => Ok(true),
            Err(FileCacheError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn size(&self, path: &str) -> Result<u64, FileCacheError> {
        let head = self.head(path).await?;
        Ok(head
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .unwrap_or_default())
    }

    async fn mime_type(&self, path: &str) -> Result<String, FileCacheError> {
        let head = self.head(path).await?;
        Ok(head
            .content_type()
            .map(mime::essence)
            .unwrap_or_default()
            .to_owned())
    }

    async fn read_stream(&self, path: &str) -> Result<SourceStream, FileCacheError> {
        let key = self.config.key(path);
        let bucket = &self.config.bucket;
        tracing::debug!("Fetching from s3: {} (from {})", key, bucket);

        let request = self.client().await.get_object().bucket(bucket).key(&key).send();
        let timeout = self.timeouts.total;
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FileCacheError::SourceTimedOut(timeout))?
            .map_err(|err| self.map_error(err, path))?;

        let reader = response.body.into_async_read();
        Ok(Box::pin(ReaderStream::new(reader).map_err(|err| {
            FileCacheError::SourceInvalid(format!("failed to read S3 object: {err}"))
        })))
    }
}
