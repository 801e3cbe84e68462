use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for S3 storage buckets.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct S3StorageConfig {
    /// Name of the bucket in the S3 account.
    pub bucket: String,

    /// A path from the root of the bucket where files are located.
    #[serde(default)]
    pub prefix: String,

    /// The region of the S3 bucket.
    #[serde(default = "default_region")]
    pub region: String,

    /// A custom endpoint, for S3-compatible storages like minio.
    #[serde(default)]
    pub endpoint: Option<Url>,

    /// AWS IAM credentials provider for obtaining S3 access.
    #[serde(default)]
    pub aws_credentials_provider: AwsCredentialsProvider,

    /// S3 authorization key.
    #[serde(default)]
    pub access_key: String,

    /// S3 secret key.
    #[serde(default)]
    pub secret_key: String,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl S3StorageConfig {
    /// Returns the S3 key of a file path, relative to the configured prefix.
    pub fn key(&self, path: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        let path = path.trim_start_matches('/');
        if prefix.is_empty() {
            path.to_owned()
        } else {
            format!("{prefix}/{path}")
        }
    }
}

/// The types of Amazon IAM credentials providers we support.
///
/// For details on the AWS side, see:
/// <https://docs.aws.amazon.com/AmazonECS/latest/developerguide/task-iam-roles.html>.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AwsCredentialsProvider {
    /// Static Credentials
    #[default]
    Static,
    /// Credentials derived from the container.
    Container,
}
