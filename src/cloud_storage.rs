use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, ByteStreamError};
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CloudStorageError {
    #[error("S3 SDK error: {0}")]
    SdkError(String),
    #[error("ByteStream error: {0}")]
    ByteStream(#[from] ByteStreamError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// S3 configuration for the media bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>, // For MinIO/S3-compatible services
}

impl S3Config {
    pub fn validate(&self) -> Result<(), CloudStorageError> {
        if self.bucket_name.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Region cannot be empty".to_string(),
            ));
        }
        if self.access_key_id.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Access key ID cannot be empty".to_string(),
            ));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(CloudStorageError::Config(
                "Secret access key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Key/value object storage (allows mocking for tests)
///
/// Implementations must make a single `put_object` atomic per key: a concurrent
/// reader sees either no object or the complete one, never a partial write.
#[async_trait::async_trait]
pub trait CloudStorage: Send + Sync {
    /// Make sure the bucket (or root directory) exists
    async fn ensure_container(&self) -> Result<(), CloudStorageError>;
    async fn exists(&self, key: &str) -> Result<bool, CloudStorageError>;
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), CloudStorageError>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CloudStorageError>;
}

/// Production S3 cloud storage implementation
pub struct S3CloudStorage {
    client: Client,
    bucket_name: String,
}

impl S3CloudStorage {
    /// Create a new S3 cloud storage client
    pub async fn new(config: S3Config) -> Result<Self, CloudStorageError> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None, // session_token
            None, // expiration
            "chatvault-s3-config",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);

        // S3-compatible services (MinIO) are addressed by path, not virtual host
        if let Some(endpoint) = config.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(S3CloudStorage {
            client: Client::from_conf(s3_config.build()),
            bucket_name: config.bucket_name,
        })
    }
}

#[async_trait::async_trait]
impl CloudStorage for S3CloudStorage {
    async fn ensure_container(&self) -> Result<(), CloudStorageError> {
        match self
            .client
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if !missing {
                    return Err(CloudStorageError::SdkError(format!(
                        "Head bucket failed: {}",
                        DisplayErrorContext(&e)
                    )));
                }
            }
        }

        info!("S3CloudStorage: Creating bucket {}", self.bucket_name);

        match self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let already_ours = e
                    .as_service_error()
                    .map(|se| se.is_bucket_already_owned_by_you())
                    .unwrap_or(false);
                if already_ours {
                    Ok(())
                } else {
                    Err(CloudStorageError::SdkError(format!(
                        "Create bucket failed: {}",
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, CloudStorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if missing {
                    Ok(false)
                } else {
                    Err(CloudStorageError::SdkError(format!(
                        "Head object failed: {}",
                        DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), CloudStorageError> {
        debug!("S3CloudStorage: Uploading {} ({} bytes)", key, data.len());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                CloudStorageError::SdkError(format!(
                    "Put object failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CloudStorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false)
                {
                    CloudStorageError::NotFound(key.to_string())
                } else {
                    CloudStorageError::SdkError(format!(
                        "Get object failed: {}",
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        let data = response.body.collect().await?.into_bytes().to_vec();
        Ok(data)
    }
}

/// Filesystem-backed storage for development and single-host deployments
///
/// Objects live at `<root>/<first two key chars>/<key>`.
pub struct LocalCloudStorage {
    root: PathBuf,
}

impl LocalCloudStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalCloudStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        match key.get(..2) {
            Some(prefix) => self.root.join(prefix).join(key),
            // Fallback for malformed keys
            None => self.root.join("misc").join(key),
        }
    }
}

#[async_trait::async_trait]
impl CloudStorage for LocalCloudStorage {
    async fn ensure_container(&self) -> Result<(), CloudStorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CloudStorageError> {
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), CloudStorageError> {
        let path = self.object_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| CloudStorageError::Config(format!("Invalid object key: {}", key)))?;
        fs::create_dir_all(parent).await?;

        // Write beside the target, then rename into place
        let staging = parent.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        fs::write(&staging, data).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!("LocalCloudStorage: Stored {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CloudStorageError> {
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudStorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_s3_config_validation() {
        let config = S3Config {
            bucket_name: "chat-media".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            endpoint_url: Some("http://localhost:9000".to_string()),
        };
        assert!(config.validate().is_ok());

        let missing_bucket = S3Config {
            bucket_name: " ".to_string(),
            ..config
        };
        assert!(matches!(
            missing_bucket.validate(),
            Err(CloudStorageError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_local_storage_put_and_get() {
        let temp = TempDir::new().unwrap();
        let storage = LocalCloudStorage::new(temp.path().join("objects"));
        storage.ensure_container().await.unwrap();
        assert!(storage.root().is_dir());

        assert!(!storage.exists("abcdef").await.unwrap());
        storage
            .put_object("abcdef", b"payload", "text/plain")
            .await
            .unwrap();
        assert!(storage.exists("abcdef").await.unwrap());
        assert_eq!(storage.get_object("abcdef").await.unwrap(), b"payload");
        assert!(temp.path().join("objects").join("ab").join("abcdef").is_file());
    }

    #[tokio::test]
    async fn test_local_storage_missing_object() {
        let temp = TempDir::new().unwrap();
        let storage = LocalCloudStorage::new(temp.path());

        let result = storage.get_object("ffff").await;
        assert!(matches!(result, Err(CloudStorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_storage_leaves_no_staging_files() {
        let temp = TempDir::new().unwrap();
        let storage = LocalCloudStorage::new(temp.path());
        storage.put_object("abcd", b"one", "text/plain").await.unwrap();
        storage.put_object("abcd", b"one", "text/plain").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp.path().join("ab"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("abcd")]);
    }
}
