use crate::cloud_storage::{CloudStorage, CloudStorageError};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum MediaStoreError {
    /// The object store rejected an upload or read
    #[error("Media store unavailable: {0}")]
    StoreUnavailable(#[from] CloudStorageError),
    /// Bucket could not be created or reached at startup
    #[error("Failed to provision media store: {0}")]
    Provision(String),
}

/// Content key for a blob: lowercase hex SHA-256 of its bytes
pub fn content_key(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Content-addressable storage for message attachments
///
/// Identical bytes always map to the same key, so a blob is uploaded at most once
/// no matter how many messages reference it.
#[derive(Clone)]
pub struct MediaStore {
    storage: Arc<dyn CloudStorage>,
}

impl MediaStore {
    /// Wrap a storage backend, provisioning its container first.
    pub async fn new(storage: Arc<dyn CloudStorage>) -> Result<Self, MediaStoreError> {
        storage
            .ensure_container()
            .await
            .map_err(|e| MediaStoreError::Provision(e.to_string()))?;
        Ok(MediaStore { storage })
    }

    /// Store `data` under its content key and return the key.
    ///
    /// A failed existence probe is treated as "absent" and the upload proceeds;
    /// re-uploading identical content is harmless.
    pub async fn put(&self, data: &[u8], content_type: &str) -> Result<String, MediaStoreError> {
        let key = content_key(data);

        match self.storage.exists(&key).await {
            Ok(true) => {
                debug!("Media {} already stored, skipping upload", key);
                return Ok(key);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Existence probe for {} failed, uploading anyway: {}", key, e);
            }
        }

        self.storage.put_object(&key, data, content_type).await?;
        debug!("Stored media {} ({} bytes, {})", key, data.len(), content_type);
        Ok(key)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, MediaStoreError> {
        Ok(self.storage.exists(key).await?)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, MediaStoreError> {
        Ok(self.storage.get_object(key).await?)
    }
}
