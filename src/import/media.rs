use crate::import::manifest::MessageRecord;
use crate::import::normalize::{media_file_size, media_reference, resolve_media_path, RecordError};
use crate::media_store::{MediaStore, MediaStoreError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum MediaError {
    #[error(transparent)]
    Path(#[from] RecordError),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] MediaStoreError),
}

/// Attachment metadata after its bytes are in the media store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMedia {
    pub sha256: String,
    pub file_name: Option<String>,
    pub file_size: i64,
    pub mime_type: String,
}

/// Reads attachments out of an extracted export and stores them by content
pub struct MediaResolver<'a> {
    store: &'a MediaStore,
    root: &'a Path,
}

impl<'a> MediaResolver<'a> {
    pub fn new(store: &'a MediaStore, root: &'a Path) -> Self {
        MediaResolver { store, root }
    }

    /// Upload the record's attachment. `Ok(None)` when it has none.
    pub async fn resolve(&self, record: &MessageRecord) -> Result<Option<StoredMedia>, MediaError> {
        let Some(relative) = media_reference(record) else {
            return Ok(None);
        };

        let path = resolve_media_path(self.root, relative)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| MediaError::Read {
                path: path.clone(),
                source,
            })?;

        let mime_type = record
            .mime_type
            .as_deref()
            .filter(|mime| !mime.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| sniff_content_type(&data).to_string());

        let sha256 = self.store.put(&data, &mime_type).await?;
        debug!("Stored {} as {}", relative, sha256);

        let file_name = record.file_name.clone().or_else(|| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        });

        Ok(Some(StoredMedia {
            sha256,
            file_name,
            file_size: media_file_size(record).unwrap_or(data.len() as i64),
            mime_type,
        }))
    }
}

fn sniff_content_type(data: &[u8]) -> &'static str {
    infer::get(data)
        .map(|kind| kind.mime_type())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
