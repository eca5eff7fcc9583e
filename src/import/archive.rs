use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Manifest file expected at the root of every export
pub const MANIFEST_FILE_NAME: &str = "result.json";

const WORK_DIR_PREFIX: &str = "chatvault-import-";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),
    #[error("Archive is {size} bytes, limit is {max} bytes")]
    ArchiveTooLarge { size: u64, max: u64 },
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unpacks export archives into exclusively owned working directories
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    /// Parent for working directories; system temp dir when None
    work_root: Option<PathBuf>,
    max_archive_bytes: u64,
}

/// An extracted export. The working directory is removed by `release` or on drop.
#[derive(Debug)]
pub struct ExtractedArchive {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ArchiveExtractor {
    pub fn new(work_root: Option<PathBuf>, max_archive_bytes: u64) -> Self {
        ArchiveExtractor {
            work_root,
            max_archive_bytes,
        }
    }

    /// Extract `archive_path` and confirm the manifest is present at the root.
    ///
    /// On any failure the partially written working directory is removed before
    /// the error is returned.
    pub async fn extract(&self, archive_path: &Path) -> Result<ExtractedArchive, ExtractError> {
        let size = tokio::fs::metadata(archive_path).await?.len();
        if size > self.max_archive_bytes {
            return Err(ExtractError::ArchiveTooLarge {
                size,
                max: self.max_archive_bytes,
            });
        }

        let dir = match &self.work_root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                tempfile::Builder::new()
                    .prefix(WORK_DIR_PREFIX)
                    .tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix(WORK_DIR_PREFIX).tempdir()?,
        };

        info!(
            "Extracting {} ({} bytes) into {}",
            archive_path.display(),
            size,
            dir.path().display()
        );

        let archive_path = archive_path.to_path_buf();
        let dest = dir.path().to_path_buf();
        let result = tokio::task::spawn_blocking(move || unpack(&archive_path, &dest))
            .await
            .map_err(|e| ExtractError::Io(std::io::Error::other(e)))?;

        // Dropping `dir` on the error paths removes the partial extraction
        let entries = result?;

        if !dir.path().join(MANIFEST_FILE_NAME).is_file() {
            return Err(ExtractError::MalformedArchive(format!(
                "{} not found at archive root",
                MANIFEST_FILE_NAME
            )));
        }

        debug!("Extracted {} entries", entries);

        Ok(ExtractedArchive {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }
}

impl ExtractedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE_NAME)
    }

    /// Remove the working directory. Safe to call more than once.
    pub fn release(&mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                debug!("Releasing working directory {}", self.path.display());
                dir.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for ExtractedArchive {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(
                "Failed to remove working directory {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Write every archive entry under `dest`, returning the entry count.
fn unpack(archive_path: &Path, dest: &Path) -> Result<usize, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| ExtractError::MalformedArchive(format!("unreadable zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        // Rejects absolute paths and `..` components
        let relative = entry.enclosed_name().ok_or_else(|| {
            ExtractError::MalformedArchive(format!(
                "entry escapes working directory: {}",
                entry.name()
            ))
        })?;
        let output_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&output_path)?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut output = File::create(&output_path)?;
        std::io::copy(&mut entry, &mut output)?;
    }

    Ok(archive.len())
}
