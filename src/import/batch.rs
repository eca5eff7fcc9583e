use crate::import::archive::{ArchiveExtractor, ExtractError};
use crate::import::progress::{ProgressReporter, PROGRESS_CHANNEL_CAPACITY};
use crate::import::service::{ImportError, ImportService};
use crate::import::types::ImportProgress;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ArchiveImportError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Import(#[from] ImportError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Every `.zip` under `dir` (any depth, extension case-insensitive), sorted
pub fn scan_for_archives(dir: &Path) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry while scanning {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
        })
        .collect();
    archives.sort();
    archives
}

/// Imports every archive found in a directory into one conversation
pub struct BatchImporter {
    extractor: ArchiveExtractor,
    service: ImportService,
    progress_interval: Duration,
}

impl BatchImporter {
    pub fn new(extractor: ArchiveExtractor, service: ImportService, progress_interval: Duration) -> Self {
        BatchImporter {
            extractor,
            service,
            progress_interval,
        }
    }

    /// Extract, import and release one archive.
    ///
    /// The working directory is released on every path.
    pub async fn import_archive(
        &self,
        conversation_id: i64,
        archive: &Path,
        cancel: CancellationToken,
    ) -> Result<ImportProgress, ArchiveImportError> {
        let mut extracted = self.extractor.extract(archive).await?;

        let label = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let reporter = ProgressReporter::new(label, self.progress_interval).spawn(progress_rx);

        let result = self
            .service
            .import(conversation_id, extracted.path(), progress_tx, cancel)
            .await;

        if let Err(e) = reporter.await {
            warn!("Progress reporter for {} failed: {}", archive.display(), e);
        }
        if let Err(e) = extracted.release() {
            warn!(
                "Failed to release working directory {}: {}",
                extracted.path().display(),
                e
            );
        }

        Ok(result?)
    }

    /// Import every archive under `dir`, deleting each one that imports cleanly.
    ///
    /// A failed archive is kept on disk and the batch moves on to the next one.
    pub async fn import_directory(
        &self,
        conversation_id: i64,
        dir: &Path,
        cancel: CancellationToken,
    ) -> BatchSummary {
        let archives = scan_for_archives(dir);
        let mut summary = BatchSummary {
            total: archives.len(),
            ..Default::default()
        };

        if archives.is_empty() {
            info!("No archives found in {}", dir.display());
            return summary;
        }

        info!(
            "Importing {} archive(s) from {} into conversation {}",
            archives.len(),
            dir.display(),
            conversation_id
        );

        for (index, archive) in archives.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Batch cancelled, {} archive(s) not attempted", archives.len() - index);
                summary.failed += archives.len() - index;
                break;
            }

            info!("Processing {} ({}/{})", archive.display(), index + 1, archives.len());

            match self
                .import_archive(conversation_id, archive, cancel.clone())
                .await
            {
                Ok(_) => {
                    summary.succeeded += 1;
                    match tokio::fs::remove_file(archive).await {
                        Ok(()) => info!("Deleted processed archive {}", archive.display()),
                        Err(e) => warn!(
                            "Failed to delete processed archive {}: {}",
                            archive.display(),
                            e
                        ),
                    }
                }
                Err(e) => {
                    error!("Failed to import {}: {}", archive.display(), e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Batch import finished: {} total, {} succeeded, {} failed",
            summary.total, summary.succeeded, summary.failed
        );
        summary
    }
}
