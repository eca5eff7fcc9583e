use crate::import::types::ImportProgress;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Capacity of the progress channel handed to `ImportService::import`
pub const PROGRESS_CHANNEL_CAPACITY: usize = 10;

/// Consumes an import's progress stream and logs throttled status lines
pub struct ProgressReporter {
    label: String,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        ProgressReporter {
            label: label.into(),
            interval,
        }
    }

    /// Drain `progress_rx` until the sender closes it, returning the last snapshot.
    pub async fn run(self, mut progress_rx: mpsc::Receiver<ImportProgress>) -> Option<ImportProgress> {
        let mut latest = None;
        let mut last_logged: Option<Instant> = None;

        while let Some(snapshot) = progress_rx.recv().await {
            latest = Some(snapshot);

            let due = last_logged
                .map(|at| at.elapsed() >= self.interval)
                .unwrap_or(true);
            if due {
                info!("{}: {}", self.label, format_status(&snapshot));
                last_logged = Some(Instant::now());
            }
        }

        if let Some(last) = &latest {
            info!(
                "{}: import complete. {} records, {} inserted, {} skipped, {} media, {} errors",
                self.label,
                last.total,
                last.inserted,
                last.skipped,
                last.media_uploaded,
                last.error_count
            );
        }

        latest
    }

    pub fn spawn(self, progress_rx: mpsc::Receiver<ImportProgress>) -> JoinHandle<Option<ImportProgress>> {
        tokio::spawn(self.run(progress_rx))
    }
}

/// One-line status: chunk, processed share and counters
pub fn format_status(progress: &ImportProgress) -> String {
    format!(
        "chunk {}/{}, {}/{} records ({}%), {} inserted, {} skipped, {} media, {} errors",
        progress.current_chunk,
        progress.total_chunks,
        progress.processed,
        progress.total,
        progress.percent(),
        progress.inserted,
        progress.skipped,
        progress.media_uploaded,
        progress.error_count
    )
}
