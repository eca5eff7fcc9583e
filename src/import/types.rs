use serde::{Deserialize, Serialize};

/// Counters for one conversation import, published by value at each chunk boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    /// Records in the manifest
    pub total: usize,
    /// Records attempted so far (including failed chunks)
    pub processed: usize,
    /// Records written by committed chunks
    pub inserted: usize,
    /// Records already present (natural key exists)
    pub skipped: usize,
    pub media_uploaded: usize,
    pub error_count: usize,
    /// 1-based index of the last finished chunk, 0 before the first
    pub current_chunk: usize,
    pub total_chunks: usize,
}

impl ImportProgress {
    pub fn new(total: usize, chunk_size: usize) -> Self {
        ImportProgress {
            total,
            total_chunks: total.div_ceil(chunk_size.max(1)),
            ..Default::default()
        }
    }

    /// Share of records processed, 0-100
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = (self.processed as f64 / self.total as f64) * 100.0;
        percent.min(100.0) as u8
    }
}
