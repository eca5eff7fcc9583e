use chatvault::cloud_storage::LocalCloudStorage;
use chatvault::db::Database;
use chatvault::import::{ArchiveExtractor, BatchImporter, ImportLocks, ImportService};
use chatvault::media_store::MediaStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const CONVERSATION: i64 = -1009876;

const MAX_ARCHIVE_BYTES: u64 = 16 * 1024 * 1024;

/// File-backed database, local media storage and an importer, all under one temp dir
pub struct Harness {
    pub temp: TempDir,
    pub db: Database,
    pub media: MediaStore,
    pub locks: ImportLocks,
    pub import_dir: PathBuf,
    pub work_dir: PathBuf,
    pub media_dir: PathBuf,
    chunk_size: usize,
}

impl Harness {
    pub async fn new(chunk_size: usize) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let import_dir = temp.path().join("local_import");
        let work_dir = temp.path().join("work");
        let media_dir = temp.path().join("media");
        std::fs::create_dir_all(&import_dir).unwrap();

        let db_path = temp.path().join("chatvault.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let media = MediaStore::new(Arc::new(LocalCloudStorage::new(&media_dir)))
            .await
            .unwrap();

        Harness {
            temp,
            db,
            media,
            locks: ImportLocks::new(),
            import_dir,
            work_dir,
            media_dir,
            chunk_size,
        }
    }

    /// A service sharing this harness's store, media and lock registry
    pub fn service(&self) -> ImportService {
        ImportService::new(
            Arc::new(self.db.clone()),
            self.media.clone(),
            self.locks.clone(),
            self.chunk_size,
        )
    }

    pub fn importer(&self) -> BatchImporter {
        let extractor = ArchiveExtractor::new(Some(self.work_dir.clone()), MAX_ARCHIVE_BYTES);
        BatchImporter::new(extractor, self.service(), Duration::from_millis(10))
    }

    /// Working directories currently left behind
    pub fn leftover_work_dirs(&self) -> usize {
        std::fs::read_dir(&self.work_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
