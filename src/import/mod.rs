// # Import Module
//
// Bulk import of chat exports:
//
// - **ArchiveExtractor**: Unpacks an export archive into a private working directory
// - **Manifest**: Typed records decoded from the export's `result.json`
// - **Normalize**: Actor ids, action names, dates and message classification
// - **ImportService**: Chunked, transactional ingestion with progress events
// - **ProgressReporter**: Throttled logging of an import's progress stream
// - **BatchImporter**: Imports every archive found in a directory
//
// Public API:
// - `ImportService`: Import one extracted export
// - `ImportLocks`: Single-flight registry shared by services
// - `ImportProgress`: Snapshot published after every chunk

mod archive;
mod batch;
mod locks;
mod manifest;
mod media;
mod normalize;
mod progress;
mod service;
mod types;

pub use archive::{ArchiveExtractor, ExtractError, ExtractedArchive, MANIFEST_FILE_NAME};
pub use batch::{scan_for_archives, ArchiveImportError, BatchImporter, BatchSummary};
pub use locks::{ImportLockGuard, ImportLocks};
pub use manifest::{
    load_manifest, parse_manifest, ExportManifest, ExportRecord, ManifestError, MessageRecord,
    MessageText, ReactionRecord, RecentReaction, RecordHeader, ServiceRecord, TextPart, TextSpan,
};
pub use media::{MediaError, MediaResolver, StoredMedia};
pub use normalize::{
    classify_message, map_service_action, media_reference, parse_actor_id, parse_iso_date,
    resolve_date, resolve_media_path, RecordError,
};
pub use progress::{format_status, ProgressReporter, PROGRESS_CHANNEL_CAPACITY};
pub use service::{ImportError, ImportService};
pub use types::ImportProgress;
