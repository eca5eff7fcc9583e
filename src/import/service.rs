// # Import Service - Orchestrator
//
// Loads one extracted export into the relational store:
// - single-flight per conversation through `ImportLocks`
// - records are processed in manifest order, in fixed-size chunks
// - each chunk is one transaction; a failed commit loses that chunk only
// - a chunk's media is uploaded before its transaction opens, so the write lock
//   never waits on the object store
// - per-record failures are logged and counted, never fatal
// - a progress snapshot is published after every chunk
//
// Dropping the progress sender when `import` returns closes the stream, which is
// how the consumer learns the import is over.

use crate::db::{
    DbConversation, DbMessage, DbParticipant, DbReaction, DbServiceEvent, ImportStore,
    ImportTransaction,
};
use crate::import::archive::MANIFEST_FILE_NAME;
use crate::import::locks::ImportLocks;
use crate::import::manifest::{load_manifest, ExportRecord, ManifestError, MessageRecord, ServiceRecord};
use crate::import::media::{MediaResolver, StoredMedia};
use crate::import::normalize::{
    classify_message, map_service_action, media_file_size, media_reference, parse_actor_id,
    parse_iso_date, resolve_date, service_metadata,
};
use crate::import::types::ImportProgress;
use crate::media_store::MediaStore;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Fallback when a service record carries no action keyword
const UNKNOWN_ACTION: &str = "unknown";

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("An import is already running for conversation {0}")]
    ImportAlreadyRunning(i64),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("Import cancelled")]
    Cancelled,
}

/// Runs conversation imports against a relational store and a media store
#[derive(Clone)]
pub struct ImportService {
    store: Arc<dyn ImportStore>,
    media: MediaStore,
    locks: ImportLocks,
    chunk_size: usize,
}

/// Counts for one chunk, folded into the progress after the commit decision
#[derive(Debug, Default)]
struct ChunkTally {
    inserted: usize,
    skipped: usize,
    media_uploaded: usize,
    errors: usize,
}

/// Whether the chunk's writes survived
struct ChunkOutcome {
    committed: bool,
    tally: ChunkTally,
}

impl ImportService {
    pub fn new(
        store: Arc<dyn ImportStore>,
        media: MediaStore,
        locks: ImportLocks,
        chunk_size: usize,
    ) -> Self {
        ImportService {
            store,
            media,
            locks,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn locks(&self) -> &ImportLocks {
        &self.locks
    }

    /// Import the export extracted at `working_dir` into `conversation_id`.
    ///
    /// Returns the final progress snapshot. Committed chunks stay committed when
    /// this returns an error.
    pub async fn import(
        &self,
        conversation_id: i64,
        working_dir: &Path,
        progress_tx: mpsc::Sender<ImportProgress>,
        cancel: CancellationToken,
    ) -> Result<ImportProgress, ImportError> {
        let _lock = self
            .locks
            .try_acquire(conversation_id)
            .ok_or(ImportError::ImportAlreadyRunning(conversation_id))?;

        let manifest = load_manifest(&working_dir.join(MANIFEST_FILE_NAME)).await?;
        if manifest.id != 0 && manifest.id != conversation_id {
            debug!(
                "Manifest id {} differs from target conversation {}",
                manifest.id, conversation_id
            );
        }

        let conversation = DbConversation::new(
            conversation_id,
            manifest.kind.as_deref().unwrap_or("unknown"),
            manifest.name.as_deref().unwrap_or_default(),
        );
        let media = MediaResolver::new(&self.media, working_dir);
        let mut progress = ImportProgress::new(manifest.records.len(), self.chunk_size);
        let mut publishing = true;

        info!(
            "Importing {} records into conversation {} ({} chunks of up to {})",
            progress.total, conversation_id, progress.total_chunks, self.chunk_size
        );

        for (index, chunk) in manifest.records.chunks(self.chunk_size).enumerate() {
            let outcome = self.process_chunk(&conversation, chunk, &media).await;

            progress.processed += chunk.len();
            progress.media_uploaded += outcome.tally.media_uploaded;
            progress.error_count += outcome.tally.errors;
            if outcome.committed {
                progress.inserted += outcome.tally.inserted;
                progress.skipped += outcome.tally.skipped;
            } else {
                progress.error_count += 1;
            }
            progress.current_chunk = index + 1;

            debug!(
                "Conversation {} chunk {}/{}: {:?}",
                conversation_id, progress.current_chunk, progress.total_chunks, progress
            );

            if publishing {
                publishing = publish(&progress_tx, progress, &cancel).await?;
            } else if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
        }

        info!(
            "Import of conversation {} finished: {} inserted, {} skipped, {} media, {} errors",
            conversation_id,
            progress.inserted,
            progress.skipped,
            progress.media_uploaded,
            progress.error_count
        );

        Ok(progress)
    }

    /// Run one chunk inside its own transaction.
    async fn process_chunk(
        &self,
        conversation: &DbConversation,
        chunk: &[ExportRecord],
        media: &MediaResolver<'_>,
    ) -> ChunkOutcome {
        let mut tally = ChunkTally::default();
        let prepared = self
            .prepare_media(conversation.id, chunk, media, &mut tally)
            .await;

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Conversation {}: failed to open transaction: {}",
                    conversation.id, e
                );
                return ChunkOutcome {
                    committed: false,
                    tally,
                };
            }
        };

        if let Err(e) = tx.upsert_conversation(conversation).await {
            error!(
                "Conversation {}: failed to upsert conversation: {}",
                conversation.id, e
            );
            if let Err(e) = tx.rollback().await {
                warn!("Conversation {}: rollback failed: {}", conversation.id, e);
            }
            return ChunkOutcome {
                committed: false,
                tally,
            };
        }

        for (record, stored_media) in chunk.iter().zip(prepared) {
            match record {
                ExportRecord::Message(message) => {
                    self.import_message(
                        tx.as_mut(),
                        conversation.id,
                        message,
                        stored_media,
                        &mut tally,
                    )
                    .await
                }
                ExportRecord::Service(service) => {
                    self.import_service_event(tx.as_mut(), conversation.id, service, &mut tally)
                        .await
                }
                ExportRecord::Unsupported => {
                    warn!(
                        "Conversation {}: skipping record of unsupported type",
                        conversation.id
                    );
                    tally.errors += 1;
                }
            }
        }

        match tx.commit().await {
            Ok(()) => ChunkOutcome {
                committed: true,
                tally,
            },
            Err(e) => {
                error!(
                    "Conversation {}: chunk commit failed, {} records lost: {}",
                    conversation.id,
                    tally.inserted,
                    e
                );
                ChunkOutcome {
                    committed: false,
                    tally,
                }
            }
        }
    }

    /// Upload the chunk's attachments ahead of its transaction.
    ///
    /// The result lines up with `chunk`. Records already stored or without a usable
    /// date get `None`; the transactional pass skips or counts them.
    async fn prepare_media(
        &self,
        conversation_id: i64,
        chunk: &[ExportRecord],
        media: &MediaResolver<'_>,
        tally: &mut ChunkTally,
    ) -> Vec<Option<StoredMedia>> {
        let mut prepared = Vec::with_capacity(chunk.len());

        for record in chunk {
            let ExportRecord::Message(message) = record else {
                prepared.push(None);
                continue;
            };
            if media_reference(message).is_none() || resolve_date(&message.header).is_err() {
                prepared.push(None);
                continue;
            }

            let source_id = message.header.id;
            match self.store.message_exists(conversation_id, source_id).await {
                Ok(true) => {
                    prepared.push(None);
                    continue;
                }
                Ok(false) => {}
                // Counted by the transactional lookup if it fails again
                Err(e) => debug!(
                    "Conversation {} message {}: pre-upload lookup failed: {}",
                    conversation_id, source_id, e
                ),
            }

            let stored = match media.resolve(message).await {
                Ok(stored) => {
                    if stored.is_some() {
                        tally.media_uploaded += 1;
                    }
                    stored
                }
                Err(e) => {
                    warn!(
                        "Conversation {} message {}: media skipped: {}",
                        conversation_id, source_id, e
                    );
                    tally.errors += 1;
                    None
                }
            };
            prepared.push(stored);
        }

        prepared
    }

    async fn import_message(
        &self,
        tx: &mut dyn ImportTransaction,
        conversation_id: i64,
        record: &MessageRecord,
        stored_media: Option<StoredMedia>,
        tally: &mut ChunkTally,
    ) {
        let source_id = record.header.id;

        match tx.message_exists(conversation_id, source_id).await {
            Ok(true) => {
                trace!("Conversation {} message {} already stored", conversation_id, source_id);
                tally.skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Conversation {} message {}: existence check failed: {}",
                    conversation_id, source_id, e
                );
                tally.errors += 1;
                return;
            }
        }

        let sent_at = match resolve_date(&record.header) {
            Ok(date) => date,
            Err(e) => {
                warn!("Conversation {} message {}: {}", conversation_id, source_id, e);
                tally.errors += 1;
                return;
            }
        };

        let sender_id = resolve_actor(
            tx,
            conversation_id,
            source_id,
            record.from_id.as_deref(),
            record.from.as_deref(),
            tally,
        )
        .await;

        let forwarded_from_id = record
            .forwarded_from_id
            .as_deref()
            .and_then(|raw| parse_actor_id(raw).ok());
        let text = record.text.to_plain();
        let entities = if record.text_entities.is_empty() {
            None
        } else {
            serde_json::to_string(&record.text_entities).ok()
        };

        let message = DbMessage {
            id: 0,
            conversation_id,
            source_message_id: source_id,
            sender_id,
            sent_at,
            message_type: classify_message(record),
            text: (!text.is_empty()).then_some(text),
            reply_to_message_id: record.reply_to_message_id,
            forwarded_from_id,
            forwarded_from_name: record.forwarded_from.clone(),
            media_sha256: stored_media.as_ref().map(|m| m.sha256.clone()),
            // Declared metadata survives a missing or failed upload
            media_file_name: stored_media
                .as_ref()
                .and_then(|m| m.file_name.clone())
                .or_else(|| record.file_name.clone()),
            media_file_size: stored_media
                .as_ref()
                .map(|m| m.file_size)
                .or_else(|| media_file_size(record)),
            media_mime_type: stored_media
                .map(|m| m.mime_type)
                .or_else(|| record.mime_type.clone()),
            media_duration_seconds: record.duration_seconds,
            media_width: record.width,
            media_height: record.height,
            entities,
        };

        let message_id = match tx.insert_message(&message).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Conversation {} message {}: insert failed: {}",
                    conversation_id, source_id, e
                );
                tally.errors += 1;
                return;
            }
        };
        tally.inserted += 1;

        for reaction in &record.reactions {
            let Some(emoji) = reaction.emoji.as_deref() else {
                continue;
            };
            for reactor in &reaction.recent {
                let Some(participant_id) = resolve_actor(
                    tx,
                    conversation_id,
                    source_id,
                    reactor.from_id.as_deref(),
                    reactor.from.as_deref(),
                    tally,
                )
                .await
                else {
                    continue;
                };

                let created_at = reactor
                    .date
                    .as_deref()
                    .and_then(|raw| parse_iso_date(raw).ok())
                    .unwrap_or(sent_at);
                let row = DbReaction {
                    id: 0,
                    message_id,
                    participant_id,
                    emoji: emoji.to_string(),
                    created_at,
                };
                if let Err(e) = tx.insert_reaction(&row).await {
                    warn!(
                        "Conversation {} message {}: reaction {} failed: {}",
                        conversation_id, source_id, emoji, e
                    );
                    tally.errors += 1;
                }
            }
        }
    }

    async fn import_service_event(
        &self,
        tx: &mut dyn ImportTransaction,
        conversation_id: i64,
        record: &ServiceRecord,
        tally: &mut ChunkTally,
    ) {
        let source_id = record.header.id;

        match tx.service_event_exists(conversation_id, source_id).await {
            Ok(true) => {
                trace!("Conversation {} event {} already stored", conversation_id, source_id);
                tally.skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Conversation {} event {}: existence check failed: {}",
                    conversation_id, source_id, e
                );
                tally.errors += 1;
                return;
            }
        }

        let occurred_at = match resolve_date(&record.header) {
            Ok(date) => date,
            Err(e) => {
                warn!("Conversation {} event {}: {}", conversation_id, source_id, e);
                tally.errors += 1;
                return;
            }
        };

        let actor_id = resolve_actor(
            tx,
            conversation_id,
            source_id,
            record.actor_id.as_deref(),
            record.actor.as_deref(),
            tally,
        )
        .await;

        let event = DbServiceEvent {
            id: 0,
            conversation_id,
            source_message_id: source_id,
            actor_id,
            occurred_at,
            action: map_service_action(record.action.as_deref().unwrap_or(UNKNOWN_ACTION))
                .to_string(),
            metadata: service_metadata(record).to_string(),
        };

        match tx.insert_service_event(&event).await {
            Ok(()) => tally.inserted += 1,
            Err(e) => {
                warn!(
                    "Conversation {} event {}: insert failed: {}",
                    conversation_id, source_id, e
                );
                tally.errors += 1;
            }
        }
    }
}

/// Parse an actor id and upsert its participant row.
///
/// An absent id is not an error. A bad id or failed upsert is counted; the id is
/// still returned after a failed upsert.
async fn resolve_actor(
    tx: &mut dyn ImportTransaction,
    conversation_id: i64,
    source_id: i64,
    raw_id: Option<&str>,
    display_name: Option<&str>,
    tally: &mut ChunkTally,
) -> Option<i64> {
    let raw_id = raw_id?;

    let id = match parse_actor_id(raw_id) {
        Ok(id) => id,
        Err(e) => {
            warn!("Conversation {} record {}: {}", conversation_id, source_id, e);
            tally.errors += 1;
            return None;
        }
    };

    if let Err(e) = tx
        .upsert_participant(&DbParticipant::new(id, display_name))
        .await
    {
        warn!(
            "Conversation {} record {}: participant {} upsert failed: {}",
            conversation_id, source_id, id, e
        );
        tally.errors += 1;
    }

    Some(id)
}

/// Send a snapshot unless cancellation is requested first.
///
/// Returns `Ok(false)` when the receiver is gone; the import keeps going without
/// publishing.
async fn publish(
    progress_tx: &mpsc::Sender<ImportProgress>,
    snapshot: ImportProgress,
    cancel: &CancellationToken,
) -> Result<bool, ImportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ImportError::Cancelled),
        sent = progress_tx.send(snapshot) => {
            if sent.is_err() {
                debug!("Progress receiver dropped, no further snapshots will be sent");
            }
            Ok(sent.is_ok())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MessageType};
    use crate::import::progress::PROGRESS_CHANNEL_CAPACITY;
    use crate::media_store::content_key;
    use crate::test_support::{
        manifest_with, sample_manifest, text_message, write_export, FailingCommitStore,
        MockCloudStorage,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    const CONVERSATION: i64 = -1001234;

    async fn setup(chunk_size: usize) -> (Database, Arc<MockCloudStorage>, ImportService) {
        let db = Database::new_in_memory().await.unwrap();
        let storage = Arc::new(MockCloudStorage::new());
        let media = MediaStore::new(storage.clone()).await.unwrap();
        let service = ImportService::new(Arc::new(db.clone()), media, ImportLocks::new(), chunk_size);
        (db, storage, service)
    }

    /// Import with a fresh channel and collect every published snapshot
    async fn run(
        service: &ImportService,
        dir: &Path,
    ) -> (Result<ImportProgress, ImportError>, Vec<ImportProgress>) {
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let result = service
            .import(CONVERSATION, dir, tx, CancellationToken::new())
            .await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    fn export_dir(manifest: &serde_json::Value, media: &[(&str, &[u8])]) -> TempDir {
        let temp = TempDir::new().unwrap();
        write_export(temp.path(), manifest, media).unwrap();
        temp
    }

    #[tokio::test]
    async fn test_imports_messages_and_service_events() {
        let export = export_dir(&sample_manifest(), &[]);
        let (db, _, service) = setup(2).await;

        let (result, events) = run(&service, export.path()).await;
        let progress = result.unwrap();

        assert_eq!(progress.total, 4);
        assert_eq!(progress.total_chunks, 2);
        assert_eq!(progress.processed, 4);
        assert_eq!(progress.inserted, 4);
        assert_eq!(progress.skipped, 0);
        assert_eq!(progress.error_count, 0);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].current_chunk, 1);
        assert_eq!(events[0].inserted, 2);
        assert_eq!(events[1], progress);

        let second = db.get_message(CONVERSATION, 2).await.unwrap().unwrap();
        assert_eq!(second.text.as_deref(), Some("hello world"));
        assert_eq!(second.sender_id, Some(7));
        assert_eq!(second.message_type, MessageType::Text);
        assert!(second.entities.unwrap().contains("bold"));

        let first = db.get_message(CONVERSATION, 1).await.unwrap().unwrap();
        assert_eq!(first.sent_at.timestamp(), 1673778600);

        let third = db.get_message(CONVERSATION, 3).await.unwrap().unwrap();
        assert_eq!(third.text, None);
        assert_eq!(third.reply_to_message_id, Some(2));

        let event = db.get_service_event(CONVERSATION, 4).await.unwrap().unwrap();
        assert_eq!(event.action, "user_joined");
        assert_eq!(event.actor_id, Some(7));
        assert!(event.metadata.contains("Carol"));

        let alice = db.get_participant(42).await.unwrap().unwrap();
        assert_eq!(alice.display_name.as_deref(), Some("Alice"));

        let conversation = db.get_conversation(CONVERSATION).await.unwrap().unwrap();
        assert_eq!(conversation.name, "Friends");
        assert_eq!(conversation.kind, "private_supergroup");
    }

    #[tokio::test]
    async fn test_reimport_skips_existing_records() {
        let export = export_dir(&sample_manifest(), &[]);
        let (db, _, service) = setup(2).await;

        run(&service, export.path()).await.0.unwrap();
        let again = run(&service, export.path()).await.0.unwrap();

        assert_eq!(again.inserted, 0);
        assert_eq!(again.skipped, 4);
        assert_eq!(again.error_count, 0);
        assert_eq!(db.count_messages(CONVERSATION).await.unwrap(), 3);
        assert_eq!(db.count_service_events(CONVERSATION).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_date_is_counted_not_fatal() {
        let mut broken = text_message(2, "when?");
        broken["date"] = serde_json::json!("sometime last week");
        let manifest = manifest_with(vec![text_message(1, "a"), broken, text_message(3, "c")]);
        let export = export_dir(&manifest, &[]);
        let (db, _, service) = setup(5000).await;

        let progress = run(&service, export.path()).await.0.unwrap();

        assert_eq!(progress.inserted, 2);
        assert_eq!(progress.error_count, 1);
        assert!(db.get_message(CONVERSATION, 2).await.unwrap().is_none());
        assert!(db.get_message(CONVERSATION, 3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_commit_loses_only_that_chunk() {
        let manifest = manifest_with((1..=6).map(|id| text_message(id, "x")).collect());
        let export = export_dir(&manifest, &[]);
        let db = Database::new_in_memory().await.unwrap();
        let media = MediaStore::new(Arc::new(MockCloudStorage::new()))
            .await
            .unwrap();
        let failing = FailingCommitStore::new(db.clone(), 2);
        let service = ImportService::new(Arc::new(failing), media.clone(), ImportLocks::new(), 2);

        let (result, events) = run(&service, export.path()).await;
        let progress = result.unwrap();

        assert_eq!(progress.processed, 6);
        assert_eq!(progress.inserted, 4);
        assert!(progress.error_count >= 1);
        assert_eq!(events.len(), 3);
        for present in [1, 2, 5, 6] {
            assert!(db.get_message(CONVERSATION, present).await.unwrap().is_some());
        }
        for absent in [3, 4] {
            assert!(db.get_message(CONVERSATION, absent).await.unwrap().is_none());
        }

        // A later run fills the gap
        let retry = ImportService::new(Arc::new(db.clone()), media, ImportLocks::new(), 2);
        let progress = run(&retry, export.path()).await.0.unwrap();
        assert_eq!(progress.inserted, 2);
        assert_eq!(progress.skipped, 4);
    }

    #[tokio::test]
    async fn test_concurrent_import_is_rejected_without_writes() {
        let (db, _, service) = setup(2).await;
        let missing = TempDir::new().unwrap().path().join("never-created");

        let guard = service.locks().try_acquire(CONVERSATION).unwrap();
        let (result, events) = run(&service, &missing).await;

        assert!(matches!(
            result,
            Err(ImportError::ImportAlreadyRunning(CONVERSATION))
        ));
        assert!(events.is_empty());
        assert_eq!(db.count_messages(CONVERSATION).await.unwrap(), 0);
        assert!(db.get_conversation(CONVERSATION).await.unwrap().is_none());

        drop(guard);
        let (result, _) = run(&service, &missing).await;
        assert!(matches!(result, Err(ImportError::Manifest(ManifestError::Io(_)))));
        assert!(!service.locks().is_held(CONVERSATION));
    }

    #[tokio::test]
    async fn test_cancellation_checked_at_chunk_boundary() {
        let manifest = manifest_with((1..=3).map(|id| text_message(id, "x")).collect());
        let export = export_dir(&manifest, &[]);
        let (db, _, service) = setup(1).await;

        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service.import(CONVERSATION, export.path(), tx, cancel).await;

        assert!(matches!(result, Err(ImportError::Cancelled)));
        assert!(rx.recv().await.is_none());
        // The first chunk committed before the boundary check
        assert_eq!(db.count_messages(CONVERSATION).await.unwrap(), 1);
        assert!(!service.locks().is_held(CONVERSATION));
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_full_channel() {
        let manifest = manifest_with((1..=3).map(|id| text_message(id, "x")).collect());
        let export = export_dir(&manifest, &[]);
        let (db, _, service) = setup(1).await;

        // Capacity 1 and nobody reading: the second publish blocks
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = service.import(CONVERSATION, export.path(), tx, cancel).await;

        assert!(matches!(result, Err(ImportError::Cancelled)));
        assert_eq!(rx.recv().await.unwrap().current_chunk, 1);
        assert!(rx.recv().await.is_none());
        assert_eq!(db.count_messages(CONVERSATION).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_not_an_error() {
        let export = export_dir(&sample_manifest(), &[]);
        let (db, _, service) = setup(1).await;

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let progress = service
            .import(CONVERSATION, export.path(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(progress.inserted, 4);
        assert_eq!(db.count_messages(CONVERSATION).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_media_is_deduplicated_and_failures_tolerated() {
        let photo_bytes: &[u8] = b"same picture twice";
        let manifest = manifest_with(vec![
            serde_json::json!({"id": 1, "type": "message", "date": "2023-02-01T08:00:00",
                "from_id": "user42", "photo": "photos/a.jpg", "mime_type": "image/jpeg"}),
            serde_json::json!({"id": 2, "type": "message", "date": "2023-02-01T08:01:00",
                "from_id": "user42", "file": "files/copy.jpg", "file_name": "copy.jpg"}),
            serde_json::json!({"id": 3, "type": "message", "date": "2023-02-01T08:02:00",
                "from_id": "user42", "file": "files/missing.pdf"}),
        ]);
        let export = export_dir(
            &manifest,
            &[("photos/a.jpg", photo_bytes), ("files/copy.jpg", photo_bytes)],
        );
        let (db, storage, service) = setup(5000).await;

        let progress = run(&service, export.path()).await.0.unwrap();

        assert_eq!(progress.inserted, 3);
        assert_eq!(progress.media_uploaded, 2);
        assert_eq!(progress.error_count, 1);
        assert_eq!(storage.put_count(), 1);
        assert_eq!(storage.object_count(), 1);

        let key = content_key(photo_bytes);
        let first = db.get_message(CONVERSATION, 1).await.unwrap().unwrap();
        let second = db.get_message(CONVERSATION, 2).await.unwrap().unwrap();
        let third = db.get_message(CONVERSATION, 3).await.unwrap().unwrap();
        assert_eq!(first.media_sha256.as_deref(), Some(key.as_str()));
        assert_eq!(second.media_sha256.as_deref(), Some(key.as_str()));
        assert_eq!(first.message_type, MessageType::Photo);
        assert_eq!(second.message_type, MessageType::Document);
        assert_eq!(third.message_type, MessageType::Document);
        assert_eq!(third.media_sha256, None);
    }

    #[tokio::test]
    async fn test_unavailable_store_keeps_message() {
        let manifest = manifest_with(vec![
            serde_json::json!({
                "id": 1, "type": "message", "date": "2023-02-01T08:00:00",
                "photo": "photos/a.jpg"
            }),
            serde_json::json!({
                "id": 2, "type": "message", "date": "2023-02-01T08:01:00",
                "file": "files/report.pdf", "file_name": "report.pdf",
                "mime_type": "application/pdf", "file_size": 2048
            }),
            serde_json::json!({
                "id": 3, "type": "message", "date": "2023-02-01T08:02:00",
                "file": "(File not included. Change data exporting settings to download.)",
                "file_name": "clip.mp4", "mime_type": "video/mp4", "file_size": 4096
            }),
        ]);
        let export = export_dir(
            &manifest,
            &[
                ("photos/a.jpg", b"jpeg".as_slice()),
                ("files/report.pdf", b"%PDF".as_slice()),
            ],
        );
        let (db, storage, service) = setup(10).await;
        storage.fail_puts(true);

        let progress = run(&service, export.path()).await.0.unwrap();

        assert_eq!(progress.inserted, 3);
        assert_eq!(progress.media_uploaded, 0);
        assert_eq!(progress.error_count, 2);
        let message = db.get_message(CONVERSATION, 1).await.unwrap().unwrap();
        assert_eq!(message.media_sha256, None);
        assert_eq!(message.message_type, MessageType::Photo);

        // Only the hash is missing; declared metadata is kept
        let report = db.get_message(CONVERSATION, 2).await.unwrap().unwrap();
        assert_eq!(report.media_sha256, None);
        assert_eq!(report.media_file_name.as_deref(), Some("report.pdf"));
        assert_eq!(report.media_mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(report.media_file_size, Some(2048));

        let clip = db.get_message(CONVERSATION, 3).await.unwrap().unwrap();
        assert_eq!(clip.media_sha256, None);
        assert_eq!(clip.media_file_name.as_deref(), Some("clip.mp4"));
        assert_eq!(clip.media_mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(clip.media_file_size, Some(4096));
    }

    #[tokio::test]
    async fn test_slow_uploads_do_not_block_other_conversations() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chatvault.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let storage = Arc::new(MockCloudStorage::new());
        let media = MediaStore::new(storage.clone()).await.unwrap();
        let service = ImportService::new(Arc::new(db.clone()), media, ImportLocks::new(), 10);

        let slow_export = export_dir(
            &manifest_with(vec![
                text_message(1, "before"),
                serde_json::json!({"id": 2, "type": "message", "date": "2023-02-01T08:00:00",
                    "photo": "photos/a.jpg"}),
            ]),
            &[("photos/a.jpg", b"slow upload".as_slice())],
        );
        let fast_export = export_dir(
            &manifest_with(vec![text_message(1, "a"), text_message(2, "b")]),
            &[],
        );

        storage.hold_puts();
        let slow = {
            let service = service.clone();
            let dir = slow_export.path().to_path_buf();
            tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
                service.import(1, &dir, tx, CancellationToken::new()).await
            })
        };
        storage.wait_for_held_put().await;

        let (tx, _rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let fast = tokio::time::timeout(
            Duration::from_secs(3),
            service.import(2, fast_export.path(), tx, CancellationToken::new()),
        )
        .await
        .expect("import of conversation 2 waited on conversation 1")
        .unwrap();

        assert_eq!(fast.inserted, 2);
        assert_eq!(fast.error_count, 0);
        assert_eq!(db.count_messages(2).await.unwrap(), 2);

        storage.release_puts();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.inserted, 2);
        assert_eq!(slow.media_uploaded, 1);
        assert_eq!(slow.error_count, 0);
        let photo = db.get_message(1, 2).await.unwrap().unwrap();
        assert_eq!(
            photo.media_sha256.as_deref(),
            Some(content_key(b"slow upload").as_str())
        );
    }

    #[tokio::test]
    async fn test_bad_actor_id_keeps_message() {
        let mut record = text_message(1, "from a channel");
        record["from_id"] = serde_json::json!("channel99");
        let export = export_dir(&manifest_with(vec![record]), &[]);
        let (db, _, service) = setup(10).await;

        let progress = run(&service, export.path()).await.0.unwrap();

        assert_eq!(progress.inserted, 1);
        assert_eq!(progress.error_count, 1);
        let message = db.get_message(CONVERSATION, 1).await.unwrap().unwrap();
        assert_eq!(message.sender_id, None);
    }

    #[tokio::test]
    async fn test_reactions_are_stored() {
        let mut record = text_message(1, "vote");
        record["reactions"] = serde_json::json!([
            {"type": "emoji", "count": 1, "emoji": "🔥",
             "recent": [{"from": "Bob", "from_id": "user7", "date": "2023-02-01T09:00:00"}]},
            {"type": "custom_emoji", "count": 1, "document_id": "123"}
        ]);
        let export = export_dir(&manifest_with(vec![record]), &[]);
        let (db, _, service) = setup(10).await;

        let progress = run(&service, export.path()).await.0.unwrap();
        assert_eq!(progress.error_count, 0);

        let message = db.get_message(CONVERSATION, 1).await.unwrap().unwrap();
        let reactions = db.get_reactions_for_message(message.id).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "🔥");
        assert_eq!(reactions[0].participant_id, 7);
        assert_eq!(
            db.get_participant(7).await.unwrap().unwrap().display_name.as_deref(),
            Some("Bob")
        );
    }

    #[tokio::test]
    async fn test_unsupported_record_is_counted() {
        let manifest = manifest_with(vec![
            text_message(1, "a"),
            serde_json::json!({"id": 2, "type": "poll_results"}),
        ]);
        let export = export_dir(&manifest, &[]);
        let (_, _, service) = setup(10).await;

        let progress = run(&service, export.path()).await.0.unwrap();
        assert_eq!(progress.inserted, 1);
        assert_eq!(progress.error_count, 1);
        assert_eq!(progress.processed, 2);
    }

    #[tokio::test]
    async fn test_empty_manifest() {
        let export = export_dir(&manifest_with(vec![]), &[]);
        let (_, _, service) = setup(10).await;

        let (result, events) = run(&service, export.path()).await;
        let progress = result.unwrap();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.total_chunks, 0);
        assert!(events.is_empty());
    }
}
