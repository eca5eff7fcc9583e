// Test support utilities for both unit and integration tests

use crate::cloud_storage::{CloudStorage, CloudStorageError};
use crate::db::{
    Database, DbConversation, DbMessage, DbParticipant, DbReaction, DbServiceEvent, ImportStore,
    ImportTransaction, StoreError,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{watch, Notify};

/// Mock cloud storage for testing
///
/// Stores objects in memory instead of uploading to S3 and counts physical writes.
/// Each failure switch makes the matching operation return an error. Puts can be
/// held open to simulate a slow upload.
pub struct MockCloudStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    fail_exists: AtomicBool,
    fail_provision: AtomicBool,
    /// `false` while puts are held
    put_gate: watch::Sender<bool>,
    put_waiting: Notify,
}

impl Default for MockCloudStorage {
    fn default() -> Self {
        MockCloudStorage {
            objects: Mutex::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_exists: AtomicBool::new(false),
            fail_provision: AtomicBool::new(false),
            put_gate: watch::channel(true).0,
            put_waiting: Notify::new(),
        }
    }
}

impl MockCloudStorage {
    /// Create a new mock cloud storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every `put_object` until `release_puts` is called
    pub fn hold_puts(&self) {
        self.put_gate.send_replace(false);
    }

    pub fn release_puts(&self) {
        self.put_gate.send_replace(true);
    }

    /// Wait until a put is parked behind `hold_puts`
    pub async fn wait_for_held_put(&self) {
        self.put_waiting.notified().await;
    }

    /// Number of `put_object` calls that stored data
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Content type recorded for `key`
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, content_type)| content_type.clone())
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }

    pub fn fail_provision(&self, fail: bool) {
        self.fail_provision.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl CloudStorage for MockCloudStorage {
    async fn ensure_container(&self) -> Result<(), CloudStorageError> {
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(CloudStorageError::SdkError("bucket unreachable".to_string()));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CloudStorageError> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(CloudStorageError::SdkError("head object timed out".to_string()));
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), CloudStorageError> {
        let mut gate = self.put_gate.subscribe();
        let mut announced = false;
        loop {
            let open = *gate.borrow_and_update();
            if open {
                break;
            }
            if !announced {
                self.put_waiting.notify_one();
                announced = true;
            }
            if gate.changed().await.is_err() {
                break;
            }
        }

        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CloudStorageError::SdkError("put object refused".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, CloudStorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| CloudStorageError::NotFound(key.to_string()))
    }
}

/// Store wrapper that fails the commit of one chunk
///
/// Transactions are numbered from 1 in the order `begin` is called. The chosen
/// transaction is rolled back and its commit reports an error.
pub struct FailingCommitStore {
    inner: Database,
    fail_on: usize,
    begun: AtomicUsize,
}

impl FailingCommitStore {
    pub fn new(inner: Database, fail_on: usize) -> Self {
        FailingCommitStore {
            inner,
            fail_on,
            begun: AtomicUsize::new(0),
        }
    }
}

struct FailingCommitTransaction {
    inner: Box<dyn ImportTransaction>,
    fail_commit: bool,
}

#[async_trait::async_trait]
impl ImportStore for FailingCommitStore {
    async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError> {
        let number = self.begun.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.begin().await?;
        Ok(Box::new(FailingCommitTransaction {
            inner,
            fail_commit: number == self.fail_on,
        }))
    }

    async fn message_exists(
        &self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError> {
        ImportStore::message_exists(&self.inner, conversation_id, source_message_id).await
    }
}

#[async_trait::async_trait]
impl ImportTransaction for FailingCommitTransaction {
    async fn upsert_conversation(
        &mut self,
        conversation: &DbConversation,
    ) -> Result<(), StoreError> {
        self.inner.upsert_conversation(conversation).await
    }

    async fn upsert_participant(&mut self, participant: &DbParticipant) -> Result<(), StoreError> {
        self.inner.upsert_participant(participant).await
    }

    async fn message_exists(
        &mut self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError> {
        self.inner
            .message_exists(conversation_id, source_message_id)
            .await
    }

    async fn service_event_exists(
        &mut self,
        conversation_id: i64,
        source_message_id: i64,
    ) -> Result<bool, StoreError> {
        self.inner
            .service_event_exists(conversation_id, source_message_id)
            .await
    }

    async fn insert_message(&mut self, message: &DbMessage) -> Result<i64, StoreError> {
        self.inner.insert_message(message).await
    }

    async fn insert_service_event(&mut self, event: &DbServiceEvent) -> Result<(), StoreError> {
        self.inner.insert_service_event(event).await
    }

    async fn insert_reaction(&mut self, reaction: &DbReaction) -> Result<(), StoreError> {
        self.inner.insert_reaction(reaction).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.fail_commit {
            self.inner.rollback().await?;
            return Err(StoreError::Transaction(
                "injected commit failure".to_string(),
            ));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// Three messages and one join event; message 2's text is split into two spans
pub fn sample_manifest() -> serde_json::Value {
    serde_json::json!({
        "name": "Friends",
        "type": "private_supergroup",
        "id": 1234,
        "messages": [
            {
                "id": 1, "type": "message",
                "date": "2023-01-15T10:30:00", "date_unixtime": "1673778600",
                "from": "Alice", "from_id": "user42",
                "text": "first"
            },
            {
                "id": 2, "type": "message",
                "date": "2023-01-15T10:31:00", "date_unixtime": "1673778660",
                "from": "Bob", "from_id": "user7",
                "text": [
                    {"type": "plain", "text": "hello "},
                    {"type": "bold", "text": "world"}
                ],
                "text_entities": [
                    {"type": "plain", "text": "hello "},
                    {"type": "bold", "text": "world"}
                ]
            },
            {
                "id": 3, "type": "message",
                "date": "2023-01-15T10:32:00", "date_unixtime": "1673778720",
                "from": "Alice", "from_id": "user42",
                "text": "", "reply_to_message_id": 2
            },
            {
                "id": 4, "type": "service",
                "date": "2023-01-15T10:33:00", "date_unixtime": "1673778780",
                "actor": "Bob", "actor_id": "user7",
                "action": "invite_members", "members": ["Carol"]
            }
        ]
    })
}

/// A plain message record with a fixed date
pub fn text_message(id: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": "message",
        "date": "2023-02-01T08:00:00",
        "from": "Alice",
        "from_id": "user42",
        "text": text
    })
}

/// Manifest wrapping `records`
pub fn manifest_with(records: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "name": "Friends",
        "type": "private_supergroup",
        "id": 1234,
        "messages": records
    })
}

/// Write an extracted export (manifest plus media files) under `dir`
pub fn write_export(
    dir: &Path,
    manifest: &serde_json::Value,
    media: &[(&str, &[u8])],
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("result.json"), serde_json::to_vec_pretty(manifest)?)?;
    for (relative, data) in media {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
    }
    Ok(())
}

/// Write a zip archive; names ending in `/` become directory entries
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> zip::result::ZipResult<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options)?;
        } else {
            writer.start_file(*name, options)?;
            writer.write_all(data)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// Write a zipped export: `result.json` at the root plus media files
pub fn write_export_zip(
    path: &Path,
    manifest: &serde_json::Value,
    media: &[(&str, &[u8])],
) -> zip::result::ZipResult<()> {
    let manifest_bytes = serde_json::to_vec_pretty(manifest).map_err(std::io::Error::from)?;
    let mut entries: Vec<(&str, &[u8])> = vec![("result.json", manifest_bytes.as_slice())];
    entries.extend_from_slice(media);
    write_zip(path, &entries)
}
