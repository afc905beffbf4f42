//! File ingest against in-memory and failing blob stores.
//!
//! Run with: `cargo test -p huddle-hub --test ingest`

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use common::{connect, connect_as, room, spawn_hub};
use huddle_hub::events::FileUpload;
use huddle_hub::{
    BlobError, BlobMeta, BlobStore, FileIngest, HubConfig, HubHandle, IngestError,
    ObjectBlobStore, Partition, ServerEvent, SessionId,
};

/// Store that fails every write and counts the attempts.
#[derive(Default)]
struct FailingStore {
    puts: AtomicUsize,
}

#[async_trait]
impl BlobStore for FailingStore {
    async fn put(&self, _key: &str, _bytes: Bytes) -> Result<(), BlobError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(BlobError::Backend("disk full".to_string()))
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        Err(BlobError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError> {
        Err(BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), BlobError> {
        Ok(())
    }
}

/// Store that disconnects the uploader while the write is in flight.
struct DisconnectingStore {
    inner: ObjectBlobStore,
    hub: HubHandle,
    uploader: SessionId,
    last_key: Mutex<Option<String>>,
}

#[async_trait]
impl BlobStore for DisconnectingStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError> {
        self.inner.put(key, bytes).await?;
        *self.last_key.lock().unwrap() = Some(key.to_string());
        self.hub.disconnect(self.uploader).await.unwrap();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_upload_is_stored_archived_and_announced() {
    let hub = spawn_hub(HubConfig::default());
    let store = Arc::new(ObjectBlobStore::in_memory());
    let ingest = FileIngest::new(hub.clone(), store.clone());
    let mut alice = connect_as(&hub, "alice").await;
    let mut bob = connect_as(&hub, "bob").await;
    let general = room("general");
    hub.join_room(bob.session, general.clone()).await.unwrap();
    alice.drain();
    bob.drain();

    // uploader does not have to be a member
    let message = ingest
        .ingest(
            alice.session,
            Some("general"),
            Bytes::from_static(b"report body"),
            Some("../../etc/passwd"),
        )
        .await
        .unwrap();

    let attachment = message.attachment.clone().unwrap();
    assert_eq!(attachment.name, "../../etc/passwd");
    let key = attachment.url.strip_prefix("/uploads/").unwrap();
    assert!(key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
    assert_eq!(store.get(key).await.unwrap(), Bytes::from_static(b"report body"));

    match bob.drain().as_slice() {
        [ServerEvent::NewFile(notice)] => {
            assert_eq!(notice.id, message.id);
            assert_eq!(notice.sender.as_str(), "alice");
            assert_eq!(notice.room, general);
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert!(alice.drain().is_empty());

    let page = hub.history_page(Partition::Room(general), 1, 20).await.unwrap();
    assert_eq!(page.messages, vec![message]);
}

#[tokio::test]
async fn test_storage_failure_publishes_nothing() {
    let hub = spawn_hub(HubConfig::default());
    let store = Arc::new(FailingStore::default());
    let ingest = FileIngest::new(hub.clone(), store.clone());
    let alice = connect_as(&hub, "alice").await;
    let mut bob = connect_as(&hub, "bob").await;
    let general = room("general");
    hub.join_room(bob.session, general.clone()).await.unwrap();
    bob.drain();

    let result = ingest
        .ingest(alice.session, Some("general"), Bytes::from_static(b"x"), Some("a.txt"))
        .await;

    assert!(matches!(result, Err(IngestError::Storage(_))));
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    assert!(bob.drain().is_empty());
    let page = hub.history_page(Partition::Room(general), 1, 20).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_uploader_leaving_mid_write_leaves_no_blob() {
    let hub = spawn_hub(HubConfig::default());
    let alice = connect_as(&hub, "alice").await;
    let mut bob = connect_as(&hub, "bob").await;
    let general = room("general");
    hub.join_room(bob.session, general.clone()).await.unwrap();
    bob.drain();
    let store = Arc::new(DisconnectingStore {
        inner: ObjectBlobStore::in_memory(),
        hub: hub.clone(),
        uploader: alice.session,
        last_key: Mutex::new(None),
    });
    let ingest = FileIngest::new(hub.clone(), store.clone());

    let result = ingest
        .ingest(alice.session, Some("general"), Bytes::from_static(b"x"), Some("a.txt"))
        .await;

    assert!(matches!(result, Err(IngestError::NotRegistered)));
    let key = store.last_key.lock().unwrap().clone().unwrap();
    assert!(matches!(store.get(&key).await, Err(BlobError::NotFound(_))));
    assert!(!bob.drain().iter().any(|e| matches!(e, ServerEvent::NewFile(_))));
    let page = hub.history_page(Partition::Room(general), 1, 20).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_invalid_uploads_never_reach_the_store() {
    let hub = spawn_hub(HubConfig {
        max_upload_bytes: 4,
        ..HubConfig::default()
    });
    let store = Arc::new(FailingStore::default());
    let ingest = FileIngest::new(hub.clone(), store.clone());
    let alice = connect_as(&hub, "alice").await;
    let anonymous = connect(&hub).await;
    let data = Bytes::from_static(b"abc");

    let missing_room = ingest.ingest(alice.session, None, data.clone(), Some("a")).await;
    assert!(matches!(missing_room, Err(IngestError::MissingField("room"))));

    let missing_name = ingest.ingest(alice.session, Some("general"), data.clone(), None).await;
    assert!(matches!(missing_name, Err(IngestError::MissingField(_))));

    let empty = ingest
        .ingest(alice.session, Some("general"), Bytes::new(), Some("a"))
        .await;
    assert!(matches!(empty, Err(IngestError::EmptyPayload)));

    let too_large = ingest
        .ingest(alice.session, Some("general"), Bytes::from_static(b"abcde"), Some("a"))
        .await;
    assert!(matches!(too_large, Err(IngestError::TooLarge { max_size: 4 })));

    let unregistered = ingest
        .ingest(anonymous.session, Some("general"), data, Some("a"))
        .await;
    assert!(matches!(unregistered, Err(IngestError::NotRegistered)));

    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_event_acknowledges_uploader() {
    let hub = spawn_hub(HubConfig::default());
    let ingest = FileIngest::new(hub.clone(), Arc::new(ObjectBlobStore::in_memory()));
    let alice = connect_as(&hub, "alice").await;

    let ack = ingest
        .handle_upload(
            alice.session,
            FileUpload {
                file: Some("data:text/plain;base64,aGVsbG8=".to_string()),
                file_name: Some("hello.txt".to_string()),
                room: Some("general".to_string()),
                request_id: Some("req-1".to_string()),
            },
        )
        .await;

    assert!(ack.ok, "upload failed: {:?}", ack.error);
    assert_eq!(ack.request_id.as_deref(), Some("req-1"));
    let file = ack.file.unwrap();
    assert_eq!(file.name, "hello.txt");
    assert!(file.url.ends_with("_hello.txt"));

    let rejected = ingest
        .handle_upload(
            alice.session,
            FileUpload {
                file: Some("***".to_string()),
                file_name: Some("bad.txt".to_string()),
                room: Some("general".to_string()),
                request_id: None,
            },
        )
        .await;
    assert!(!rejected.ok);
    assert!(rejected.file.is_none());
    assert!(rejected.error.is_some());
}
