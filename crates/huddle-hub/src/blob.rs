//! Blob Store seam and its `object_store` implementation.
//!
//! Uploaded files live in a single flat namespace keyed by sanitized file
//! name. Keys are checked again here so lookups driven by user input (file
//! info, downloads) can never escape that namespace.

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::BlobError;

/// Metadata about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobMeta {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Creation time, when the backend records one. `object_store` only
    /// reports last modification, and uploads are never rewritten.
    pub created: Option<DateTime<Utc>>,
}

/// Put/get storage for uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError>;

    async fn get(&self, key: &str) -> Result<Bytes, BlobError>;

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError>;

    /// Remove a blob. Removing a missing blob is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Whether `c` may appear in a blob key.
pub fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Check a key and turn it into an object path.
pub fn object_path(key: &str) -> Result<Path, BlobError> {
    if key.is_empty() || key.chars().all(|c| c == '.') || !key.chars().all(is_key_char) {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(Path::from(key))
}

/// [`BlobStore`] backed by any [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Volatile store, used by tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Store files under `dir`, which must already exist.
    pub fn local(dir: &FsPath) -> Result<Self, BlobError> {
        let fs = LocalFileSystem::new_with_prefix(dir)
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        Ok(Self::new(Arc::new(fs)))
    }
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("store", &self.store.to_string())
            .finish()
    }
}

fn map_err(key: &str, err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::NotFound(key.to_string()),
        other => BlobError::Backend(other.to_string()),
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), BlobError> {
        let path = object_path(key)?;
        self.store
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| map_err(key, e))?;
        debug!("Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        let path = object_path(key)?;
        let result = self.store.get(&path).await.map_err(|e| map_err(key, e))?;
        result.bytes().await.map_err(|e| map_err(key, e))
    }

    async fn head(&self, key: &str) -> Result<BlobMeta, BlobError> {
        let path = object_path(key)?;
        let meta = self.store.head(&path).await.map_err(|e| map_err(key, e))?;
        Ok(BlobMeta {
            name: key.to_string(),
            size: meta.size as u64,
            modified: meta.last_modified,
            created: None,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = object_path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_err(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_rejects_traversal() {
        assert!(object_path("123_report.pdf").is_ok());
        assert!(object_path("").is_err());
        assert!(object_path("..").is_err());
        assert!(object_path("../etc/passwd").is_err());
        assert!(object_path("a/b").is_err());
        assert!(object_path("spaced name").is_err());
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip_and_head() {
        let store = ObjectBlobStore::in_memory();
        store
            .put("1_hello.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(store.get("1_hello.txt").await.unwrap(), Bytes::from_static(b"hello"));
        let meta = store.head("1_hello.txt").await.unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.name, "1_hello.txt");
        assert_eq!(meta.created, None);
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_tolerates_missing() {
        let store = ObjectBlobStore::in_memory();
        store.put("2_gone.txt", Bytes::from_static(b"x")).await.unwrap();

        store.delete("2_gone.txt").await.unwrap();
        assert!(matches!(store.get("2_gone.txt").await, Err(BlobError::NotFound(_))));

        store.delete("2_gone.txt").await.unwrap();
        assert!(matches!(store.delete("../x").await, Err(BlobError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = ObjectBlobStore::in_memory();
        assert!(matches!(store.get("nope").await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.head("nope").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_store_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectBlobStore::local(dir.path()).unwrap();
        store.put("42_a.bin", Bytes::from_static(&[1, 2, 3])).await.unwrap();

        assert!(dir.path().join("42_a.bin").exists());
        assert_eq!(store.head("42_a.bin").await.unwrap().size, 3);
    }
}
