//! Blob Store
//!
//! Durable byte storage for artifact bundles, addressed by [`BlobKey`].

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_core::domain::artifact::BlobKey;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes a blob, replacing any previous content
    async fn put(&self, key: &BlobKey, data: &[u8]) -> Result<(), StoreError>;

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removes a blob; returns whether it existed
    async fn delete(&self, key: &BlobKey) -> Result<bool, StoreError>;

    async fn exists(&self, key: &BlobKey) -> Result<bool, StoreError>;

    /// URL clients can download the blob from directly, when the store is
    /// externally addressable
    fn public_url(&self, _key: &BlobKey) -> Option<String> {
        None
    }
}

/// Filesystem-backed blob store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serves downloads through `<base_url>/<job_id>/<upload_id>/<kind>`
    /// instead of streaming through the coordinator
    pub fn with_public_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.public_base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &BlobKey) -> PathBuf {
        self.root
            .join(key.job_id.to_string())
            .join(key.upload_id.to_string())
            .join(key.kind.file_name())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file and rename so readers never observe a
        // partially written blob
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!("Stored blob {} ({} bytes)", key.path(), data.len());
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    fn public_url(&self, key: &BlobKey) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base, key.path()))
    }
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobKey, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8]) -> Result<(), StoreError> {
        self.blobs.write().await.insert(*key, data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, StoreError> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, StoreError> {
        Ok(self.blobs.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = BlobKey::archive(Uuid::new_v4(), Uuid::new_v4());

        assert!(!store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);

        store.put(&key, b"first").await.unwrap();
        store.put(&key, b"second").await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(b"second".to_vec()));

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let key = BlobKey::metadata(Uuid::new_v4(), Uuid::new_v4());

        store.put(&key, b"meta").await.unwrap();

        let upload_dir = dir
            .path()
            .join(key.job_id.to_string())
            .join(key.upload_id.to_string());
        let mut entries = tokio::fs::read_dir(upload_dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["metadata".to_string()]);
    }

    #[test]
    fn test_public_url() {
        let key = BlobKey::archive(Uuid::new_v4(), Uuid::new_v4());

        let local = FsBlobStore::new("/tmp/kiln");
        assert_eq!(local.public_url(&key), None);

        let public = FsBlobStore::new("/tmp/kiln").with_public_url("https://cdn.example.com/a/");
        assert_eq!(
            public.public_url(&key),
            Some(format!("https://cdn.example.com/a/{}", key.path()))
        );
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        let key = BlobKey::archive(Uuid::new_v4(), Uuid::new_v4());

        store.put(&key, b"abc").await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(b"abc".to_vec()));
        assert!(store.delete(&key).await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
    }
}
