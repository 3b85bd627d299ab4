use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use crate::context::RequestContext;
use crate::storage::{ContentReader, StorageError, StorageProvider, StorageResult};

/// In-memory storage provider, used for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn store(
        &self,
        _ctx: &RequestContext,
        key: &str,
        mut reader: ContentReader,
        size: i64,
        _content_type: &str,
    ) -> StorageResult<String> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key is empty".to_string()));
        }

        // Drain the reader before taking the lock
        let mut buf = Vec::with_capacity(size.max(0) as usize);
        reader.read_to_end(&mut buf).await?;

        if buf.len() as i64 != size {
            return Err(StorageError::InvalidInput(format!(
                "declared size {} but received {} bytes",
                size,
                buf.len()
            )));
        }

        self.objects
            .write()
            .await
            .insert(key.to_string(), Bytes::from(buf));

        tracing::debug!("Stored {} bytes in memory at {}", size, key);
        Ok(key.to_string())
    }

    async fn fetch(&self, _ctx: &RequestContext, key: &str) -> StorageResult<ContentReader> {
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(Box::new(Cursor::new(data)))
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> StorageResult<()> {
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn signed_url(
        &self,
        _ctx: &RequestContext,
        key: &str,
        _expiry: Duration,
    ) -> StorageResult<String> {
        if !self.objects.read().await.contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}", key))
    }

    fn storage_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &'static [u8]) -> ContentReader {
        Box::new(data)
    }

    #[tokio::test]
    async fn test_store_fetch_delete() {
        let storage = MemoryStorage::new();
        let ctx = RequestContext::background();

        let key = storage
            .store(&ctx, "a/b.txt", reader(b"hello"), 5, "text/plain")
            .await
            .unwrap();
        assert_eq!(key, "a/b.txt");

        let mut out = Vec::new();
        storage
            .fetch(&ctx, "a/b.txt")
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello");

        storage.delete(&ctx, "a/b.txt").await.unwrap();
        assert!(matches!(
            storage.fetch(&ctx, "a/b.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete(&ctx, "a/b.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_size_mismatch_rejected() {
        let storage = MemoryStorage::new();
        let ctx = RequestContext::background();

        let result = storage
            .store(&ctx, "k", reader(b"abc"), 10, "text/plain")
            .await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_signed_url() {
        let storage = MemoryStorage::new();
        let ctx = RequestContext::background();
        storage
            .store(&ctx, "x/y", reader(b"1"), 1, "text/plain")
            .await
            .unwrap();

        let url = storage
            .signed_url(&ctx, "x/y", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "memory://x/y");

        assert!(matches!(
            storage
                .signed_url(&ctx, "missing", Duration::from_secs(60))
                .await,
            Err(StorageError::NotFound(_))
        ));
    }
}
