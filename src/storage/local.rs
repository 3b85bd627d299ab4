use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::storage::{ContentReader, StorageError, StorageProvider, StorageResult};

/// Local file system storage provider
pub struct LocalStorage {
    base_path: PathBuf,
}

/// Removes a partially written temp file unless the write was committed
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key under the base path, rejecting anything that could escape it
    fn get_full_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key is empty".to_string()));
        }
        if key.contains('\\') || key.contains('\0') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let path = Path::new(key);
        for component in path.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidKey(key.to_string())),
            }
        }

        Ok(self.base_path.join(path))
    }

    fn map_not_found(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    /// Walk up from `dir` removing empty directories, stopping at the base path
    async fn prune_empty_dirs(&self, dir: Option<&Path>) -> StorageResult<()> {
        let mut current_dir = dir.map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break;
                    }
                    // Another writer may have raced us into this directory
                    if fs::remove_dir(&dir).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn store(
        &self,
        _ctx: &RequestContext,
        key: &str,
        mut reader: ContentReader,
        size: i64,
        _content_type: &str,
    ) -> StorageResult<String> {
        let full_path = self.get_full_path(key)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let temp_path = full_path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
        let mut guard = TempFileGuard::new(temp_path.clone());

        let mut file = fs::File::create(&temp_path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if written as i64 != size {
            return Err(StorageError::InvalidInput(format!(
                "declared size {} but received {} bytes",
                size, written
            )));
        }

        fs::rename(&temp_path, &full_path).await?;
        guard.disarm();

        tracing::debug!("Saved {} bytes to {:?}", written, full_path);
        Ok(key.to_string())
    }

    async fn fetch(&self, _ctx: &RequestContext, key: &str) -> StorageResult<ContentReader> {
        let full_path = self.get_full_path(key)?;

        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;

        Ok(Box::new(file))
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> StorageResult<()> {
        let full_path = self.get_full_path(key)?;

        fs::remove_file(&full_path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        tracing::debug!("Deleted file {:?}", full_path);

        self.prune_empty_dirs(full_path.parent()).await
    }

    async fn signed_url(
        &self,
        _ctx: &RequestContext,
        key: &str,
        _expiry: Duration,
    ) -> StorageResult<String> {
        // Local files cannot be signed, hand back an absolute file URL instead
        let full_path = self.get_full_path(key)?;
        if !fs::try_exists(&full_path).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let absolute = fs::canonicalize(&full_path).await?;
        Ok(format!("file://{}", absolute.display()))
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn reader(data: &'static [u8]) -> ContentReader {
        Box::new(data)
    }

    #[tokio::test]
    async fn test_store_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let ctx = RequestContext::background();

        storage
            .store(&ctx, "id-1/report.pdf", reader(b"%PDF-1.4"), 8, "application/pdf")
            .await
            .unwrap();
        assert!(dir.path().join("id-1/report.pdf").exists());

        let mut out = Vec::new();
        storage
            .fetch(&ctx, "id-1/report.pdf")
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let ctx = RequestContext::background();

        for key in ["../evil", "/etc/passwd", "a/../../b", "", "a\\b"] {
            let result = storage.store(&ctx, key, reader(b"x"), 1, "text/plain").await;
            assert!(
                matches!(result, Err(StorageError::InvalidKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_size_mismatch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let ctx = RequestContext::background();

        let result = storage
            .store(&ctx, "id-2/short.txt", reader(b"abc"), 4, "text/plain")
            .await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));

        let mut entries = std::fs::read_dir(dir.path().join("id-2")).unwrap();
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let ctx = RequestContext::background();

        storage
            .store(&ctx, "id-3/a.txt", reader(b"a"), 1, "text/plain")
            .await
            .unwrap();
        storage.delete(&ctx, "id-3/a.txt").await.unwrap();

        assert!(!dir.path().join("id-3").exists());
        assert!(dir.path().exists());

        assert!(matches!(
            storage.delete(&ctx, "id-3/a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_url_is_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let ctx = RequestContext::background();

        storage
            .store(&ctx, "id-4/b.txt", reader(b"b"), 1, "text/plain")
            .await
            .unwrap();
        let url = storage
            .signed_url(&ctx, "id-4/b.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("id-4/b.txt"));

        assert!(matches!(
            storage
                .signed_url(&ctx, "id-4/missing.txt", Duration::from_secs(60))
                .await,
            Err(StorageError::NotFound(_))
        ));
    }
}
