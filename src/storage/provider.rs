use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::context::RequestContext;

/// Byte stream handed to and returned from storage backends
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by storage backends
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Storage provider trait
///
/// Keys are opaque strings chosen by the caller. Implementations must be safe
/// for concurrent use on disjoint keys.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stream `size` bytes from `reader` into storage under `key`.
    /// Returns the key the bytes were stored under.
    async fn store(
        &self,
        ctx: &RequestContext,
        key: &str,
        reader: ContentReader,
        size: i64,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Open the bytes stored under `key`
    async fn fetch(&self, ctx: &RequestContext, key: &str) -> StorageResult<ContentReader>;

    /// Delete the bytes stored under `key`
    async fn delete(&self, ctx: &RequestContext, key: &str) -> StorageResult<()>;

    /// Get a time-limited URL for reading the bytes under `key`
    async fn signed_url(
        &self,
        ctx: &RequestContext,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<String>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
