//! S3 storage provider

use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::config::S3Config;
use crate::context::RequestContext;
use crate::storage::{ContentReader, StorageError, StorageProvider, StorageResult};

use super::client::Client;

/// S3-compatible object storage provider (AWS S3, MinIO)
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        Ok(Self {
            client: Client::new(config)?,
        })
    }
}

#[async_trait]
impl StorageProvider for S3Storage {
    async fn store(
        &self,
        _ctx: &RequestContext,
        key: &str,
        reader: ContentReader,
        size: i64,
        content_type: &str,
    ) -> StorageResult<String> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key is empty".to_string()));
        }

        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));
        self.client.put_object(key, body, size, content_type).await?;

        tracing::info!(
            "Successfully uploaded to s3://{}/{}",
            self.client.bucket(),
            self.client.object_key(key)
        );
        Ok(key.to_string())
    }

    async fn fetch(&self, _ctx: &RequestContext, key: &str) -> StorageResult<ContentReader> {
        let response = self.client.get_object(key).await?;
        let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn delete(&self, _ctx: &RequestContext, key: &str) -> StorageResult<()> {
        // S3 deletes are idempotent, so check with HEAD first to report missing keys
        if !self.client.head_object(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.client.delete_object(key).await
    }

    async fn signed_url(
        &self,
        _ctx: &RequestContext,
        key: &str,
        expiry: Duration,
    ) -> StorageResult<String> {
        self.client.presigned_get_url(key, expiry.as_secs())
    }

    fn storage_type(&self) -> &'static str {
        "s3"
    }
}
