use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::config::ContentConfig;
use crate::context::RequestContext;
use crate::models::{
    now_utc, ContentAssociation, ContentPage, ContentQuery, ContentRecord, ContentStatus,
    NewAssociation, NewContent, UpdateContent,
};
use crate::repository::{ContentRepository, RepositoryResult};
use crate::services::content_type::{self, ContentTypePolicy, SNIFF_LEN};
use crate::services::error::{ContentError, ContentResult};
use crate::storage::{ContentReader, StorageError, StorageProvider, StorageResult};

pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Tunables for the content service
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub max_page_size: i64,
    /// Budget for best-effort storage cleanup after a failed create or a delete
    pub cleanup_timeout: Duration,
    pub content_type_policy: ContentTypePolicy,
}

impl ServiceOptions {
    pub fn from_config(config: &ContentConfig) -> Self {
        Self {
            max_page_size: config.max_page_size,
            cleanup_timeout: Duration::from_secs(config.cleanup_timeout_secs),
            content_type_policy: config.content_type_policy,
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_page_size: 100,
            cleanup_timeout: Duration::from_secs(10),
            content_type_policy: ContentTypePolicy::default(),
        }
    }
}

/// Progress of a create across the two stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStage {
    BytesWritten,
    RecordWriteAttempted,
    Committed,
    Compensating,
    Compensated,
    DriftLogged,
}

struct CreateSaga {
    id: Uuid,
    key: String,
    stage: CreateStage,
}

impl CreateSaga {
    fn begin(id: Uuid, key: String) -> Self {
        tracing::debug!("Create {}: bytes written to {}", id, key);
        Self {
            id,
            key,
            stage: CreateStage::BytesWritten,
        }
    }

    fn advance(&mut self, next: CreateStage) {
        tracing::debug!("Create {}: {:?} -> {:?}", self.id, self.stage, next);
        self.stage = next;
    }
}

fn validate_name(name: &str) -> ContentResult<()> {
    if name.trim().is_empty() {
        return Err(ContentError::InvalidInput("name is required".to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ContentError::InvalidInput(
            "name must not contain path separators".to_string(),
        ));
    }
    Ok(())
}

fn require(field: &str, value: &str) -> ContentResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ContentError::InvalidInput(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Coordinates the storage and repository capabilities.
///
/// Storage is written first and the repository record is the commit point: a
/// record only becomes visible once its bytes exist, and a failed record write
/// triggers a compensating delete of the bytes.
#[derive(Clone)]
pub struct ContentService {
    storage: Arc<dyn StorageProvider>,
    repository: Arc<dyn ContentRepository>,
    options: ServiceOptions,
}

impl ContentService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repository: Arc<dyn ContentRepository>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            storage,
            repository,
            options,
        }
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn storage_type(&self) -> &'static str {
        self.storage.storage_type()
    }

    async fn storage_call<T, F>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        key: &str,
        fut: F,
    ) -> ContentResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match ctx.run(fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ContentError::Storage {
                op,
                key: key.to_string(),
                source,
            }),
            Err(reason) => Err(ContentError::interrupted(op, reason)),
        }
    }

    async fn repository_call<T, F>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        id: impl ToString,
        fut: F,
    ) -> ContentResult<T>
    where
        F: Future<Output = RepositoryResult<T>>,
    {
        match ctx.run(fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ContentError::from_repository(op, id.to_string(), source)),
            Err(reason) => Err(ContentError::interrupted(op, reason)),
        }
    }

    fn normalize_page(&self, page: i64, page_size: i64) -> (i64, i64) {
        let page = if page <= 0 { 1 } else { page };
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        (page, page_size.min(self.options.max_page_size.max(1)))
    }

    /// Store bytes, then record them
    pub async fn create_content(
        &self,
        ctx: &RequestContext,
        input: NewContent,
        reader: ContentReader,
    ) -> ContentResult<ContentRecord> {
        validate_name(&input.name)?;
        if input.content_type.trim().is_empty() {
            return Err(ContentError::InvalidInput(
                "content type is required".to_string(),
            ));
        }
        if input.size <= 0 {
            return Err(ContentError::InvalidInput(
                "size must be greater than zero".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let key = format!("{}/{}", id, input.name);

        let stored_key = self
            .storage_call(
                ctx,
                "store",
                &key,
                self.storage
                    .store(ctx, &key, reader, input.size, &input.content_type),
            )
            .await?;
        let mut saga = CreateSaga::begin(id, stored_key);

        let now = now_utc();
        let record = ContentRecord {
            id,
            name: input.name,
            description: input.description,
            content_type: input.content_type,
            size: input.size,
            storage_path: saga.key.clone(),
            status: ContentStatus::Uploaded,
            metadata: input.metadata,
            created_by: input.created_by,
            source: input.source,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        saga.advance(CreateStage::RecordWriteAttempted);
        // Not raced against cancellation: once bytes exist the outcome of the
        // record write must be known before deciding whether to compensate
        match self.repository.create(ctx, &record).await {
            Ok(created) => {
                saga.advance(CreateStage::Committed);
                tracing::info!(
                    "Created content {} ({}, {} bytes)",
                    created.id,
                    created.content_type,
                    created.size
                );
                Ok(created)
            }
            Err(source) => {
                let err = ContentError::from_repository("create", id.to_string(), source);
                self.compensate(&mut saga).await;
                Err(err)
            }
        }
    }

    /// Remove bytes whose record could not be written
    async fn compensate(&self, saga: &mut CreateSaga) {
        saga.advance(CreateStage::Compensating);

        let cleanup = RequestContext::with_timeout(self.options.cleanup_timeout);
        let outcome = cleanup
            .run(self.storage.delete(&cleanup, &saga.key))
            .await;

        match outcome {
            Ok(Ok(())) | Ok(Err(StorageError::NotFound(_))) => {
                saga.advance(CreateStage::Compensated);
                tracing::warn!(
                    "Create {} failed after storing bytes; removed {}",
                    saga.id,
                    saga.key
                );
            }
            Ok(Err(e)) => {
                saga.advance(CreateStage::DriftLogged);
                tracing::error!(
                    "Storage drift: bytes at {} have no record (content {}): {}",
                    saga.key,
                    saga.id,
                    e
                );
            }
            Err(reason) => {
                saga.advance(CreateStage::DriftLogged);
                tracing::error!(
                    "Storage drift: bytes at {} have no record (content {}): cleanup {}",
                    saga.key,
                    saga.id,
                    reason
                );
            }
        }
    }

    pub async fn get_content(&self, ctx: &RequestContext, id: Uuid) -> ContentResult<ContentRecord> {
        self.repository_call(ctx, "get", id, self.repository.get_by_id(ctx, id))
            .await
    }

    /// Open the bytes of a record. Missing bytes surface as a storage error.
    pub async fn get_content_data(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> ContentResult<(ContentReader, ContentRecord)> {
        let record = self.get_content(ctx, id).await?;

        let reader = self
            .storage_call(
                ctx,
                "fetch",
                &record.storage_path,
                self.storage.fetch(ctx, &record.storage_path),
            )
            .await
            .map_err(|e| {
                if let ContentError::Storage {
                    source: StorageError::NotFound(_),
                    ..
                } = &e
                {
                    tracing::warn!(
                        "Storage drift: content {} has no bytes at {}",
                        record.id,
                        record.storage_path
                    );
                }
                e
            })?;

        Ok((reader, record))
    }

    pub async fn update_content(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        input: UpdateContent,
    ) -> ContentResult<ContentRecord> {
        if id.is_nil() {
            return Err(ContentError::InvalidInput("content id is required".to_string()));
        }

        let changes = UpdateContent {
            name: input.name.filter(|n| !n.is_empty()),
            description: input.description.filter(|d| !d.is_empty()),
            metadata: input.metadata.filter(|m| !m.is_empty()),
        };
        if let Some(name) = &changes.name {
            validate_name(name)?;
        }

        if changes.name.is_none() && changes.description.is_none() && changes.metadata.is_none() {
            return self.get_content(ctx, id).await;
        }

        // Status and content type belong to update_status/finalize_content and
        // are never written from here
        self.repository_call(
            ctx,
            "update_details",
            id,
            self.repository.update_details(ctx, id, &changes),
        )
        .await
    }

    /// Soft delete the record, then remove its bytes on a best-effort basis
    pub async fn delete_content(&self, ctx: &RequestContext, id: Uuid) -> ContentResult<()> {
        let record = self.get_content(ctx, id).await?;

        self.repository_call(ctx, "soft_delete", id, self.repository.soft_delete(ctx, id))
            .await?;
        tracing::info!("Deleted content {}", id);

        let cleanup = RequestContext::with_timeout(self.options.cleanup_timeout);
        match cleanup
            .run(self.storage.delete(&cleanup, &record.storage_path))
            .await
        {
            Ok(Ok(())) => {
                tracing::debug!("Removed bytes at {}", record.storage_path);
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "Failed to remove bytes at {} for deleted content {}: {}",
                    record.storage_path,
                    id,
                    e
                );
            }
            Err(reason) => {
                tracing::warn!(
                    "Failed to remove bytes at {} for deleted content {}: {}",
                    record.storage_path,
                    id,
                    reason
                );
            }
        }

        Ok(())
    }

    pub async fn list_content(
        &self,
        ctx: &RequestContext,
        query: ContentQuery,
    ) -> ContentResult<ContentPage> {
        let (page, page_size) = self.normalize_page(query.page, query.page_size);
        let offset = (page - 1).saturating_mul(page_size);

        let mut filter = query.filter;
        filter.content_type = filter.content_type.filter(|c| !c.is_empty());

        let (items, total) = self
            .repository_call(
                ctx,
                "list",
                "contents",
                self.repository.list(ctx, &filter, offset, page_size),
            )
            .await?;

        Ok(ContentPage::new(items, total, page, page_size))
    }

    pub async fn get_content_url(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        expiry: Duration,
    ) -> ContentResult<String> {
        if expiry.is_zero() {
            return Err(ContentError::InvalidInput(
                "expiry must be greater than zero".to_string(),
            ));
        }

        let record = self.get_content(ctx, id).await?;
        self.storage_call(
            ctx,
            "signed_url",
            &record.storage_path,
            self.storage.signed_url(ctx, &record.storage_path, expiry),
        )
        .await
    }

    pub async fn associate_content(
        &self,
        ctx: &RequestContext,
        input: NewAssociation,
    ) -> ContentResult<ContentAssociation> {
        let entity_type = require("entity type", &input.entity_type)?;
        let entity_id = require("entity id", &input.entity_id)?;

        self.get_content(ctx, input.content_id).await?;

        let now = now_utc();
        let association = ContentAssociation {
            id: Uuid::new_v4(),
            content_id: input.content_id,
            entity_type,
            entity_id,
            metadata: input.metadata,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .repository_call(
                ctx,
                "create_association",
                input.content_id,
                self.repository.create_association(ctx, &association),
            )
            .await?;

        tracing::info!(
            "Associated content {} with {}/{}",
            created.content_id,
            created.entity_type,
            created.entity_id
        );
        Ok(created)
    }

    pub async fn get_content_for_entity(
        &self,
        ctx: &RequestContext,
        entity_type: &str,
        entity_id: &str,
        page: i64,
        page_size: i64,
    ) -> ContentResult<ContentPage> {
        let entity_type = require("entity type", entity_type)?;
        let entity_id = require("entity id", entity_id)?;

        let (page, page_size) = self.normalize_page(page, page_size);
        let offset = (page - 1).saturating_mul(page_size);

        let (items, total) = self
            .repository_call(
                ctx,
                "list_content_by_entity",
                format!("{}/{}", entity_type, entity_id),
                self.repository
                    .list_content_by_entity(ctx, &entity_type, &entity_id, offset, page_size),
            )
            .await?;

        Ok(ContentPage::new(items, total, page, page_size))
    }

    pub async fn list_associations(
        &self,
        ctx: &RequestContext,
        content_id: Uuid,
    ) -> ContentResult<Vec<ContentAssociation>> {
        self.get_content(ctx, content_id).await?;
        self.repository_call(
            ctx,
            "list_associations",
            content_id,
            self.repository.list_associations_by_content(ctx, content_id),
        )
        .await
    }

    /// A single link between a record and an entity
    pub async fn get_association(
        &self,
        ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> ContentResult<ContentAssociation> {
        let entity_type = require("entity type", entity_type)?;
        let entity_id = require("entity id", entity_id)?;

        self.repository_call(
            ctx,
            "get_association",
            format!("{}/{}/{}", content_id, entity_type, entity_id),
            self.repository
                .get_association_by_link(ctx, content_id, &entity_type, &entity_id),
        )
        .await
    }

    pub async fn dissociate_content(
        &self,
        ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> ContentResult<()> {
        let entity_type = require("entity type", entity_type)?;
        let entity_id = require("entity id", entity_id)?;

        self.repository_call(
            ctx,
            "delete_association",
            format!("{}/{}/{}", content_id, entity_type, entity_id),
            self.repository
                .delete_association(ctx, content_id, &entity_type, &entity_id),
        )
        .await?;

        tracing::info!(
            "Dissociated content {} from {}/{}",
            content_id,
            entity_type,
            entity_id
        );
        Ok(())
    }

    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: ContentStatus,
    ) -> ContentResult<ContentRecord> {
        let mut record = self.get_content(ctx, id).await?;
        if !record.status.can_transition_to(status) {
            return Err(ContentError::InvalidInput(format!(
                "cannot move content {} from {} to {}",
                id, record.status, status
            )));
        }

        record.status = status;
        self.repository_call(ctx, "update", id, self.repository.update(ctx, &record))
            .await
    }

    /// Reconcile the declared content type with the stored bytes and mark the record done
    pub async fn finalize_content(&self, ctx: &RequestContext, id: Uuid) -> ContentResult<ContentRecord> {
        let mut record = self.get_content(ctx, id).await?;
        if record.status != ContentStatus::Uploaded {
            return Err(ContentError::InvalidInput(format!(
                "content {} is {}, expected {}",
                id,
                record.status,
                ContentStatus::Uploaded
            )));
        }

        let prefix = match self.read_prefix(ctx, &record.storage_path).await {
            Ok(prefix) => prefix,
            Err(err) => {
                if matches!(err, ContentError::Storage { .. }) {
                    self.mark_error(ctx, &mut record).await;
                }
                return Err(err);
            }
        };

        if let Some(detected) = content_type::detect(&prefix, &record.name) {
            if !content_type::same_type(&record.content_type, &detected) {
                match self.options.content_type_policy {
                    ContentTypePolicy::TrustClient => {
                        tracing::warn!(
                            "Content {} declared as {} but looks like {}",
                            id,
                            record.content_type,
                            detected
                        );
                    }
                    ContentTypePolicy::PreferDetected => {
                        tracing::info!(
                            "Content {} type corrected from {} to {}",
                            id,
                            record.content_type,
                            detected
                        );
                        record.content_type = detected;
                    }
                    ContentTypePolicy::RejectMismatch => {
                        let message = format!(
                            "content {} declared as {} but looks like {}",
                            id, record.content_type, detected
                        );
                        self.mark_error(ctx, &mut record).await;
                        return Err(ContentError::InvalidInput(message));
                    }
                }
            }
        }

        record.status = ContentStatus::Done;
        self.repository_call(ctx, "update", id, self.repository.update(ctx, &record))
            .await
    }

    async fn read_prefix(&self, ctx: &RequestContext, key: &str) -> ContentResult<Vec<u8>> {
        let reader = self
            .storage_call(ctx, "fetch", key, self.storage.fetch(ctx, key))
            .await?;

        let mut prefix = Vec::with_capacity(SNIFF_LEN);
        let mut limited = reader.take(SNIFF_LEN as u64);
        match ctx.run(limited.read_to_end(&mut prefix)).await {
            Ok(Ok(_)) => Ok(prefix),
            Ok(Err(e)) => Err(ContentError::Storage {
                op: "read",
                key: key.to_string(),
                source: StorageError::Io(e),
            }),
            Err(reason) => Err(ContentError::interrupted("read", reason)),
        }
    }

    async fn mark_error(&self, ctx: &RequestContext, record: &mut ContentRecord) {
        record.status = ContentStatus::Error;
        if let Err(e) = self
            .repository_call(ctx, "update", record.id, self.repository.update(ctx, record))
            .await
        {
            tracing::warn!("Failed to mark content {} as error: {}", record.id, e);
        }
    }
}
