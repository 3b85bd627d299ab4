pub mod memory;
pub mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::models::{now_utc, ContentAssociation, ContentFilter, ContentRecord, UpdateContent};

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Errors raised by repository backends
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Metadata persistence for content records and their associations.
///
/// Soft-deleted records are invisible to every read path. `update`,
/// `update_details` and `soft_delete` are single conditional writes: they only
/// apply to a record that exists and is not deleted at the moment of the write.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Insert a new record, stamping `created_at`/`updated_at`.
    /// Fails with `Conflict` if the identifier was ever used.
    async fn create(&self, ctx: &RequestContext, record: &ContentRecord) -> RepositoryResult<ContentRecord>;

    async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> RepositoryResult<ContentRecord>;

    /// Replace the mutable fields of a live record.
    /// `id`, `storage_path`, `created_at`, `created_by` and `source` are kept.
    ///
    /// `record.updated_at` is the version the caller read; the write fails with
    /// `Conflict` if the stored record has changed since.
    async fn update(&self, ctx: &RequestContext, record: &ContentRecord) -> RepositoryResult<ContentRecord>;

    /// Write only the supplied name, description and metadata of a live record.
    /// Status, content type and size are never touched.
    async fn update_details(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        changes: &UpdateContent,
    ) -> RepositoryResult<ContentRecord>;

    async fn soft_delete(&self, ctx: &RequestContext, id: Uuid) -> RepositoryResult<()>;

    /// Matching live records ordered by `created_at DESC, id ASC`, plus the total match count
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &ContentFilter,
        offset: i64,
        limit: i64,
    ) -> RepositoryResult<(Vec<ContentRecord>, i64)>;

    /// Fails with `Conflict` if the (content, entity type, entity id) link exists
    async fn create_association(
        &self,
        ctx: &RequestContext,
        association: &ContentAssociation,
    ) -> RepositoryResult<ContentAssociation>;

    async fn get_association_by_link(
        &self,
        ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<ContentAssociation>;

    /// Associations of one record ordered by `created_at ASC, id ASC`
    async fn list_associations_by_content(
        &self,
        ctx: &RequestContext,
        content_id: Uuid,
    ) -> RepositoryResult<Vec<ContentAssociation>>;

    async fn delete_association(
        &self,
        ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<()>;

    /// Live records linked to an entity, same ordering as `list`
    async fn list_content_by_entity(
        &self,
        ctx: &RequestContext,
        entity_type: &str,
        entity_id: &str,
        offset: i64,
        limit: i64,
    ) -> RepositoryResult<(Vec<ContentRecord>, i64)>;
}

/// Newest first, ties broken by identifier so pages never overlap
pub(crate) fn listing_order(a: &ContentRecord, b: &ContentRecord) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
}

/// Timestamp for a write that replaces version `previous`; always later than it
pub(crate) fn next_version(previous: DateTime<Utc>) -> DateTime<Utc> {
    now_utc().max(previous + chrono::Duration::microseconds(1))
}
