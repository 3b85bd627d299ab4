use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::models::{now_utc, ContentAssociation, ContentFilter, ContentRecord, UpdateContent};
use crate::repository::{
    listing_order, next_version, ContentRepository, RepositoryError, RepositoryResult,
};

#[derive(Default)]
struct State {
    contents: HashMap<Uuid, ContentRecord>,
    associations: HashMap<Uuid, ContentAssociation>,
}

/// In-memory repository; every operation is a single critical section
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate(mut records: Vec<ContentRecord>, offset: i64, limit: i64) -> (Vec<ContentRecord>, i64) {
    records.sort_by(listing_order);
    let total = records.len() as i64;
    let items = records
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (items, total)
}

#[async_trait]
impl ContentRepository for MemoryRepository {
    async fn create(&self, _ctx: &RequestContext, record: &ContentRecord) -> RepositoryResult<ContentRecord> {
        let mut state = self.state.write().await;
        if state.contents.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "content {} already exists",
                record.id
            )));
        }

        let now = now_utc();
        let mut stored = record.clone();
        stored.created_at = now;
        stored.updated_at = now;
        stored.deleted_at = None;

        state.contents.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, _ctx: &RequestContext, id: Uuid) -> RepositoryResult<ContentRecord> {
        self.state
            .read()
            .await
            .contents
            .get(&id)
            .filter(|r| !r.is_deleted())
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update(&self, _ctx: &RequestContext, record: &ContentRecord) -> RepositoryResult<ContentRecord> {
        let mut state = self.state.write().await;
        let existing = state
            .contents
            .get_mut(&record.id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| RepositoryError::NotFound(record.id.to_string()))?;

        if existing.updated_at != record.updated_at {
            return Err(RepositoryError::Conflict(format!(
                "content {} was modified concurrently",
                record.id
            )));
        }

        existing.name = record.name.clone();
        existing.description = record.description.clone();
        existing.content_type = record.content_type.clone();
        existing.size = record.size;
        existing.status = record.status;
        existing.metadata = record.metadata.clone();
        existing.updated_at = next_version(existing.updated_at);

        Ok(existing.clone())
    }

    async fn update_details(
        &self,
        _ctx: &RequestContext,
        id: Uuid,
        changes: &UpdateContent,
    ) -> RepositoryResult<ContentRecord> {
        let mut state = self.state.write().await;
        let existing = state
            .contents
            .get_mut(&id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        if let Some(name) = &changes.name {
            existing.name = name.clone();
        }
        if let Some(description) = &changes.description {
            existing.description = description.clone();
        }
        if let Some(metadata) = &changes.metadata {
            existing.metadata = metadata.clone();
        }
        existing.updated_at = next_version(existing.updated_at);

        Ok(existing.clone())
    }

    async fn soft_delete(&self, _ctx: &RequestContext, id: Uuid) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let existing = state
            .contents
            .get_mut(&id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        existing.deleted_at = Some(now_utc());
        Ok(())
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        filter: &ContentFilter,
        offset: i64,
        limit: i64,
    ) -> RepositoryResult<(Vec<ContentRecord>, i64)> {
        let state = self.state.read().await;
        let matching = state
            .contents
            .values()
            .filter(|r| !r.is_deleted() && r.matches(filter))
            .cloned()
            .collect();
        Ok(paginate(matching, offset, limit))
    }

    async fn create_association(
        &self,
        _ctx: &RequestContext,
        association: &ContentAssociation,
    ) -> RepositoryResult<ContentAssociation> {
        let mut state = self.state.write().await;

        let duplicate = state.associations.values().any(|a| {
            a.content_id == association.content_id
                && a.entity_type == association.entity_type
                && a.entity_id == association.entity_id
        });
        if duplicate || state.associations.contains_key(&association.id) {
            return Err(RepositoryError::Conflict(format!(
                "content {} is already associated with {}/{}",
                association.content_id, association.entity_type, association.entity_id
            )));
        }

        let now = now_utc();
        let mut stored = association.clone();
        stored.created_at = now;
        stored.updated_at = now;

        state.associations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_association_by_link(
        &self,
        _ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<ContentAssociation> {
        self.state
            .read()
            .await
            .associations
            .values()
            .find(|a| {
                a.content_id == content_id && a.entity_type == entity_type && a.entity_id == entity_id
            })
            .cloned()
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("{}/{}/{}", content_id, entity_type, entity_id))
            })
    }

    async fn list_associations_by_content(
        &self,
        _ctx: &RequestContext,
        content_id: Uuid,
    ) -> RepositoryResult<Vec<ContentAssociation>> {
        let state = self.state.read().await;
        let mut associations: Vec<ContentAssociation> = state
            .associations
            .values()
            .filter(|a| a.content_id == content_id)
            .cloned()
            .collect();
        associations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(associations)
    }

    async fn delete_association(
        &self,
        _ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let id = state
            .associations
            .values()
            .find(|a| {
                a.content_id == content_id && a.entity_type == entity_type && a.entity_id == entity_id
            })
            .map(|a| a.id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("{}/{}/{}", content_id, entity_type, entity_id))
            })?;

        state.associations.remove(&id);
        Ok(())
    }

    async fn list_content_by_entity(
        &self,
        _ctx: &RequestContext,
        entity_type: &str,
        entity_id: &str,
        offset: i64,
        limit: i64,
    ) -> RepositoryResult<(Vec<ContentRecord>, i64)> {
        let state = self.state.read().await;
        let linked = state
            .associations
            .values()
            .filter(|a| a.entity_type == entity_type && a.entity_id == entity_id)
            .filter_map(|a| state.contents.get(&a.content_id))
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect();
        Ok(paginate(linked, offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentStatus, Metadata};
    use serde_json::json;

    fn record(name: &str, size: i64) -> ContentRecord {
        let now = now_utc();
        let id = Uuid::new_v4();
        ContentRecord {
            id,
            name: name.to_string(),
            description: String::new(),
            content_type: "text/plain".to_string(),
            size,
            storage_path: format!("{}/{}", id, name),
            status: ContentStatus::Uploaded,
            metadata: Metadata::new(),
            created_by: "tester".to_string(),
            source: "direct_upload".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn association(content_id: Uuid, entity_id: &str) -> ContentAssociation {
        let now = now_utc();
        ContentAssociation {
            id: Uuid::new_v4(),
            content_id,
            entity_type: "invoice".to_string(),
            entity_id: entity_id.to_string(),
            metadata: Metadata::new(),
            created_by: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_duplicate_id_conflicts() {
        let repo = MemoryRepository::new();
        let ctx = RequestContext::background();
        let r = record("a.txt", 1);

        repo.create(&ctx, &r).await.unwrap();
        repo.soft_delete(&ctx, r.id).await.unwrap();

        assert!(matches!(
            repo.create(&ctx, &r).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_immutable_fields() {
        let repo = MemoryRepository::new();
        let ctx = RequestContext::background();
        let created = repo.create(&ctx, &record("a.txt", 1)).await.unwrap();

        let mut changed = created.clone();
        changed.name = "b.txt".to_string();
        changed.storage_path = "elsewhere".to_string();
        changed.created_by = "someone else".to_string();
        changed.metadata.insert("k".to_string(), json!("v"));

        let updated = repo.update(&ctx, &changed).await.unwrap();
        assert_eq!(updated.name, "b.txt");
        assert_eq!(updated.storage_path, created.storage_path);
        assert_eq!(updated.created_by, created.created_by);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.metadata.get("k"), Some(&json!("v")));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let repo = MemoryRepository::new();
        let ctx = RequestContext::background();
        let created = repo.create(&ctx, &record("a.txt", 1)).await.unwrap();

        let mut done = created.clone();
        done.status = ContentStatus::Done;
        let first = repo.update(&ctx, &done).await.unwrap();
        assert!(first.updated_at > created.updated_at);

        // Written from the pre-update read
        let mut stale = created.clone();
        stale.status = ContentStatus::Error;
        assert!(matches!(
            repo.update(&ctx, &stale).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert_eq!(
            repo.get_by_id(&ctx, created.id).await.unwrap().status,
            ContentStatus::Done
        );
    }

    #[tokio::test]
    async fn test_update_details_leaves_status_and_type() {
        let repo = MemoryRepository::new();
        let ctx = RequestContext::background();
        let created = repo.create(&ctx, &record("a.txt", 1)).await.unwrap();

        let mut done = created.clone();
        done.status = ContentStatus::Done;
        done.content_type = "application/pdf".to_string();
        let done = repo.update(&ctx, &done).await.unwrap();

        let updated = repo
            .update_details(
                &ctx,
                created.id,
                &UpdateContent {
                    description: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ContentStatus::Done);
        assert_eq!(updated.content_type, "application/pdf");
        assert_eq!(updated.name, "a.txt");
        assert_eq!(updated.description, "renamed");
        assert!(updated.updated_at > done.updated_at);

        repo.soft_delete(&ctx, created.id).await.unwrap();
        assert!(matches!(
            repo.update_details(&ctx, created.id, &UpdateContent::default()).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_records_are_invisible() {
        let repo = MemoryRepository::new();
        let ctx = RequestContext::background();
        let created = repo.create(&ctx, &record("a.txt", 1)).await.unwrap();

        repo.soft_delete(&ctx, created.id).await.unwrap();

        assert!(matches!(
            repo.get_by_id(&ctx, created.id).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.update(&ctx, &created).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.soft_delete(&ctx, created.id).await,
            Err(RepositoryError::NotFound(_))
        ));
        let (items, total) = repo
            .list(&ctx, &ContentFilter::default(), 0, 10)
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_association_conflict_and_entity_lookup() {
        let repo = MemoryRepository::new();
        let ctx = RequestContext::background();
        let a = repo.create(&ctx, &record("a.txt", 1)).await.unwrap();
        let b = repo.create(&ctx, &record("b.txt", 2)).await.unwrap();

        repo.create_association(&ctx, &association(a.id, "inv-1"))
            .await
            .unwrap();
        repo.create_association(&ctx, &association(b.id, "inv-1"))
            .await
            .unwrap();
        assert!(matches!(
            repo.create_association(&ctx, &association(a.id, "inv-1")).await,
            Err(RepositoryError::Conflict(_))
        ));

        repo.soft_delete(&ctx, b.id).await.unwrap();
        let (items, total) = repo
            .list_content_by_entity(&ctx, "invoice", "inv-1", 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, a.id);

        repo.delete_association(&ctx, a.id, "invoice", "inv-1")
            .await
            .unwrap();
        assert!(matches!(
            repo.get_association_by_link(&ctx, a.id, "invoice", "inv-1").await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
