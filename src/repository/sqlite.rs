use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::Database;
use crate::models::{
    now_utc, ContentAssociation, ContentFilter, ContentRecord, ContentStatus, Metadata,
    UpdateContent,
};
use crate::repository::{next_version, ContentRepository, RepositoryError, RepositoryResult};

/// SQLite-backed repository
pub struct SqliteRepository {
    db: Database,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromRow)]
struct ContentRow {
    id: String,
    name: String,
    description: String,
    content_type: String,
    size: i64,
    storage_path: String,
    status: String,
    metadata: String,
    created_by: String,
    source: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

#[derive(Debug, FromRow)]
struct AssociationRow {
    id: String,
    content_id: String,
    entity_type: String,
    entity_id: String,
    metadata: String,
    created_by: String,
    created_at: String,
    updated_at: String,
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(field: &str, value: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("{} '{}': {}", field, value, e)))
}

fn parse_id(field: &str, value: &str) -> RepositoryResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| RepositoryError::Corrupt(format!("{} '{}': {}", field, value, e)))
}

fn parse_metadata(value: &str) -> RepositoryResult<Metadata> {
    Ok(serde_json::from_str(value)?)
}

impl TryFrom<ContentRow> for ContentRecord {
    type Error = RepositoryError;

    fn try_from(row: ContentRow) -> RepositoryResult<Self> {
        let status = ContentStatus::parse(&row.status)
            .ok_or_else(|| RepositoryError::Corrupt(format!("status '{}'", row.status)))?;

        Ok(ContentRecord {
            id: parse_id("id", &row.id)?,
            name: row.name,
            description: row.description,
            content_type: row.content_type,
            size: row.size,
            storage_path: row.storage_path,
            status,
            metadata: parse_metadata(&row.metadata)?,
            created_by: row.created_by,
            source: row.source,
            created_at: parse_time("created_at", &row.created_at)?,
            updated_at: parse_time("updated_at", &row.updated_at)?,
            deleted_at: row
                .deleted_at
                .as_deref()
                .map(|t| parse_time("deleted_at", t))
                .transpose()?,
        })
    }
}

impl TryFrom<AssociationRow> for ContentAssociation {
    type Error = RepositoryError;

    fn try_from(row: AssociationRow) -> RepositoryResult<Self> {
        Ok(ContentAssociation {
            id: parse_id("id", &row.id)?,
            content_id: parse_id("content_id", &row.content_id)?,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            metadata: parse_metadata(&row.metadata)?,
            created_by: row.created_by,
            created_at: parse_time("created_at", &row.created_at)?,
            updated_at: parse_time("updated_at", &row.updated_at)?,
        })
    }
}

fn rows_into<R, T>(rows: Vec<R>) -> RepositoryResult<Vec<T>>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Map unique/primary key violations to `Conflict`
fn map_insert_error(e: sqlx::Error, what: String) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed") {
            return RepositoryError::Conflict(what);
        }
    }
    RepositoryError::Database(e)
}

/// JSON path selecting one top-level metadata key
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

/// Append the WHERE clause shared by the count and page queries
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ContentFilter) -> RepositoryResult<()> {
    qb.push(" WHERE deleted_at IS NULL");

    if let Some(content_type) = &filter.content_type {
        qb.push(" AND content_type = ").push_bind(content_type.clone());
    }
    if let Some(min_size) = filter.min_size {
        qb.push(" AND size >= ").push_bind(min_size);
    }
    if let Some(max_size) = filter.max_size {
        qb.push(" AND size <= ").push_bind(max_size);
    }
    if let Some(from) = &filter.created_from {
        qb.push(" AND created_at >= ").push_bind(format_time(from));
    }
    if let Some(to) = &filter.created_to {
        qb.push(" AND created_at <= ").push_bind(format_time(to));
    }

    for (key, value) in &filter.metadata {
        qb.push(" AND json_type(metadata, ")
            .push_bind(json_path(key))
            .push(") = ")
            .push_bind(json_type_name(value));

        // null and booleans are fully identified by their type
        if !value.is_null() && !value.is_boolean() {
            qb.push(" AND json_extract(metadata, ")
                .push_bind(json_path(key))
                .push(") = json_extract(")
                .push_bind(serde_json::to_string(value)?)
                .push(", '$')");
        }
    }
    Ok(())
}

/// Name SQLite's `json_type` reports for a value of this shape
fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;

    match value {
        Value::Null => "null",
        Value::Bool(true) => "true",
        Value::Bool(false) => "false",
        Value::Number(n) if n.is_f64() => "real",
        Value::Number(_) => "integer",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl ContentRepository for SqliteRepository {
    async fn create(&self, _ctx: &RequestContext, record: &ContentRecord) -> RepositoryResult<ContentRecord> {
        let now = now_utc();
        let mut stored = record.clone();
        stored.created_at = now;
        stored.updated_at = now;
        stored.deleted_at = None;

        sqlx::query(
            r#"
            INSERT INTO contents (id, name, description, content_type, size, storage_path, status,
                                  metadata, created_by, source, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stored.id.to_string())
        .bind(&stored.name)
        .bind(&stored.description)
        .bind(&stored.content_type)
        .bind(stored.size)
        .bind(&stored.storage_path)
        .bind(stored.status.as_str())
        .bind(serde_json::to_string(&stored.metadata)?)
        .bind(&stored.created_by)
        .bind(&stored.source)
        .bind(format_time(&now))
        .bind(format_time(&now))
        .execute(self.db.pool())
        .await
        .map_err(|e| map_insert_error(e, format!("content {} already exists", stored.id)))?;

        Ok(stored)
    }

    async fn get_by_id(&self, _ctx: &RequestContext, id: Uuid) -> RepositoryResult<ContentRecord> {
        let row: Option<ContentRow> =
            sqlx::query_as("SELECT * FROM contents WHERE id = ? AND deleted_at IS NULL")
                .bind(id.to_string())
                .fetch_optional(self.db.pool())
                .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn update(&self, _ctx: &RequestContext, record: &ContentRecord) -> RepositoryResult<ContentRecord> {
        let row: Option<ContentRow> = sqlx::query_as(
            r#"
            UPDATE contents
            SET name = ?, description = ?, content_type = ?, size = ?, status = ?,
                metadata = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL AND updated_at = ?
            RETURNING *
            "#,
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.content_type)
        .bind(record.size)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(format_time(&next_version(record.updated_at)))
        .bind(record.id.to_string())
        .bind(format_time(&record.updated_at))
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let live: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM contents WHERE id = ? AND deleted_at IS NULL",
                )
                .bind(record.id.to_string())
                .fetch_one(self.db.pool())
                .await?;

                if live > 0 {
                    Err(RepositoryError::Conflict(format!(
                        "content {} was modified concurrently",
                        record.id
                    )))
                } else {
                    Err(RepositoryError::NotFound(record.id.to_string()))
                }
            }
        }
    }

    async fn update_details(
        &self,
        _ctx: &RequestContext,
        id: Uuid,
        changes: &UpdateContent,
    ) -> RepositoryResult<ContentRecord> {
        let metadata = changes
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row: Option<ContentRow> = sqlx::query_as(
            r#"
            UPDATE contents
            SET name = COALESCE(?, name), description = COALESCE(?, description),
                metadata = COALESCE(?, metadata), updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(metadata)
        .bind(format_time(&now_utc()))
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn soft_delete(&self, _ctx: &RequestContext, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE contents SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(format_time(&now_utc()))
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        filter: &ContentFilter,
        offset: i64,
        limit: i64,
    ) -> RepositoryResult<(Vec<ContentRecord>, i64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM contents");
        push_filter(&mut count_query, filter)?;
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.db.pool())
            .await?;

        let mut page_query = QueryBuilder::<Sqlite>::new("SELECT * FROM contents");
        push_filter(&mut page_query, filter)?;
        page_query
            .push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows: Vec<ContentRow> = page_query
            .build_query_as()
            .fetch_all(self.db.pool())
            .await?;

        Ok((rows_into(rows)?, total))
    }

    async fn create_association(
        &self,
        _ctx: &RequestContext,
        association: &ContentAssociation,
    ) -> RepositoryResult<ContentAssociation> {
        let now = now_utc();
        let mut stored = association.clone();
        stored.created_at = now;
        stored.updated_at = now;

        sqlx::query(
            r#"
            INSERT INTO content_associations (id, content_id, entity_type, entity_id, metadata,
                                              created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stored.id.to_string())
        .bind(stored.content_id.to_string())
        .bind(&stored.entity_type)
        .bind(&stored.entity_id)
        .bind(serde_json::to_string(&stored.metadata)?)
        .bind(&stored.created_by)
        .bind(format_time(&now))
        .bind(format_time(&now))
        .execute(self.db.pool())
        .await
        .map_err(|e| {
            map_insert_error(
                e,
                format!(
                    "content {} is already associated with {}/{}",
                    stored.content_id, stored.entity_type, stored.entity_id
                ),
            )
        })?;

        Ok(stored)
    }

    async fn get_association_by_link(
        &self,
        _ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<ContentAssociation> {
        let row: Option<AssociationRow> = sqlx::query_as(
            "SELECT * FROM content_associations WHERE content_id = ? AND entity_type = ? AND entity_id = ?",
        )
        .bind(content_id.to_string())
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.ok_or_else(|| {
            RepositoryError::NotFound(format!("{}/{}/{}", content_id, entity_type, entity_id))
        })?
        .try_into()
    }

    async fn list_associations_by_content(
        &self,
        _ctx: &RequestContext,
        content_id: Uuid,
    ) -> RepositoryResult<Vec<ContentAssociation>> {
        let rows: Vec<AssociationRow> = sqlx::query_as(
            "SELECT * FROM content_associations WHERE content_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(content_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows_into(rows)
    }

    async fn delete_association(
        &self,
        _ctx: &RequestContext,
        content_id: Uuid,
        entity_type: &str,
        entity_id: &str,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            "DELETE FROM content_associations WHERE content_id = ? AND entity_type = ? AND entity_id = ?",
        )
        .bind(content_id.to_string())
        .bind(entity_type)
        .bind(entity_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "{}/{}/{}",
                content_id, entity_type, entity_id
            )));
        }
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
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM contents c
            JOIN content_associations a ON a.content_id = c.id
            WHERE a.entity_type = ? AND a.entity_id = ? AND c.deleted_at IS NULL
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(self.db.pool())
        .await?;

        let rows: Vec<ContentRow> = sqlx::query_as(
            r#"
            SELECT c.* FROM contents c
            JOIN content_associations a ON a.content_id = c.id
            WHERE a.entity_type = ? AND a.entity_id = ? AND c.deleted_at IS NULL
            ORDER BY c.created_at DESC, c.id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        Ok((rows_into(rows)?, total))
    }
}
