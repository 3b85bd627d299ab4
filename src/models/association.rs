use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

/// Link between a content record and an external business entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAssociation {
    pub id: Uuid,
    pub content_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: Metadata,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for associating content with an entity
#[derive(Debug, Clone, Default)]
pub struct NewAssociation {
    pub content_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: Metadata,
    pub created_by: String,
}

/// Associate content request
#[derive(Debug, Deserialize)]
pub struct AssociateContentRequest {
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub created_by: String,
}

/// Pagination for content-by-entity lookups
#[derive(Debug, Default, Deserialize)]
pub struct EntityContentQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}
