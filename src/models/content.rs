use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Free-form JSON metadata attached to records
pub type Metadata = serde_json::Map<String, Value>;

/// Current time at the precision every repository backend can store
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Lifecycle status of a content record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Created,
    Uploaded,
    Done,
    Error,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Created => "created",
            ContentStatus::Uploaded => "uploaded",
            ContentStatus::Done => "done",
            ContentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ContentStatus::Created),
            "uploaded" => Some(ContentStatus::Uploaded),
            "done" => Some(ContentStatus::Done),
            "error" => Some(ContentStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContentStatus::Done | ContentStatus::Error)
    }

    /// `created -> uploaded -> done`, and any non-terminal state may fail to `error`
    pub fn can_transition_to(&self, next: ContentStatus) -> bool {
        matches!(
            (self, next),
            (ContentStatus::Created, ContentStatus::Uploaded)
                | (ContentStatus::Uploaded, ContentStatus::Done)
                | (ContentStatus::Created, ContentStatus::Error)
                | (ContentStatus::Uploaded, ContentStatus::Error)
        )
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub content_type: String,
    pub size: i64,
    pub storage_path: String,
    pub status: ContentStatus,
    pub metadata: Metadata,
    pub created_by: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ContentRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the record satisfies every criterion of `filter`
    pub fn matches(&self, filter: &ContentFilter) -> bool {
        if let Some(content_type) = &filter.content_type {
            if &self.content_type != content_type {
                return false;
            }
        }
        if let Some(min_size) = filter.min_size {
            if self.size < min_size {
                return false;
            }
        }
        if let Some(max_size) = filter.max_size {
            if self.size > max_size {
                return false;
            }
        }
        if let Some(from) = filter.created_from {
            if self.created_at < from {
                return false;
            }
        }
        if let Some(to) = filter.created_to {
            if self.created_at > to {
                return false;
            }
        }
        filter
            .metadata
            .iter()
            .all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// Input for creating content
#[derive(Debug, Clone, Default)]
pub struct NewContent {
    pub name: String,
    pub description: String,
    pub content_type: String,
    pub size: i64,
    pub metadata: Metadata,
    pub created_by: String,
    pub source: String,
}

/// Partial update; a field changes only when supplied and non-empty
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateContent {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Listing criteria, combined with AND
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub content_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

/// Filter plus 1-based pagination
#[derive(Debug, Clone, Default)]
pub struct ContentQuery {
    pub filter: ContentFilter,
    pub page: i64,
    pub page_size: i64,
}

/// One page of content records
#[derive(Debug, Clone, Serialize)]
pub struct ContentPage {
    pub items: Vec<ContentRecord>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl ContentPage {
    pub fn new(items: Vec<ContentRecord>, total_count: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total_count + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            items,
            total_count,
            page,
            page_size,
            total_pages,
        }
    }
}

/// List query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListContentQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub content_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    /// JSON object of metadata pairs that must all match
    pub metadata: Option<String>,
}

impl ListContentQuery {
    pub fn into_query(self) -> Result<ContentQuery, String> {
        let parse_time = |name: &str, value: Option<String>| -> Result<Option<DateTime<Utc>>, String> {
            match value.filter(|v| !v.is_empty()) {
                Some(v) => DateTime::parse_from_rfc3339(&v)
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(|e| format!("Invalid {}: {}", name, e)),
                None => Ok(None),
            }
        };

        let metadata = match self.metadata.filter(|m| !m.is_empty()) {
            Some(raw) => serde_json::from_str::<Metadata>(&raw)
                .map_err(|e| format!("Invalid metadata filter: {}", e))?,
            None => Metadata::new(),
        };

        Ok(ContentQuery {
            filter: ContentFilter {
                content_type: self.content_type.filter(|c| !c.is_empty()),
                min_size: self.min_size,
                max_size: self.max_size,
                created_from: parse_time("created_from", self.created_from)?,
                created_to: parse_time("created_to", self.created_to)?,
                metadata,
            },
            page: self.page.unwrap_or(0),
            page_size: self.page_size.unwrap_or(0),
        })
    }
}

/// Signed URL query parameters
#[derive(Debug, Deserialize)]
pub struct ContentUrlQuery {
    /// Validity in seconds
    pub expiry: Option<u64>,
}

/// Signed URL response
#[derive(Debug, Serialize)]
pub struct ContentUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

/// Status transition request
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ContentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ContentRecord {
        let now = now_utc();
        ContentRecord {
            id: Uuid::new_v4(),
            name: "report.pdf".to_string(),
            description: String::new(),
            content_type: "application/pdf".to_string(),
            size: 1024,
            storage_path: "x/report.pdf".to_string(),
            status: ContentStatus::Uploaded,
            metadata: json!({"tenant": "acme", "pages": 3}).as_object().cloned().unwrap(),
            created_by: String::new(),
            source: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        use ContentStatus::*;
        assert!(Created.can_transition_to(Uploaded));
        assert!(Uploaded.can_transition_to(Done));
        assert!(Created.can_transition_to(Error));
        assert!(Uploaded.can_transition_to(Error));

        assert!(!Created.can_transition_to(Done));
        assert!(!Uploaded.can_transition_to(Uploaded));
        for next in [Created, Uploaded, Done, Error] {
            assert!(!Done.can_transition_to(next));
            assert!(!Error.can_transition_to(next));
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ContentStatus::Created,
            ContentStatus::Uploaded,
            ContentStatus::Done,
            ContentStatus::Error,
        ] {
            assert_eq!(ContentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ContentStatus::parse("bogus"), None);
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let r = record();

        let mut filter = ContentFilter {
            content_type: Some("application/pdf".to_string()),
            min_size: Some(1024),
            max_size: Some(1024),
            ..Default::default()
        };
        filter.metadata.insert("tenant".to_string(), json!("acme"));
        assert!(r.matches(&filter));

        filter.metadata.insert("pages".to_string(), json!(4));
        assert!(!r.matches(&filter));

        let filter = ContentFilter {
            content_type: Some("image/png".to_string()),
            ..Default::default()
        };
        assert!(!r.matches(&filter));
    }

    #[test]
    fn test_page_count() {
        assert_eq!(ContentPage::new(vec![], 0, 1, 20).total_pages, 0);
        assert_eq!(ContentPage::new(vec![], 20, 1, 20).total_pages, 1);
        assert_eq!(ContentPage::new(vec![], 21, 1, 20).total_pages, 2);
    }

    #[test]
    fn test_list_query_parsing() {
        let query = ListContentQuery {
            content_type: Some(String::new()),
            created_from: Some("2024-01-01T00:00:00Z".to_string()),
            metadata: Some(r#"{"tenant":"acme"}"#.to_string()),
            ..Default::default()
        }
        .into_query()
        .unwrap();

        assert!(query.filter.content_type.is_none());
        assert!(query.filter.created_from.is_some());
        assert_eq!(query.filter.metadata.get("tenant"), Some(&json!("acme")));

        let bad = ListContentQuery {
            metadata: Some("[1,2]".to_string()),
            ..Default::default()
        };
        assert!(bad.into_query().is_err());
    }
}
