use crate::context::Interrupted;
use crate::repository::RepositoryError;
use crate::storage::StorageError;

pub type ContentResult<T> = std::result::Result<T, ContentError>;

/// Coarse classification callers can branch on.
/// `NotFound` always means the record itself is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Cancelled,
    DeadlineExceeded,
    Backend,
}

/// Errors returned by the content service
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage {op} failed for '{key}': {source}")]
    Storage {
        op: &'static str,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Repository {op} failed for '{id}': {source}")]
    Repository {
        op: &'static str,
        id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Cancelled during {0}")]
    Cancelled(&'static str),

    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),
}

impl ContentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContentError::InvalidInput(_) => ErrorKind::InvalidInput,
            ContentError::NotFound(_) => ErrorKind::NotFound,
            ContentError::Conflict(_) => ErrorKind::Conflict,
            ContentError::Cancelled(_) => ErrorKind::Cancelled,
            ContentError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            // Bytes missing behind a live record are drift, not an absent resource
            ContentError::Storage { source, .. } => match source {
                StorageError::InvalidKey(_) | StorageError::InvalidInput(_) => ErrorKind::InvalidInput,
                StorageError::NotFound(_) | StorageError::Io(_) | StorageError::Backend(_) => {
                    ErrorKind::Backend
                }
            },
            ContentError::Repository { source, .. } => match source {
                RepositoryError::NotFound(_) => ErrorKind::NotFound,
                RepositoryError::Conflict(_) => ErrorKind::Conflict,
                _ => ErrorKind::Backend,
            },
        }
    }

    pub(crate) fn interrupted(op: &'static str, reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => ContentError::Cancelled(op),
            Interrupted::DeadlineExceeded => ContentError::DeadlineExceeded(op),
        }
    }

    /// Lift a repository error, turning not-found and conflict into their own variants
    pub(crate) fn from_repository(op: &'static str, id: impl Into<String>, source: RepositoryError) -> Self {
        let id = id.into();
        match source {
            RepositoryError::NotFound(_) => ContentError::NotFound(id),
            RepositoryError::Conflict(msg) => ContentError::Conflict(msg),
            source => ContentError::Repository { op, id, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let missing_bytes = ContentError::Storage {
            op: "fetch",
            key: "a/b".to_string(),
            source: StorageError::NotFound("a/b".to_string()),
        };
        assert_eq!(missing_bytes.kind(), ErrorKind::Backend);
        assert!(matches!(missing_bytes, ContentError::Storage { .. }));

        let corrupt = ContentError::from_repository("get", "x", RepositoryError::Corrupt("bad".into()));
        assert_eq!(corrupt.kind(), ErrorKind::Backend);

        let missing = ContentError::from_repository("get", "x", RepositoryError::NotFound("x".into()));
        assert!(matches!(missing, ContentError::NotFound(_)));

        assert_eq!(
            ContentError::interrupted("store", Interrupted::DeadlineExceeded).kind(),
            ErrorKind::DeadlineExceeded
        );
    }
}
