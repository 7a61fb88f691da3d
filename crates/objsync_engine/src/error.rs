//! Error types for the engine.

use crate::store::StoreError;
use objsync_model::{ObjectId, RepositoryLocation, SchemaError};
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while restoring or removing objects.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A fragment could not be read from the repository.
    #[error("repository error at {location}: {message}")]
    Repository {
        /// Fragment key.
        location: String,
        /// Error message.
        message: String,
    },

    /// A main fragment is corrupt. Never retried automatically.
    #[error("corrupt fragment {location}: {message}")]
    Parse {
        /// Fragment key.
        location: String,
        /// Error message.
        message: String,
    },

    /// Target store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Schema failure.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Object to remove does not exist.
    #[error("object {object_type} #{id} not found")]
    ObjectNotFound {
        /// Object type.
        object_type: String,
        /// Identifier.
        id: ObjectId,
    },

    /// Committing one record failed.
    #[error("failed to commit {object_type} '{identity}': {source}")]
    Commit {
        /// Object type.
        object_type: String,
        /// Record identity (code name or binding columns).
        identity: String,
        /// Underlying error.
        #[source]
        source: Box<SyncError>,
    },

    /// The designated default object of a type cannot be deleted while
    /// other types fall back to it.
    #[error("cannot delete default object '{code_name}' of {object_type}: {dependent_type}.{column} falls back to it")]
    DefaultObjectDeletion {
        /// Type of the default object.
        object_type: String,
        /// Default object code name.
        code_name: String,
        /// Type whose column falls back to the default.
        dependent_type: String,
        /// Fallback column.
        column: String,
    },

    /// A delete hook refused or failed.
    #[error("delete hook failed for {object_type}: {message}")]
    Hook {
        /// Object type.
        object_type: String,
        /// Error message.
        message: String,
    },

    /// Operation was cancelled.
    #[error("synchronization cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a repository error for `location`.
    pub fn repository(location: &RepositoryLocation, message: impl Into<String>) -> Self {
        Self::Repository {
            location: location.key.clone(),
            message: message.into(),
        }
    }

    /// Creates a parse error for `location`.
    pub fn parse(location: &RepositoryLocation, message: impl Into<String>) -> Self {
        Self::Parse {
            location: location.key.clone(),
            message: message.into(),
        }
    }

    /// Wraps an error with the record it happened on.
    pub fn commit(object_type: impl Into<String>, identity: impl Into<String>, source: SyncError) -> Self {
        Self::Commit {
            object_type: object_type.into(),
            identity: identity.into(),
            source: Box::new(source),
        }
    }

    /// True for cancellation, the only error that aborts a whole batch.
    pub fn is_cancellation(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::Commit { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_detected_through_wrapping() {
        assert!(SyncError::Cancelled.is_cancellation());
        assert!(SyncError::commit("a", "b", SyncError::Cancelled).is_cancellation());
        assert!(!SyncError::ObjectNotFound {
            object_type: "a".into(),
            id: 1
        }
        .is_cancellation());
    }

    #[test]
    fn error_display() {
        let err = SyncError::commit(
            "blog.article",
            "hello",
            SyncError::Store(StoreError::Backend("disk full".into())),
        );
        assert_eq!(
            err.to_string(),
            "failed to commit blog.article 'hello': store error: backend failure: disk full"
        );

        let loc = RepositoryLocation::new("blog.tag", "blog.tag/rust.json");
        assert_eq!(
            SyncError::parse(&loc, "expected object").to_string(),
            "corrupt fragment blog.tag/rust.json: expected object"
        );
    }
}
