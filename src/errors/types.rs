//! Error type definitions for the restream engine

use thiserror::Error;
use uuid::Uuid;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Broadcast process errors
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Another stream is already live on the destination key
    #[error(
        "Destination conflict: key '{destination_key}' is already live on stream {live_stream_id}"
    )]
    Conflict {
        destination_key: String,
        live_stream_id: Uuid,
    },

    /// A resource needed at start time is absent (e.g. the video file)
    #[error("Resource missing: {resource} - {message}")]
    ResourceMissing { resource: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// SQL query execution failures
    #[error("Query failed: {query} - {message}")]
    QueryFailed { query: String, message: String },

    /// A stored value could not be decoded into its domain type
    #[error("Corrupt record: {table}.{field} = {value}")]
    CorruptRecord {
        table: String,
        field: String,
        value: String,
    },

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },

    /// Migration failures
    #[error("Migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),
}

/// Broadcast process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The external command could not be spawned
    #[error("Failed to spawn {command}: {message}")]
    SpawnFailed { command: String, message: String },

    /// The process did not acknowledge a kill request
    #[error("Kill failed for stream {stream_id}: {message}")]
    KillFailed { stream_id: Uuid, message: String },
}

impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create a destination conflict error
    pub fn conflict<K: Into<String>>(destination_key: K, live_stream_id: Uuid) -> Self {
        Self::Conflict {
            destination_key: destination_key.into(),
            live_stream_id,
        }
    }

    /// Create a resource missing error
    pub fn resource_missing<R: Into<String>, M: Into<String>>(resource: R, message: M) -> Self {
        Self::ResourceMissing {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is worth retrying on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Repository(_)
                | Self::ResourceMissing { .. }
                | Self::Process(_)
        )
    }
}

impl RepositoryError {
    /// Create a query failed error
    pub fn query_failed<Q: Into<String>, M: ToString>(query: Q, message: M) -> Self {
        Self::QueryFailed {
            query: query.into(),
            message: message.to_string(),
        }
    }

    /// Create a corrupt record error
    pub fn corrupt_record<T: Into<String>, F: Into<String>, V: Into<String>>(
        table: T,
        field: F,
        value: V,
    ) -> Self {
        Self::CorruptRecord {
            table: table.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a record not found error
    pub fn record_not_found<T: Into<String>, F: Into<String>, V: Into<String>>(
        table: T,
        field: F,
        value: V,
    ) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_key_and_holder() {
        let holder = Uuid::new_v4();
        let err = AppError::conflict("abcd-1234", holder);
        let message = err.to_string();
        assert!(message.contains("abcd-1234"));
        assert!(message.contains(&holder.to_string()));
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::resource_missing("video_file", "/tmp/x.mp4").is_transient());
        assert!(AppError::Repository(RepositoryError::query_failed("q", "boom")).is_transient());
        assert!(!AppError::validation("bad").is_transient());
        assert!(!AppError::conflict("k", Uuid::new_v4()).is_transient());
    }
}
