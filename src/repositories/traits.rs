//! Persisted store contract consumed by the engine

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::RepositoryResult;
use crate::models::{LifecycleUpdate, Stream};

/// Durable record of streams as seen by the scheduling core
///
/// Lifecycle updates to a single stream must be atomic; nothing here
/// requires atomicity across streams.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Ids of the streams the reconciliation loop must look at: everything
    /// not resting offline, plus offline streams with a pending crash heal.
    /// Rows are decoded one at a time by the caller, so a single corrupt
    /// record cannot hide the others.
    async fn list_reconcilable(&self) -> RepositoryResult<Vec<Uuid>>;

    async fn list_all(&self) -> RepositoryResult<Vec<Stream>>;

    async fn find_stream(&self, id: Uuid) -> RepositoryResult<Option<Stream>>;

    /// Streams persisted as live on the given destination key
    async fn find_live_by_destination(
        &self,
        destination_key: &str,
    ) -> RepositoryResult<Vec<Stream>>;

    async fn insert_stream(&self, stream: &Stream) -> RepositoryResult<()>;

    /// Persist configuration fields (title, destination, video, schedule, window)
    async fn update_config(&self, stream: &Stream) -> RepositoryResult<()>;

    /// Apply a lifecycle change in one statement. Returns false when the
    /// stream no longer exists.
    async fn update_lifecycle(&self, id: Uuid, update: LifecycleUpdate) -> RepositoryResult<bool>;

    /// Returns false when nothing was deleted
    async fn delete_stream(&self, id: Uuid) -> RepositoryResult<bool>;

    /// Resolved file location for a video, if the video exists
    async fn video_file_path(&self, video_id: Uuid) -> RepositoryResult<Option<String>>;
}
