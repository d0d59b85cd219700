//! Data access for streams and videos
//!
//! The engine talks to persistence only through [`StreamStore`], so the
//! scheduling core never depends on SQL directly. [`SqliteStreamRepository`]
//! is the production implementation; [`VideoRepository`] serves the storage
//! side (listing, recovery scan).

pub mod stream;
pub mod traits;
pub mod video;

pub use stream::SqliteStreamRepository;
pub use traits::StreamStore;
pub use video::VideoRepository;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{RepositoryError, RepositoryResult};

pub(crate) fn parse_uuid(table: &str, field: &str, value: &str) -> RepositoryResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| RepositoryError::corrupt_record(table, field, value))
}

pub(crate) fn parse_timestamp(
    table: &str,
    field: &str,
    value: &str,
) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::corrupt_record(table, field, value))
}

pub(crate) fn parse_optional_timestamp(
    table: &str,
    field: &str,
    value: Option<String>,
) -> RepositoryResult<Option<DateTime<Utc>>> {
    value
        .map(|v| parse_timestamp(table, field, &v))
        .transpose()
}
