//! Centralized error handling for the restream engine
//!
//! Errors are grouped the way operators experience them:
//!
//! - **Configuration errors**: malformed schedules, unknown videos, invalid settings.
//!   Rejected synchronously where the stream is created, edited or started.
//! - **Resource errors**: the video file is missing at start time. Retried every tick.
//! - **Process errors**: the broadcast process could not be spawned or killed.
//! - **Persistence errors**: SQLite failures. Deferred to the next tick by the loop.
//! - **Conflicts**: a destination key is already live on another stream.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;
