//! Operator-facing business logic
//!
//! Operator actions take the same per-stream lock as the reconciliation
//! tick and launch through the same [`StreamEngine`](crate::engine::StreamEngine),
//! so the destination guard and supervisor rules are identical whichever side acts.

pub mod recovery;
pub mod stream_service;

pub use recovery::{recover_videos, RecoveryReport};
pub use stream_service::StreamService;
