//! Shared activation machinery
//!
//! The reconciliation tick and operator actions both go through
//! [`StreamEngine`], so destination checks, video resolution and process
//! launching follow one set of rules regardless of who asked.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::guard::DestinationGuard;
use crate::models::{LifecycleUpdate, ScheduleKind, Stream};
use crate::notifications::{Notifier, StartTrigger, StreamEvent};
use crate::repositories::StreamStore;
use crate::schedule::{self, ScheduleEvaluation};
use crate::supervisor::{LaunchSpec, ProcessSupervisor, StartOutcome};

/// Source of "now" for schedule decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[cfg(test)]
pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

#[cfg(test)]
impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// One async mutex per stream id, serializing the tick against operator actions
#[derive(Default)]
pub struct StreamLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamLocks {
    pub async fn acquire(&self, stream_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stream_id)
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a deleted stream. An entry that is still
    /// held or awaited stays, so later callers queue on the same mutex.
    pub fn forget(&self, stream_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&stream_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&stream_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct StreamEngine {
    store: Arc<dyn StreamStore>,
    supervisor: ProcessSupervisor,
    guard: DestinationGuard,
    notifier: Notifier,
    locks: StreamLocks,
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl StreamEngine {
    pub fn new(
        store: Arc<dyn StreamStore>,
        supervisor: ProcessSupervisor,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        timezone: Tz,
    ) -> Self {
        Self {
            guard: DestinationGuard::new(store.clone()),
            store,
            supervisor,
            notifier,
            locks: StreamLocks::default(),
            clock,
            timezone,
        }
    }

    pub fn store(&self) -> &Arc<dyn StreamStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn locks(&self) -> &StreamLocks {
        &self.locks
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn evaluate(&self, kind: &ScheduleKind) -> ScheduleEvaluation {
        schedule::evaluate(kind, self.now(), self.timezone)
    }

    /// Start the broadcast for `stream` and persist it `live`.
    ///
    /// The caller must hold the stream's lock. Nothing is persisted on
    /// failure, so a failed start never leaves the stream marked live.
    pub async fn launch(
        &self,
        stream: &Stream,
        manual_override: bool,
        trigger: StartTrigger,
    ) -> AppResult<()> {
        let lease = self.guard.reserve(stream.id, &stream.destination_key).await?;

        let video_path = match self.resolve_video(stream).await {
            Ok(path) => path,
            Err(e) => {
                self.report_start_failure(stream.id, &e);
                return Err(e);
            }
        };

        let spec = LaunchSpec {
            stream_id: stream.id,
            video_path,
            destination_url: stream.destination_url(),
        };
        match self.supervisor.start(spec).await {
            Ok(StartOutcome::Started { .. }) | Ok(StartOutcome::AlreadyRunning) => {}
            Err(e) => {
                self.report_start_failure(stream.id, &e);
                return Err(e);
            }
        }

        let persisted = self
            .store
            .update_lifecycle(stream.id, LifecycleUpdate::live(manual_override))
            .await;
        match persisted {
            Ok(true) => {}
            Ok(false) => {
                self.supervisor.stop(stream.id, true).await?;
                return Err(AppError::not_found("stream", stream.id));
            }
            Err(e) => {
                error!("stream_id={} status=persist_live_failed error={}", stream.id, e);
                self.supervisor.stop(stream.id, true).await?;
                return Err(e.into());
            }
        }
        info!(
            "stream_id={} status=live key={} trigger={:?} manual_override={}",
            stream.id,
            lease.destination_key(),
            trigger,
            manual_override
        );
        drop(lease);
        self.notifier.emit(StreamEvent::Started {
            stream_id: stream.id,
            trigger,
        });
        Ok(())
    }

    async fn resolve_video(&self, stream: &Stream) -> AppResult<PathBuf> {
        let video_id = stream
            .video_id
            .ok_or_else(|| {
                AppError::resource_missing("video", format!("stream {} has no video", stream.id))
            })?;
        let path = self
            .store
            .video_file_path(video_id)
            .await?
            .ok_or_else(|| {
                AppError::resource_missing("video", format!("video {} no longer exists", video_id))
            })?;

        let path = PathBuf::from(path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AppError::resource_missing(
                "video_file",
                format!("{} does not exist", path.display()),
            ));
        }
        Ok(path)
    }

    fn report_start_failure(&self, stream_id: Uuid, error: &AppError) {
        warn!("stream_id={} status=start_failed error={}", stream_id, error);
        self.notifier.emit(StreamEvent::StartFailed {
            stream_id,
            error: error.to_string(),
        });
    }
}
