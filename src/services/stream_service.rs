//! Stream Service
//!
//! Create, edit, start, stop and delete streams on behalf of an operator.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    engine::StreamEngine,
    errors::{AppError, AppResult},
    models::{
        LifecycleState, LifecycleUpdate, ManualStartRequest, ScheduleKind, Stream,
        StreamConfigRequest, WindowPhase,
    },
    notifications::{StartTrigger, StopReason, StreamEvent},
    schedule,
};

pub struct StreamService {
    engine: Arc<StreamEngine>,
    default_rtmp_url: String,
}

impl StreamService {
    pub fn new(engine: Arc<StreamEngine>, default_rtmp_url: String) -> Self {
        Self {
            engine,
            default_rtmp_url,
        }
    }

    pub async fn list_streams(&self) -> AppResult<Vec<Stream>> {
        Ok(self.engine.store().list_all().await?)
    }

    pub async fn get_stream(&self, id: Uuid) -> AppResult<Stream> {
        self.engine
            .store()
            .find_stream(id)
            .await?
            .ok_or_else(|| AppError::not_found("stream", id))
    }

    /// Validate and store a new stream in `scheduled` with its first window.
    /// Streams may share a destination key; only simultaneous live use is refused.
    pub async fn create_stream(&self, request: StreamConfigRequest) -> AppResult<Stream> {
        let rtmp_url = self.resolve_rtmp_url(&request);
        self.validate_request(&request, &rtmp_url).await?;

        let now = Utc::now();
        let window = self.engine.evaluate(&request.schedule).next_window;
        let stream = Stream {
            id: Uuid::new_v4(),
            title: request.title.trim().to_string(),
            rtmp_url,
            destination_key: request.destination_key.trim().to_string(),
            video_id: Some(request.video_id),
            schedule: request.schedule,
            next_start: window.map(|w| w.start),
            next_end: window.map(|w| w.end),
            state: LifecycleState::Scheduled,
            manual_override: false,
            heal_pending: false,
            created_at: now,
            updated_at: now,
        };
        self.engine.store().insert_stream(&stream).await?;

        info!(
            "stream_id={} created schedule={} key={}",
            stream.id,
            stream.schedule.name(),
            stream.destination_key
        );
        Ok(stream)
    }

    /// Replace a stream's configuration and recompute its window. The
    /// destination and video of a live stream cannot change.
    pub async fn update_stream(&self, id: Uuid, request: StreamConfigRequest) -> AppResult<Stream> {
        let _lock = self.engine.locks().acquire(id).await;
        let mut stream = self.get_stream(id).await?;

        let rtmp_url = self.resolve_rtmp_url(&request);
        self.validate_request(&request, &rtmp_url).await?;

        let destination_key = request.destination_key.trim().to_string();
        let is_live = stream.state == LifecycleState::Live
            || self.engine.supervisor().is_running(id).await;
        if is_live
            && (destination_key != stream.destination_key
                || rtmp_url != stream.rtmp_url
                || Some(request.video_id) != stream.video_id)
        {
            return Err(AppError::validation(
                "destination and video cannot change while the stream is live; stop it first",
            ));
        }

        let window = self.engine.evaluate(&request.schedule).next_window;
        stream.title = request.title.trim().to_string();
        stream.rtmp_url = rtmp_url;
        stream.destination_key = destination_key;
        stream.video_id = Some(request.video_id);
        stream.schedule = request.schedule;
        stream.next_start = window.map(|w| w.start);
        stream.next_end = window.map(|w| w.end);
        self.engine.store().update_config(&stream).await?;

        info!("stream_id={} updated schedule={}", id, stream.schedule.name());
        self.get_stream(id).await
    }

    /// Force a stream live now.
    ///
    /// With `permanent` the schedule becomes manual. Otherwise a `once` or
    /// `daily` stream runs as a manual override and is not stopped when its
    /// window ends. Starting a stream this instance already runs is a no-op.
    pub async fn request_manual_start(
        &self,
        id: Uuid,
        request: ManualStartRequest,
    ) -> AppResult<Stream> {
        let _lock = self.engine.locks().acquire(id).await;
        let mut stream = self.get_stream(id).await?;

        if request.permanent && !stream.schedule.is_manual() {
            stream.schedule = ScheduleKind::Manual;
            stream.next_start = None;
            stream.next_end = None;
            self.engine.store().update_config(&stream).await?;
            info!("stream_id={} converted to manual schedule", id);
        }

        if self.engine.supervisor().is_running(id).await {
            if request.permanent && stream.manual_override {
                self.engine
                    .store()
                    .update_lifecycle(id, LifecycleUpdate::live(false))
                    .await?;
            }
            info!("stream_id={} manual start ignored, already running", id);
            return self.get_stream(id).await;
        }

        let manual_override = !stream.schedule.is_manual();
        self.engine
            .launch(&stream, manual_override, StartTrigger::Manual)
            .await?;
        self.get_stream(id).await
    }

    /// Stop a stream on operator request. Inside an active window the stream
    /// enters `manual_override` so the tick leaves it alone until the window
    /// closes; otherwise it returns to `scheduled`.
    pub async fn request_manual_stop(&self, id: Uuid) -> AppResult<Stream> {
        let _lock = self.engine.locks().acquire(id).await;
        let stream = self.get_stream(id).await?;
        let was_running = self.engine.supervisor().is_running(id).await;

        self.engine.supervisor().stop(id, true).await?;

        let now = self.engine.now();
        let inside_window = !stream.schedule.is_manual()
            && stream
                .window()
                .map(|w| w.phase(now) == WindowPhase::Active)
                .unwrap_or(false);
        let update = if inside_window {
            LifecycleUpdate::state(LifecycleState::ManualOverride)
        } else {
            LifecycleUpdate::state(LifecycleState::Scheduled)
                .with_window(self.engine.evaluate(&stream.schedule).next_window)
        };
        self.engine.store().update_lifecycle(id, update).await?;

        if was_running || stream.state == LifecycleState::Live {
            self.engine.notifier().emit(StreamEvent::Stopped {
                stream_id: id,
                reason: StopReason::Manual,
            });
        }
        self.get_stream(id).await
    }

    /// Stop anything running for the stream, then remove it
    pub async fn delete_stream(&self, id: Uuid) -> AppResult<()> {
        {
            let _lock = self.engine.locks().acquire(id).await;
            let stream = self.get_stream(id).await?;
            let was_running = self.engine.supervisor().is_running(id).await;

            self.engine.supervisor().stop(id, true).await?;
            self.engine.store().delete_stream(id).await?;

            if was_running || stream.state == LifecycleState::Live {
                self.engine.notifier().emit(StreamEvent::Stopped {
                    stream_id: id,
                    reason: StopReason::Deleted,
                });
            }
        }
        self.engine.locks().forget(id);
        info!("stream_id={} deleted", id);
        Ok(())
    }

    fn resolve_rtmp_url(&self, request: &StreamConfigRequest) -> String {
        request
            .rtmp_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.default_rtmp_url)
            .trim_end_matches('/')
            .to_string()
    }

    async fn validate_request(
        &self,
        request: &StreamConfigRequest,
        rtmp_url: &str,
    ) -> AppResult<()> {
        if request.title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }

        let key = request.destination_key.trim();
        if key.is_empty() {
            return Err(AppError::validation("destination key is required"));
        }
        if key.contains('/') || key.chars().any(char::is_whitespace) {
            return Err(AppError::validation(
                "destination key must not contain '/' or whitespace",
            ));
        }

        if !(rtmp_url.starts_with("rtmp://") || rtmp_url.starts_with("rtmps://")) {
            return Err(AppError::validation(format!(
                "ingest URL '{}' must use rtmp:// or rtmps://",
                rtmp_url
            )));
        }

        schedule::validate_schedule(&request.schedule)?;
        if let ScheduleKind::Once { end, .. } = &request.schedule {
            if *end <= self.engine.now() {
                return Err(AppError::validation("once schedule has already ended"));
            }
        }

        if self
            .engine
            .store()
            .video_file_path(request.video_id)
            .await?
            .is_none()
        {
            return Err(AppError::validation(format!(
                "video {} does not exist",
                request.video_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::EngineHarness;
    use crate::models::DailyTime;
    use crate::repositories::StreamStore;
    use crate::scheduler::ReconciliationLoop;
    use chrono::{DateTime, TimeZone};
    use std::time::Duration;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    fn service(h: &EngineHarness) -> StreamService {
        StreamService::new(h.engine.clone(), "rtmp://a.rtmp.youtube.com/live2/".to_string())
    }

    fn request(h: &EngineHarness, key: &str, schedule: ScheduleKind) -> StreamConfigRequest {
        StreamConfigRequest {
            title: format!("Stream {}", key),
            destination_key: key.to_string(),
            rtmp_url: None,
            video_id: h.video.id,
            schedule,
        }
    }

    fn daily_nine_to_ten() -> ScheduleKind {
        ScheduleKind::Daily {
            start_time: DailyTime::new(9, 0).unwrap(),
            duration_minutes: 60,
        }
    }

    #[tokio::test]
    async fn test_create_computes_window_and_default_url() {
        let h = EngineHarness::new(at(10, 8, 59)).await;
        let stream = service(&h)
            .create_stream(request(&h, "abcd", daily_nine_to_ten()))
            .await
            .unwrap();

        assert_eq!(stream.state, LifecycleState::Scheduled);
        assert_eq!(stream.next_start, Some(at(10, 9, 0)));
        assert_eq!(stream.destination_url(), "rtmp://a.rtmp.youtube.com/live2/abcd");
    }

    #[tokio::test]
    async fn test_create_rejects_bad_configuration() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);

        let mut bad_video = request(&h, "k", ScheduleKind::Manual);
        bad_video.video_id = Uuid::new_v4();
        let expired = request(
            &h,
            "k",
            ScheduleKind::Once {
                start: at(10, 10, 0),
                end: at(10, 11, 0),
            },
        );
        let zero_duration = request(
            &h,
            "k",
            ScheduleKind::Daily {
                start_time: DailyTime::new(9, 0).unwrap(),
                duration_minutes: 0,
            },
        );
        let bad_key = request(&h, "has space", ScheduleKind::Manual);

        for req in [bad_video, expired, zero_duration, bad_key] {
            assert!(matches!(
                svc.create_stream(req).await,
                Err(AppError::Validation { .. })
            ));
        }
        assert!(svc.list_streams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_key_creates_succeed_but_only_one_manual_start_wins() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = Arc::new(service(&h));
        let a = svc.create_stream(request(&h, "shared", ScheduleKind::Manual)).await.unwrap();
        let b = svc.create_stream(request(&h, "shared", ScheduleKind::Manual)).await.unwrap();
        h.launcher.set_launch_delay(Duration::from_millis(20));

        let (ra, rb) = tokio::join!(
            svc.request_manual_start(a.id, ManualStartRequest::default()),
            svc.request_manual_start(b.id, ManualStartRequest::default())
        );

        let results = [ra, rb];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(AppError::Conflict { destination_key, .. }) if destination_key == "shared"
        )));
        assert_eq!(h.launcher.spawn_count(), 1);
        assert_eq!(h.store.find_live_by_destination("shared").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_start_is_idempotent() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);
        let stream = svc.create_stream(request(&h, "k", ScheduleKind::Manual)).await.unwrap();

        svc.request_manual_start(stream.id, ManualStartRequest::default()).await.unwrap();
        let again = svc
            .request_manual_start(stream.id, ManualStartRequest::default())
            .await
            .unwrap();
        assert_eq!(again.state, LifecycleState::Live);
        assert!(!again.manual_override);
        assert_eq!(h.launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_permanent_start_converts_to_manual() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);
        let stream = svc.create_stream(request(&h, "k", daily_nine_to_ten())).await.unwrap();

        let started = svc
            .request_manual_start(stream.id, ManualStartRequest { permanent: true })
            .await
            .unwrap();
        assert_eq!(started.schedule, ScheduleKind::Manual);
        assert_eq!(started.window(), None);
        assert!(!started.manual_override);
        assert_eq!(started.state, LifecycleState::Live);
    }

    #[tokio::test]
    async fn test_stop_inside_window_holds_until_window_closes() {
        let h = EngineHarness::new(at(10, 9, 10)).await;
        let svc = service(&h);
        let lp = ReconciliationLoop::new(
            h.engine.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let stream = svc.create_stream(request(&h, "k", daily_nine_to_ten())).await.unwrap();
        assert_eq!(lp.tick().await.started, 1);

        let stopped = svc.request_manual_stop(stream.id).await.unwrap();
        assert_eq!(stopped.state, LifecycleState::ManualOverride);
        assert!(!h.launcher.is_running(stream.id));

        h.clock.set(at(10, 9, 20));
        assert_eq!(lp.tick().await.started, 0);
    }

    #[tokio::test]
    async fn test_stop_of_override_returns_to_schedule() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);
        let stream = svc.create_stream(request(&h, "k", daily_nine_to_ten())).await.unwrap();

        let started = svc
            .request_manual_start(stream.id, ManualStartRequest::default())
            .await
            .unwrap();
        assert!(started.manual_override);

        let stopped = svc.request_manual_stop(stream.id).await.unwrap();
        assert_eq!(stopped.state, LifecycleState::Scheduled);
        assert!(!stopped.manual_override);
        assert_eq!(stopped.next_start, Some(at(11, 9, 0)));
    }

    #[tokio::test]
    async fn test_stop_without_process_succeeds() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);
        let stream = svc.create_stream(request(&h, "k", ScheduleKind::Manual)).await.unwrap();

        let stopped = svc.request_manual_stop(stream.id).await.unwrap();
        assert_eq!(stopped.state, LifecycleState::Scheduled);
        assert!(matches!(
            svc.request_manual_stop(Uuid::new_v4()).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_rejects_destination_change_while_live() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);
        let stream = svc.create_stream(request(&h, "k", ScheduleKind::Manual)).await.unwrap();
        svc.request_manual_start(stream.id, ManualStartRequest::default()).await.unwrap();

        let moved = request(&h, "other", ScheduleKind::Manual);
        assert!(matches!(
            svc.update_stream(stream.id, moved).await,
            Err(AppError::Validation { .. })
        ));

        let rescheduled = svc
            .update_stream(stream.id, request(&h, "k", daily_nine_to_ten()))
            .await
            .unwrap();
        assert_eq!(rescheduled.next_start, Some(at(11, 9, 0)));
        assert_eq!(rescheduled.state, LifecycleState::Live);
    }

    #[tokio::test]
    async fn test_delete_stops_process_first() {
        let h = EngineHarness::new(at(10, 12, 0)).await;
        let svc = service(&h);
        let stream = svc.create_stream(request(&h, "k", ScheduleKind::Manual)).await.unwrap();
        svc.request_manual_start(stream.id, ManualStartRequest::default()).await.unwrap();

        svc.delete_stream(stream.id).await.unwrap();
        assert!(!h.launcher.is_running(stream.id));
        assert!(matches!(svc.get_stream(stream.id).await, Err(AppError::NotFound { .. })));
        assert!(matches!(svc.delete_stream(stream.id).await, Err(AppError::NotFound { .. })));
    }
}
