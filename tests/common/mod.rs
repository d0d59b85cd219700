#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use restreamer::{
    config::DatabaseConfig,
    database::Database,
    engine::{Clock, StreamEngine},
    errors::ProcessError,
    models::{Video, VideoSource},
    notifications::Notifier,
    repositories::{SqliteStreamRepository, VideoRepository},
    supervisor::{LaunchSpec, ManagedProcess, ProcessLauncher, ProcessSupervisor},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Clock the test moves by hand
pub struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Launcher whose processes live until killed or told to exit
#[derive(Default)]
pub struct LoopbackLauncher {
    exits: Mutex<HashMap<Uuid, oneshot::Sender<i32>>>,
    launches: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl LoopbackLauncher {
    pub fn launches(&self) -> Vec<String> {
        self.launches.lock().unwrap().clone()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Make the process for `stream_id` exit by itself
    pub fn exit(&self, stream_id: Uuid, code: i32) {
        if let Some(tx) = self.exits.lock().unwrap().remove(&stream_id) {
            let _ = tx.send(code);
        }
    }
}

struct LoopbackProcess {
    exit: oneshot::Receiver<i32>,
    killed: bool,
}

#[async_trait]
impl ManagedProcess for LoopbackProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Option<i32> {
        if self.killed {
            return None;
        }
        match (&mut self.exit).await {
            Ok(code) => Some(code),
            Err(_) => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.killed = true;
        Ok(())
    }
}

#[async_trait]
impl ProcessLauncher for LoopbackLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (tx, rx) = oneshot::channel();
        self.exits.lock().unwrap().insert(spec.stream_id, tx);
        self.launches.lock().unwrap().push(spec.destination_url.clone());
        Ok(Box::new(LoopbackProcess {
            exit: rx,
            killed: false,
        }))
    }

    async fn sweep_destination(&self, _destination_url: &str, _exclude: &[u32]) -> usize {
        0
    }
}

pub struct TestEnv {
    pub database: Database,
    pub engine: Arc<StreamEngine>,
    pub launcher: Arc<LoopbackLauncher>,
    pub clock: Arc<TestClock>,
    pub notifier: Notifier,
    pub video: Video,
    _dir: tempfile::TempDir,
}

impl TestEnv {
    pub async fn new(now: DateTime<Utc>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::new(&DatabaseConfig {
            url: format!("sqlite://{}/restreamer.db?mode=rwc", dir.path().display()),
            max_connections: Some(5),
        })
        .await
        .unwrap();
        database.migrate().await.unwrap();

        let video_path = dir.path().join("clip.mp4");
        std::fs::write(&video_path, b"clip").unwrap();
        let video = Video {
            id: Uuid::new_v4(),
            title: "clip".to_string(),
            file_path: video_path.to_string_lossy().into_owned(),
            file_size: 4,
            source: VideoSource::Local,
            created_at: now,
        };
        VideoRepository::new(database.pool()).insert(&video).await.unwrap();

        let store = Arc::new(SqliteStreamRepository::new(database.pool()));
        let launcher = Arc::new(LoopbackLauncher::default());
        let notifier = Notifier::default();
        let clock = Arc::new(TestClock::new(now));
        let supervisor = ProcessSupervisor::new(
            launcher.clone(),
            store.clone(),
            notifier.clone(),
            Duration::from_secs(1),
        );
        let engine = Arc::new(StreamEngine::new(
            store,
            supervisor,
            notifier.clone(),
            clock.clone(),
            chrono_tz::UTC,
        ));

        Self {
            database,
            engine,
            launcher,
            clock,
            notifier,
            video,
            _dir: dir,
        }
    }
}
