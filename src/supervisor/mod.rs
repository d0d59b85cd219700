//! Broadcast process supervision
//!
//! [`ProcessSupervisor`] owns the in-memory registry of broadcast processes
//! started by this instance, keyed by stream id. The registry answers "did
//! this instance start it"; processes left behind by an earlier instance are
//! invisible to it and are only reachable through the destination sweep.
//!
//! Each tracked process has a watcher task that waits for either a natural
//! exit or a kill request. A stop removes the registry entry before asking
//! the watcher to kill, so an operator stop is never reported as a crash.

pub mod ffmpeg;
pub mod sweep;

#[cfg(test)]
pub(crate) mod fake;

pub use ffmpeg::FfmpegLauncher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult, ProcessError};
use crate::models::{LifecycleState, LifecycleUpdate};
use crate::notifications::{Notifier, StreamEvent};
use crate::repositories::StreamStore;

/// Everything needed to launch one broadcast
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub stream_id: Uuid,
    pub video_path: PathBuf,
    pub destination_url: String,
}

/// Starts broadcast processes and finds stray ones at the OS level
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, ProcessError>;

    /// Kill every OS process broadcasting to `destination_url` whose pid is not in `exclude`.
    /// Returns how many were killed.
    async fn sweep_destination(&self, destination_url: &str, exclude: &[u32]) -> usize;
}

/// A single running broadcast process
#[async_trait]
pub trait ManagedProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Resolves when the process exits; `None` when it was killed by a signal.
    /// Must be cancel safe.
    async fn wait(&mut self) -> Option<i32>;

    /// Hard kill with no grace period
    async fn kill(&mut self) -> Result<(), ProcessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    AlreadyRunning,
}

type KillAck = oneshot::Sender<Result<(), ProcessError>>;

struct LiveProcess {
    generation: u64,
    pid: Option<u32>,
    destination_url: String,
    started_at: DateTime<Utc>,
    kill_tx: oneshot::Sender<KillAck>,
}

enum ProcessSlot {
    /// Reserved while the launcher is spawning
    Starting { generation: u64 },
    Running(LiveProcess),
}

impl ProcessSlot {
    fn generation(&self) -> u64 {
        match self {
            ProcessSlot::Starting { generation } => *generation,
            ProcessSlot::Running(live) => live.generation,
        }
    }
}

/// Snapshot of a tracked process
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProcessInfo {
    pub stream_id: Uuid,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<Uuid, ProcessSlot>>>;

/// Removes a `Starting` slot if the start is abandoned before the process is registered
struct StartingReservation {
    registry: Registry,
    stream_id: Uuid,
    generation: u64,
    armed: bool,
}

impl Drop for StartingReservation {
    fn drop(&mut self) {
        if self.armed {
            release(&self.registry, self.stream_id, self.generation);
        }
    }
}

/// Remove the entry only if it still belongs to `generation`
fn release(registry: &Registry, stream_id: Uuid, generation: u64) -> bool {
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if registry.get(&stream_id).map(ProcessSlot::generation) == Some(generation) {
        registry.remove(&stream_id);
        true
    } else {
        false
    }
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    store: Arc<dyn StreamStore>,
    notifier: Notifier,
    registry: Registry,
    generation: Arc<AtomicU64>,
    kill_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        store: Arc<dyn StreamStore>,
        notifier: Notifier,
        kill_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            store,
            notifier,
            registry: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(1)),
            kill_timeout,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, ProcessSlot>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch the broadcast for `spec.stream_id` unless this instance already tracks one
    pub async fn start(&self, spec: LaunchSpec) -> AppResult<StartOutcome> {
        let stream_id = spec.stream_id;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);

        {
            let mut registry = self.registry();
            if registry.contains_key(&stream_id) {
                warn!("stream_id={} status=already_running start ignored", stream_id);
                return Ok(StartOutcome::AlreadyRunning);
            }
            registry.insert(stream_id, ProcessSlot::Starting { generation });
        }
        let mut reservation = StartingReservation {
            registry: self.registry.clone(),
            stream_id,
            generation,
            armed: true,
        };

        let mut process = match self.launcher.launch(&spec).await {
            Ok(process) => process,
            Err(e) => {
                error!("stream_id={} status=spawn_failed error={}", stream_id, e);
                return Err(e.into());
            }
        };

        let pid = process.pid();
        let (kill_tx, kill_rx) = oneshot::channel::<KillAck>();

        let registered = {
            let mut registry = self.registry();
            let still_reserved =
                registry.get(&stream_id).map(ProcessSlot::generation) == Some(generation);
            if still_reserved {
                registry.insert(
                    stream_id,
                    ProcessSlot::Running(LiveProcess {
                        generation,
                        pid,
                        destination_url: spec.destination_url.clone(),
                        started_at: Utc::now(),
                        kill_tx,
                    }),
                );
            }
            still_reserved
        };
        reservation.armed = false;

        if !registered {
            warn!("stream_id={} status=stopped_during_start pid={:?}", stream_id, pid);
            if let Err(e) = process.kill().await {
                warn!("stream_id={} status=kill_failed error={}", stream_id, e);
            }
            return Err(AppError::internal(format!(
                "stream {} was stopped while its process was starting",
                stream_id
            )));
        }

        info!(
            "stream_id={} status=started pid={:?} destination={}",
            stream_id, pid, spec.destination_url
        );

        let watcher = self.clone();
        tokio::spawn(async move {
            watcher.watch(stream_id, generation, process, kill_rx).await;
        });

        Ok(StartOutcome::Started { pid })
    }

    async fn watch(
        &self,
        stream_id: Uuid,
        generation: u64,
        mut process: Box<dyn ManagedProcess>,
        kill_rx: oneshot::Receiver<KillAck>,
    ) {
        tokio::select! {
            exit_code = process.wait() => {
                self.handle_exit(stream_id, generation, exit_code).await;
            }
            request = kill_rx => {
                let result = process.kill().await;
                if result.is_ok() {
                    process.wait().await;
                }
                debug!("stream_id={} status=killed", stream_id);
                if let Ok(ack) = request {
                    let _ = ack.send(result);
                }
            }
        }
    }

    async fn handle_exit(&self, stream_id: Uuid, generation: u64, exit_code: Option<i32>) {
        if !release(&self.registry, stream_id, generation) {
            // Already detached by a stop
            return;
        }

        warn!("stream_id={} status=exited exit_code={:?}", stream_id, exit_code);

        match self.store.update_lifecycle(stream_id, LifecycleUpdate::crashed()).await {
            Ok(true) => {}
            Ok(false) => debug!("stream_id={} exited after its record was deleted", stream_id),
            Err(e) => error!("stream_id={} status=crash_persist_failed error={}", stream_id, e),
        }

        self.notifier.emit(StreamEvent::Exited { stream_id, exit_code });
    }

    /// Stop the broadcast for a stream. Idempotent: succeeds whether or not
    /// anything is running. Always sweeps the destination for stray processes.
    /// Unless `keep_persisted_status` is set the stream is persisted `offline`.
    pub async fn stop(&self, stream_id: Uuid, keep_persisted_status: bool) -> AppResult<()> {
        let slot = self.registry().remove(&stream_id);

        let mut destination_url = None;
        if let Some(ProcessSlot::Running(live)) = slot {
            destination_url = Some(live.destination_url.clone());
            self.kill_live(stream_id, live).await;
        }

        if destination_url.is_none() {
            destination_url = match self.store.find_stream(stream_id).await {
                Ok(stream) => stream.map(|s| s.destination_url()),
                Err(e) => {
                    warn!("stream_id={} could not resolve destination for sweep: {}", stream_id, e);
                    None
                }
            };
        }

        if let Some(destination_url) = destination_url {
            let exclude = self.tracked_pids();
            let killed = self.launcher.sweep_destination(&destination_url, &exclude).await;
            if killed > 0 {
                warn!(
                    "stream_id={} status=ghost_swept killed={} destination={}",
                    stream_id, killed, destination_url
                );
            }
        }

        if !keep_persisted_status {
            self.store
                .update_lifecycle(stream_id, LifecycleUpdate::state(LifecycleState::Offline))
                .await?;
        }

        Ok(())
    }

    async fn kill_live(&self, stream_id: Uuid, live: LiveProcess) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if live.kill_tx.send(ack_tx).is_err() {
            // Watcher already finished; the process is gone
            return;
        }

        match tokio::time::timeout(self.kill_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => info!("stream_id={} status=stopped pid={:?}", stream_id, live.pid),
            Ok(Ok(Err(e))) => warn!("stream_id={} status=kill_failed error={}", stream_id, e),
            Ok(Err(_)) => debug!("stream_id={} process exited before kill", stream_id),
            Err(_) => warn!(
                "stream_id={} status=kill_timeout pid={:?} timeout={:?}",
                stream_id, live.pid, self.kill_timeout
            ),
        }
    }

    /// Whether this instance tracks a process for the stream
    pub async fn is_running(&self, stream_id: Uuid) -> bool {
        self.registry().contains_key(&stream_id)
    }

    pub async fn tracked_count(&self) -> usize {
        self.registry().len()
    }

    pub async fn list(&self) -> Vec<ProcessInfo> {
        self.registry()
            .iter()
            .filter_map(|(id, slot)| match slot {
                ProcessSlot::Running(live) => Some(ProcessInfo {
                    stream_id: *id,
                    pid: live.pid,
                    started_at: live.started_at,
                }),
                ProcessSlot::Starting { .. } => None,
            })
            .collect()
    }

    fn tracked_pids(&self) -> Vec<u32> {
        self.registry()
            .values()
            .filter_map(|slot| match slot {
                ProcessSlot::Running(live) => live.pid,
                ProcessSlot::Starting { .. } => None,
            })
            .collect()
    }

    /// Kill stray processes left by an earlier instance on the given destinations
    pub async fn sweep_ghosts(&self, destination_urls: &[String]) -> usize {
        let exclude = self.tracked_pids();
        let mut killed = 0;
        for destination_url in destination_urls {
            killed += self.launcher.sweep_destination(destination_url, &exclude).await;
        }
        if killed > 0 {
            warn!("Startup sweep killed {} stray broadcast processes", killed);
        }
        killed
    }

    /// Kill every tracked process, leaving persisted state untouched so the
    /// next instance sees the streams as zombies and restores them
    pub async fn shutdown(&self) {
        let drained: Vec<(Uuid, ProcessSlot)> = self.registry().drain().collect();
        info!("Stopping {} broadcast processes", drained.len());
        for (stream_id, slot) in drained {
            if let ProcessSlot::Running(live) = slot {
                self.kill_live(stream_id, live).await;
            }
        }
    }
}
