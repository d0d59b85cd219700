//! In-memory launcher for exercising supervision without ffmpeg

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{LaunchSpec, ManagedProcess, ProcessLauncher};
use crate::errors::ProcessError;

type Running = Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<i32>>>>;

#[derive(Default)]
pub(crate) struct FakeLauncher {
    spawn_count: AtomicUsize,
    next_pid: AtomicU32,
    fail_launch: AtomicBool,
    launch_delay: Mutex<Option<Duration>>,
    running: Running,
    ghosts: Mutex<HashSet<String>>,
    sweeps: Mutex<Vec<String>>,
}

impl FakeLauncher {
    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    pub fn is_running(&self, stream_id: Uuid) -> bool {
        self.running.lock().unwrap().contains_key(&stream_id)
    }

    /// Make the stream's process exit on its own with `code`
    pub fn crash(&self, stream_id: Uuid, code: i32) -> bool {
        match self.running.lock().unwrap().remove(&stream_id) {
            Some(tx) => tx.send(code).is_ok(),
            None => false,
        }
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = Some(delay);
    }

    /// Pretend a process from an earlier instance is holding the destination
    pub fn add_ghost(&self, destination_url: &str) {
        self.ghosts.lock().unwrap().insert(destination_url.to_string());
    }

    pub fn has_ghost(&self, destination_url: &str) -> bool {
        self.ghosts.lock().unwrap().contains(destination_url)
    }

    pub fn sweeps(&self) -> Vec<String> {
        self.sweeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        let delay = *self.launch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed {
                command: "fake".to_string(),
                message: "launch disabled".to_string(),
            });
        }

        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.running.lock().unwrap().insert(spec.stream_id, tx);

        Ok(Box::new(FakeProcess {
            stream_id: spec.stream_id,
            pid: 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            exit_rx: rx,
            killed: false,
            running: self.running.clone(),
        }))
    }

    async fn sweep_destination(&self, destination_url: &str, _exclude: &[u32]) -> usize {
        self.sweeps.lock().unwrap().push(destination_url.to_string());
        usize::from(self.ghosts.lock().unwrap().remove(destination_url))
    }
}

struct FakeProcess {
    stream_id: Uuid,
    pid: u32,
    exit_rx: mpsc::UnboundedReceiver<i32>,
    killed: bool,
    running: Running,
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Option<i32> {
        if self.killed {
            return None;
        }
        match self.exit_rx.recv().await {
            Some(code) => Some(code),
            None => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.killed = true;
        self.running.lock().unwrap().remove(&self.stream_id);
        Ok(())
    }
}
