//! ffmpeg-backed broadcast processes

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{sweep, LaunchSpec, ManagedProcess, ProcessLauncher};
use crate::config::BroadcastConfig;
use crate::errors::ProcessError;

/// Loops a video file to an RTMP destination in real time, copying video and
/// re-encoding audio to the configured delivery codec
pub struct FfmpegLauncher {
    config: BroadcastConfig,
}

impl FfmpegLauncher {
    pub fn new(config: BroadcastConfig) -> Self {
        Self { config }
    }

    pub fn build_args(&self, spec: &LaunchSpec) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
            "-stream_loop".to_string(),
            "-1".to_string(),
            "-re".to_string(),
            "-i".to_string(),
            spec.video_path.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            self.config.audio_codec.clone(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-ar".to_string(),
            self.config.audio_sample_rate.to_string(),
            "-f".to_string(),
            self.config.output_format.clone(),
            spec.destination_url.clone(),
        ]
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        let args = self.build_args(spec);
        debug!("stream_id={} starting {} {:?}", spec.stream_id, self.config.ffmpeg_command, args);

        let mut cmd = TokioCommand::new(&self.config.ffmpeg_command);
        cmd.args(&args);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            command: self.config.ffmpeg_command.clone(),
            message: e.to_string(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let stream_id = spec.stream_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if is_error_line(&line) {
                        warn!("stream_id={} ffmpeg: {}", stream_id, line);
                    } else {
                        debug!("stream_id={} ffmpeg: {}", stream_id, line);
                    }
                }
            });
        }

        Ok(Box::new(FfmpegProcess {
            stream_id: spec.stream_id,
            child,
        }))
    }

    async fn sweep_destination(&self, destination_url: &str, exclude: &[u32]) -> usize {
        sweep::kill_processes_matching(destination_url, exclude).await
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ["error", "failed", "invalid", "could not", "unable to", "not found"]
        .iter()
        .any(|marker| lower.contains(marker))
}

struct FfmpegProcess {
    stream_id: Uuid,
    child: Child,
}

#[async_trait]
impl ManagedProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Option<i32> {
        match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("stream_id={} failed to wait on ffmpeg: {}", self.stream_id, e);
                None
            }
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.child.kill().await.map_err(|e| ProcessError::KillFailed {
            stream_id: self.stream_id,
            message: e.to_string(),
        })
    }
}
