use anyhow::Result;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub video_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period between reconciliation ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    /// IANA zone in which daily start times are interpreted
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Upper bound on a single stream's reconciliation within a tick
    #[serde(default = "default_reconcile_deadline")]
    pub reconcile_deadline: String,
    /// How long a stop waits for the killed process to be reaped
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: String,
    /// Sweep destinations of streams persisted as live before the first tick
    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
    #[serde(default = "default_rtmp_base_url")]
    pub rtmp_base_url: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn default_tick_interval() -> String {
    "60s".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_reconcile_deadline() -> String {
    "30s".to_string()
}

fn default_kill_timeout() -> String {
    "5s".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg_command() -> String {
    "ffmpeg".to_string()
}

fn default_rtmp_base_url() -> String {
    "rtmp://a.rtmp.youtube.com/live2".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_audio_sample_rate() -> u32 {
    44100
}

fn default_output_format() -> String {
    "flv".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            timezone: default_timezone(),
            reconcile_deadline: default_reconcile_deadline(),
            kill_timeout: default_kill_timeout(),
            sweep_on_startup: true,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            ffmpeg_command: default_ffmpeg_command(),
            rtmp_base_url: default_rtmp_base_url(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            audio_sample_rate: default_audio_sample_rate(),
            output_format: default_output_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./restreamer.db".to_string(),
                max_connections: Some(5),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 7000,
            },
            storage: StorageConfig {
                video_path: PathBuf::from("./uploads"),
            },
            scheduler: SchedulerConfig::default(),
            broadcast: BroadcastConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration file, writing the defaults to it when it does not exist yet
    pub fn load<P: AsRef<Path>>(config_file: P) -> Result<Self> {
        let config_file = config_file.as_ref();

        let config = if config_file.exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str::<Self>(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            default_config
        };

        std::fs::create_dir_all(&config.storage.video_path)?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> AppResult<Duration> {
        parse_duration("scheduler.tick_interval", &self.tick_interval)
    }

    pub fn reconcile_deadline(&self) -> AppResult<Duration> {
        parse_duration("scheduler.reconcile_deadline", &self.reconcile_deadline)
    }

    pub fn kill_timeout(&self) -> AppResult<Duration> {
        parse_duration("scheduler.kill_timeout", &self.kill_timeout)
    }

    pub fn timezone(&self) -> AppResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            AppError::configuration(format!(
                "scheduler.timezone '{}' is not a valid IANA zone: {}",
                self.timezone, e
            ))
        })
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.tick_interval()?.is_zero() {
            return Err(AppError::configuration("scheduler.tick_interval must be positive"));
        }
        self.reconcile_deadline()?;
        self.kill_timeout()?;
        self.timezone()?;
        Ok(())
    }
}

fn parse_duration(field: &str, value: &str) -> AppResult<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        AppError::configuration(format!("{} '{}' is not a valid duration: {}", field, value, e))
    })
}
