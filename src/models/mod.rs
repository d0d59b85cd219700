use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Time-of-day at which a daily schedule begins (24h clock, `HH:MM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DailyTime {
    pub hour: u32,
    pub minute: u32,
}

impl DailyTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, String> {
        if hour > 23 {
            return Err(format!("hour {} out of range 0-23", hour));
        }
        if minute > 59 {
            return Err(format!("minute {} out of range 0-59", minute));
        }
        Ok(Self { hour, minute })
    }
}

impl FromStr for DailyTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{}', expected HH:MM", s))?;
        let hour = h
            .parse::<u32>()
            .map_err(|_| format!("invalid hour in '{}'", s))?;
        let minute = m
            .parse::<u32>()
            .map_err(|_| format!("invalid minute in '{}'", s))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for DailyTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DailyTime> for String {
    fn from(value: DailyTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DailyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// How a stream decides when to broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Started and stopped only by operator command
    Manual,
    /// A single absolute window `[start, end)`
    Once {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Every day at `start_time` for `duration_minutes`
    Daily {
        start_time: DailyTime,
        duration_minutes: u32,
    },
}

impl ScheduleKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScheduleKind::Manual => "manual",
            ScheduleKind::Once { .. } => "once",
            ScheduleKind::Daily { .. } => "daily",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, ScheduleKind::Manual)
    }
}

/// Persisted lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Waiting for its next window (or for an operator, for manual streams)
    Scheduled,
    /// A broadcast process is supposed to be running
    Live,
    /// Operator stopped the stream inside its window; no auto-start until the window closes
    ManualOverride,
    /// Resting state; terminal unless a crash heal is pending
    Offline,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Scheduled => "scheduled",
            LifecycleState::Live => "live",
            LifecycleState::ManualOverride => "manual_override",
            LifecycleState::Offline => "offline",
        }
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(LifecycleState::Scheduled),
            "live" => Ok(LifecycleState::Live),
            "manual_override" => Ok(LifecycleState::ManualOverride),
            "offline" => Ok(LifecycleState::Offline),
            other => Err(format!("unknown lifecycle state '{}'", other)),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the position of `now` lies relative to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Upcoming,
    Active,
    Closed,
}

/// A half-open broadcast interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if now < self.start {
            WindowPhase::Upcoming
        } else if now < self.end {
            WindowPhase::Active
        } else {
            WindowPhase::Closed
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: Uuid,
    pub title: String,
    pub rtmp_url: String,
    pub destination_key: String,
    pub video_id: Option<Uuid>,
    pub schedule: ScheduleKind,
    pub next_start: Option<DateTime<Utc>>,
    pub next_end: Option<DateTime<Utc>>,
    pub state: LifecycleState,
    pub manual_override: bool,
    pub heal_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stream {
    /// The materialized `[next_start, next_end)` window, if both ends are set
    pub fn window(&self) -> Option<Window> {
        match (self.next_start, self.next_end) {
            (Some(start), Some(end)) => Some(Window::new(start, end)),
            _ => None,
        }
    }

    /// Full ingest URL handed to the broadcast process
    pub fn destination_url(&self) -> String {
        format!(
            "{}/{}",
            self.rtmp_url.trim_end_matches('/'),
            self.destination_key
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSource {
    Local,
    Imported,
    Recovered,
}

impl VideoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSource::Local => "local",
            VideoSource::Imported => "imported",
            VideoSource::Recovered => "recovered",
        }
    }
}

impl FromStr for VideoSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(VideoSource::Local),
            "imported" => Ok(VideoSource::Imported),
            "recovered" => Ok(VideoSource::Recovered),
            other => Err(format!("unknown video source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub file_path: String,
    pub file_size: i64,
    pub source: VideoSource,
    pub created_at: DateTime<Utc>,
}

/// Operator-supplied stream configuration, used for both create and update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfigRequest {
    pub title: String,
    pub destination_key: String,
    /// Ingest base URL; the configured default is used when absent
    pub rtmp_url: Option<String>,
    pub video_id: Uuid,
    pub schedule: ScheduleKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualStartRequest {
    /// Convert the stream to a manual schedule instead of overriding its window
    #[serde(default)]
    pub permanent: bool,
}

/// How a lifecycle update treats the materialized window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUpdate {
    Keep,
    Set(Option<Window>),
}

/// Atomic change to a stream's lifecycle fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleUpdate {
    pub state: LifecycleState,
    /// `None` leaves the stored flag as it is
    pub manual_override: Option<bool>,
    pub heal_pending: bool,
    pub window: WindowUpdate,
}

impl LifecycleUpdate {
    pub fn state(state: LifecycleState) -> Self {
        Self {
            state,
            manual_override: Some(false),
            heal_pending: false,
            window: WindowUpdate::Keep,
        }
    }

    pub fn live(manual_override: bool) -> Self {
        Self {
            manual_override: Some(manual_override),
            ..Self::state(LifecycleState::Live)
        }
    }

    /// Offline with a heal pending. The override flag survives so the heal
    /// can restart an override stream as one.
    pub fn crashed() -> Self {
        Self {
            manual_override: None,
            heal_pending: true,
            ..Self::state(LifecycleState::Offline)
        }
    }

    pub fn with_window(mut self, window: Option<Window>) -> Self {
        self.window = WindowUpdate::Set(window);
        self
    }
}
