//! Fire-and-forget stream events
//!
//! The engine publishes on a broadcast channel; subscribers (the Telegram
//! forwarder, tests) receive a copy each. Publishing with no subscriber, or
//! with a lagging one, never fails the caller.

pub mod telegram;

pub use telegram::TelegramForwarder;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTrigger {
    Schedule,
    Manual,
    AutoHeal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    WindowClosed,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealReason {
    /// Persisted live but not tracked by this instance
    Zombie,
    /// The process exited on its own while this instance tracked it
    Crash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Started { stream_id: Uuid, trigger: StartTrigger },
    Stopped { stream_id: Uuid, reason: StopReason },
    Exited { stream_id: Uuid, exit_code: Option<i32> },
    AutoHeal { stream_id: Uuid, reason: HealReason },
    StartFailed { stream_id: Uuid, error: String },
}

impl StreamEvent {
    pub fn stream_id(&self) -> Uuid {
        match self {
            StreamEvent::Started { stream_id, .. }
            | StreamEvent::Stopped { stream_id, .. }
            | StreamEvent::Exited { stream_id, .. }
            | StreamEvent::AutoHeal { stream_id, .. }
            | StreamEvent::StartFailed { stream_id, .. } => *stream_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Started { .. } => "started",
            StreamEvent::Stopped { .. } => "stopped",
            StreamEvent::Exited { .. } => "exited",
            StreamEvent::AutoHeal { .. } => "auto_heal",
            StreamEvent::StartFailed { .. } => "start_failed",
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<StreamEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: StreamEvent) {
        info!("stream_id={} event={}", event.stream_id(), event.name());
        if self.sender.send(event).is_err() {
            debug!("No notification subscribers");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let notifier = Notifier::default();
        notifier.emit(StreamEvent::Exited {
            stream_id: Uuid::new_v4(),
            exit_code: Some(1),
        });
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_a_copy() {
        let notifier = Notifier::new(8);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        let id = Uuid::new_v4();
        notifier.emit(StreamEvent::Started {
            stream_id: id,
            trigger: StartTrigger::Schedule,
        });
        assert_eq!(first.recv().await.unwrap().stream_id(), id);
        assert_eq!(second.recv().await.unwrap().name(), "started");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = StreamEvent::Stopped {
            stream_id: Uuid::nil(),
            reason: StopReason::WindowClosed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stopped");
        assert_eq!(json["reason"], "window_closed");
    }
}
