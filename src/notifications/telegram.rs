//! Forwards stream events to a Telegram chat through the Bot API

use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealReason, StartTrigger, StopReason, StreamEvent};
use crate::config::NotificationConfig;
use crate::errors::{AppError, AppResult};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramForwarder {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramForwarder {
    /// `None` when the bot token or chat id is not configured
    pub fn from_config(config: &NotificationConfig) -> AppResult<Option<Self>> {
        let (Some(bot_token), Some(chat_id)) =
            (&config.telegram_bot_token, &config.telegram_chat_id)
        else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            bot_token: bot_token.clone(),
            chat_id: chat_id.clone(),
        }))
    }

    pub async fn run(
        self,
        mut events: broadcast::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) {
        info!("Telegram notifications enabled");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => self.send(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Telegram forwarder lagged, dropped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Telegram forwarder stopped");
    }

    async fn send(&self, event: &StreamEvent) {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": format_event(event),
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!("Telegram rejected notification: HTTP {}", response.status()),
            Err(e) => warn!("Failed to deliver Telegram notification: {}", e),
        }
    }
}

pub fn format_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Started { stream_id, trigger } => {
            let how = match trigger {
                StartTrigger::Schedule => "by schedule",
                StartTrigger::Manual => "manually",
                StartTrigger::AutoHeal => "by auto-heal",
            };
            format!("Stream {} started {}", stream_id, how)
        }
        StreamEvent::Stopped { stream_id, reason } => {
            let why = match reason {
                StopReason::Manual => "by operator",
                StopReason::WindowClosed => "at end of window",
                StopReason::Deleted => "because it was deleted",
            };
            format!("Stream {} stopped {}", stream_id, why)
        }
        StreamEvent::Exited { stream_id, exit_code } => match exit_code {
            Some(code) => format!("Stream {} ended unexpectedly (exit code {})", stream_id, code),
            None => format!("Stream {} ended unexpectedly (killed by signal)", stream_id),
        },
        StreamEvent::AutoHeal { stream_id, reason } => match reason {
            HealReason::Zombie => format!(
                "Stream {} was marked live with no process; state reset",
                stream_id
            ),
            HealReason::Crash => format!("Stream {} is being restarted after a crash", stream_id),
        },
        StreamEvent::StartFailed { stream_id, error } => {
            format!("Stream {} failed to start: {}", stream_id, error)
        }
    }
}
