//! Notification sinks.
//!
//! A sink turns an `Alert` into one outbound message. Sinks are built from a
//! stored `NotificationSink` row and hold nothing but their own config.

mod alertmanager;
mod email;
mod slack;
mod telegram;
mod webhook;

pub use alertmanager::*;
pub use email::*;
pub use slack::*;
pub use telegram::*;
pub use webhook::*;

use crate::db::{Alert, AlertStatus, NotificationSink, SinkKind};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Per-attempt deadline when a sink config doesn't set `timeout_secs`.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{sink} returned non-success status: {status}")]
    Status { sink: &'static str, status: u16 },
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// One configured notification endpoint.
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Deliver a single alert, giving up after `deadline`.
    async fn deliver(&self, alert: &Alert, deadline: Duration) -> Result<(), SinkError>;
}

/// Build the sink for a stored row.
pub fn build_sink(sink: &NotificationSink, client: &reqwest::Client) -> Result<Arc<dyn Sink>, SinkError> {
    let built: Arc<dyn Sink> = match sink.kind {
        SinkKind::Webhook => Arc::new(WebhookSink::new(client.clone(), parse_config(sink)?)?),
        SinkKind::AlertmanagerWebhook => Arc::new(AlertmanagerSink::new(client.clone(), parse_config(sink)?)),
        SinkKind::Email => Arc::new(EmailSink::new(parse_config(sink)?)?),
        SinkKind::Slack => Arc::new(SlackSink::new(client.clone(), parse_config(sink)?)),
        SinkKind::Telegram => Arc::new(TelegramSink::new(client.clone(), parse_config(sink)?)),
    };
    Ok(built)
}

fn parse_config<T: DeserializeOwned>(sink: &NotificationSink) -> Result<T, SinkError> {
    serde_json::from_value(sink.config.clone())
        .map_err(|e| SinkError::InvalidConfig(format!("{} sink {}: {}", sink.kind.as_str(), sink.id, e)))
}

/// Per-attempt deadline for a sink row.
pub fn delivery_timeout(config: &serde_json::Value) -> Duration {
    config
        .get("timeout_secs")
        .and_then(|v| v.as_u64())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_DELIVERY_TIMEOUT)
}

/// Map a non-2xx response to `SinkError::Status`.
pub(crate) fn expect_success(sink: &'static str, response: &reqwest::Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SinkError::Status {
            sink,
            status: status.as_u16(),
        })
    }
}

fn status_label(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Triggered => "FIRING",
        AlertStatus::Resolved => "RESOLVED",
    }
}

/// One-line headline used by the chat and email sinks.
pub fn headline(alert: &Alert) -> String {
    format!(
        "[{}] {} on {} target {}",
        status_label(alert.status),
        alert.metric,
        alert.source_kind.as_str(),
        alert.target_id
    )
}

/// Plain-text alert body shared by the human-facing sinks.
pub fn render_text(alert: &Alert) -> String {
    let mut text = format!(
        "{}\n{}\nthreshold: {}, current: {}\ntriggered at: {}",
        headline(alert),
        alert.message,
        alert.threshold,
        alert.current_value,
        alert.triggered_at.to_rfc3339()
    );
    if let Some(resolved_at) = alert.resolved_at {
        text.push_str(&format!("\nresolved at: {}", resolved_at.to_rfc3339()));
    }
    text
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delivery_timeout() {
        assert_eq!(delivery_timeout(&json!({})), DEFAULT_DELIVERY_TIMEOUT);
        assert_eq!(delivery_timeout(&json!({"timeout_secs": 3})), Duration::from_secs(3));
        assert_eq!(delivery_timeout(&json!({"timeout_secs": 0})), DEFAULT_DELIVERY_TIMEOUT);
    }

    #[test]
    fn test_build_sink_rejects_bad_config() {
        let client = reqwest::Client::new();
        let row = NotificationSink {
            id: 3,
            kind: SinkKind::Webhook,
            config: json!({"no_url": true}),
        };
        let err = build_sink(&row, &client).err().unwrap();
        assert!(err.to_string().contains("webhook sink 3"));

        let row = NotificationSink {
            id: 4,
            kind: SinkKind::Slack,
            config: json!({"webhook_url": "http://127.0.0.1:9/hook"}),
        };
        assert_eq!(build_sink(&row, &client).unwrap().kind(), SinkKind::Slack);
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&testing::alert(AlertStatus::Resolved));
        assert!(text.starts_with("[RESOLVED] service_status on service target 7"));
        assert!(text.contains("threshold: up, current: down"));
        assert!(text.contains("resolved at: 2024-05-01T12:05:00+00:00"));
    }
}
