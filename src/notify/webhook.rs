//! Generic JSON webhook sink.

use super::{expect_success, Sink, SinkError};
use crate::db::{Alert, AlertStatus, SinkKind, SourceKind, TargetId};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// The JSON document POSTed for each alert.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload<'a> {
    pub id: i64,
    pub source_kind: SourceKind,
    pub target_id: TargetId,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub message: &'a str,
    pub metric: &'a str,
    pub threshold: &'a str,
    pub current_value: &'a str,
}

impl<'a> From<&'a Alert> for WebhookPayload<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            id: alert.id,
            source_kind: alert.source_kind,
            target_id: alert.target_id,
            status: alert.status,
            triggered_at: alert.triggered_at,
            resolved_at: alert.resolved_at,
            message: &alert.message,
            metric: &alert.metric,
            threshold: &alert.threshold,
            current_value: &alert.current_value,
        }
    }
}

pub struct WebhookSink {
    client: Client,
    url: String,
    headers: header::HeaderMap,
}

impl WebhookSink {
    pub fn new(client: Client, config: WebhookConfig) -> Result<Self, SinkError> {
        if config.url.is_empty() {
            return Err(SinkError::InvalidConfig("webhook url is empty".to_string()));
        }

        let mut headers = header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| SinkError::InvalidConfig(format!("invalid header name: {}", e)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| SinkError::InvalidConfig(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            url: config.url,
            headers,
        })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Webhook
    }

    async fn deliver(&self, alert: &Alert, deadline: Duration) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .timeout(deadline)
            .json(&WebhookPayload::from(alert))
            .send()
            .await?;
        expect_success("webhook", &response)
    }
}
