//! Alertmanager webhook (v4 envelope) sink.

use super::{expect_success, Sink, SinkError};
use crate::db::{Alert, AlertStatus, SinkKind};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// `endsAt` for alerts that are still firing.
pub const OPEN_ENDED: &str = "0001-01-01T00:00:00Z";

#[derive(Debug, Clone, Deserialize)]
pub struct AlertmanagerConfig {
    pub url: String,
    #[serde(default = "default_receiver")]
    pub receiver: String,
}

fn default_receiver() -> String {
    "pulsewatch-receiver".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: String,
    pub ends_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    pub version: String,
    pub group_key: String,
    pub truncated_alerts: u32,
    pub status: String,
    pub receiver: String,
    pub group_labels: BTreeMap<String, String>,
    pub common_labels: BTreeMap<String, String>,
    pub common_annotations: BTreeMap<String, String>,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    pub alerts: Vec<AlertmanagerAlert>,
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Wrap a single alert in its own group.
pub fn envelope(alert: &Alert, receiver: &str) -> AlertmanagerPayload {
    let status = match alert.status {
        AlertStatus::Triggered => "firing",
        AlertStatus::Resolved => "resolved",
    }
    .to_string();

    let labels = BTreeMap::from([
        ("alertname".to_string(), alert.metric.clone()),
        ("source_kind".to_string(), alert.source_kind.as_str().to_string()),
        ("target_id".to_string(), alert.target_id.to_string()),
    ]);
    let annotations = BTreeMap::from([
        ("summary".to_string(), alert.message.clone()),
        ("threshold".to_string(), alert.threshold.clone()),
        ("current_value".to_string(), alert.current_value.clone()),
    ]);

    AlertmanagerPayload {
        version: "4".to_string(),
        group_key: format!("{{}}:{{alertname=\"{}\"}}", alert.metric),
        truncated_alerts: 0,
        status: status.clone(),
        receiver: receiver.to_string(),
        group_labels: BTreeMap::from([("alertname".to_string(), alert.metric.clone())]),
        common_labels: labels.clone(),
        common_annotations: annotations.clone(),
        external_url: String::new(),
        alerts: vec![AlertmanagerAlert {
            status,
            labels,
            annotations,
            starts_at: rfc3339(alert.triggered_at),
            ends_at: alert
                .resolved_at
                .map(rfc3339)
                .unwrap_or_else(|| OPEN_ENDED.to_string()),
        }],
    }
}

pub struct AlertmanagerSink {
    client: Client,
    config: AlertmanagerConfig,
}

impl AlertmanagerSink {
    pub fn new(client: Client, config: AlertmanagerConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Sink for AlertmanagerSink {
    fn kind(&self) -> SinkKind {
        SinkKind::AlertmanagerWebhook
    }

    async fn deliver(&self, alert: &Alert, deadline: Duration) -> Result<(), SinkError> {
        let payload = envelope(alert, &self.config.receiver);
        let response = self
            .client
            .post(&self.config.url)
            .timeout(deadline)
            .json(&payload)
            .send()
            .await?;
        expect_success("alertmanager", &response)?;
        tracing::debug!("Alert sent to Alertmanager: {}", alert.metric);
        Ok(())
    }
}
