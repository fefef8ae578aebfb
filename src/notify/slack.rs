//! Slack incoming-webhook sink.

use super::{expect_success, render_text, Sink, SinkError};
use crate::db::{Alert, SinkKind};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

pub struct SlackSink {
    client: Client,
    config: SlackConfig,
}

impl SlackSink {
    pub fn new(client: Client, config: SlackConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Sink for SlackSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Slack
    }

    async fn deliver(&self, alert: &Alert, deadline: Duration) -> Result<(), SinkError> {
        let text = render_text(alert);
        let response = self
            .client
            .post(&self.config.webhook_url)
            .timeout(deadline)
            .json(&SlackMessage { text: &text })
            .send()
            .await?;
        expect_success("slack", &response)
    }
}
