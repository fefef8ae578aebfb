//! Telegram Bot API sink.

use super::{expect_success, render_text, Sink, SinkError};
use crate::db::{Alert, SinkKind};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Bot API base URL; defaults to the public endpoint.
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Escape text for Telegram MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|' | '{' | '}' | '.' | '!'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct TelegramSink {
    client: Client,
    config: TelegramConfig,
}

impl TelegramSink {
    pub fn new(client: Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }

    fn api_url(&self) -> String {
        let base = self.config.api_base.as_deref().unwrap_or(TELEGRAM_API);
        format!("{}/bot{}/sendMessage", base.trim_end_matches('/'), self.config.bot_token)
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Telegram
    }

    async fn deliver(&self, alert: &Alert, deadline: Duration) -> Result<(), SinkError> {
        let text = escape_markdown_v2(&render_text(alert));
        let payload = TelegramMessage {
            chat_id: &self.config.chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
        };
        let response = self
            .client
            .post(self.api_url())
            .timeout(deadline)
            .json(&payload)
            .send()
            .await?;
        expect_success("telegram", &response)
    }
}
