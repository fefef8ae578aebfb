//! SMTP email sink.

use super::{headline, render_text, Sink, SinkError};
use crate::db::{Alert, SinkKind};

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Defaults to `from` when a password is set.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

pub struct EmailSink {
    config: EmailConfig,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSink {
    pub fn new(config: EmailConfig) -> Result<Self, SinkError> {
        if config.host.is_empty() {
            return Err(SinkError::InvalidConfig("smtp host is empty".to_string()));
        }
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| SinkError::InvalidConfig(format!("invalid from address: {}", e)))?;
        let to = config
            .to
            .parse::<Mailbox>()
            .map_err(|e| SinkError::InvalidConfig(format!("invalid to address: {}", e)))?;
        Ok(Self { config, from, to })
    }

    pub fn build_message(&self, alert: &Alert) -> Result<Message, SinkError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("[pulsewatch] {}", headline(alert)))
            .header(ContentType::TEXT_PLAIN)
            .body(render_text(alert))
            .map_err(|e| SinkError::Smtp(e.to_string()))
    }

    fn transport(&self, deadline: Duration) -> Result<AsyncSmtpTransport<Tokio1Executor>, SinkError> {
        let builder = if self.config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .map_err(|e| SinkError::Smtp(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };
        let mut builder = builder.port(self.config.port).timeout(Some(deadline));

        if let Some(password) = self.config.password.clone() {
            let username = self
                .config
                .username
                .clone()
                .unwrap_or_else(|| self.config.from.clone());
            builder = builder
                .credentials(Credentials::new(username, password))
                .authentication(vec![Mechanism::Plain]);
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Sink for EmailSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Email
    }

    async fn deliver(&self, alert: &Alert, deadline: Duration) -> Result<(), SinkError> {
        let message = self.build_message(alert)?;
        self.transport(deadline)?
            .send(message)
            .await
            .map_err(|e| SinkError::Smtp(e.to_string()))?;
        tracing::debug!("Email sent to {}", self.config.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AlertStatus;
    use crate::notify::testing;

    fn config() -> EmailConfig {
        serde_json::from_value(serde_json::json!({
            "host": "smtp.example.test",
            "from": "pulsewatch@example.test",
            "to": "Ops <ops@example.test>",
            "password": "hunter2"
        }))
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let cfg = config();
        assert_eq!(cfg.port, 587);
        assert!(cfg.starttls);
        assert!(cfg.username.is_none());
    }

    #[test]
    fn test_message_contents() {
        let sink = EmailSink::new(config()).unwrap();
        let message = sink.build_message(&testing::alert(AlertStatus::Triggered)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [pulsewatch] [FIRING] service_status on service target 7"));
        assert!(raw.contains("ops@example.test"));
        assert!(raw.contains("expected status 200, got 500"));
    }

    #[test]
    fn test_invalid_address() {
        let mut cfg = config();
        cfg.to = "not an address".to_string();
        assert!(matches!(EmailSink::new(cfg), Err(SinkError::InvalidConfig(_))));
    }
}
