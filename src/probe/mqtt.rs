//! MQTT broker probe.
//!
//! A probe connects, then either subscribes to the configured topic or
//! publishes a zero-byte retained message to a probe-private topic, and
//! disconnects once the broker acknowledged.

use super::{finish, Driver, ProbeError, Probed};
use crate::db::{CheckStatus, Measurements, MqttParams, ProbeOutcome, Target, TargetParams};

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};
use std::time::{Duration, Instant};

/// Round-trips one request through the broker.
#[derive(Debug, Default)]
pub struct MqttDriver;

#[async_trait]
impl Driver for MqttDriver {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match &target.params {
            TargetParams::Mqtt(params) => run_mqtt_probe(params, deadline).await,
            _ => Err(ProbeError::Config("expected MQTT parameters".to_string())),
        };

        finish(target, started_at, start, result, CheckStatus::Down)
    }
}

pub fn qos_from(level: u8) -> Result<QoS, ProbeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ProbeError::Config(format!("invalid QoS level: {}", other))),
    }
}

/// Run an MQTT probe.
pub async fn run_mqtt_probe(params: &MqttParams, timeout: Duration) -> Result<Probed, ProbeError> {
    if params.host.is_empty() || params.port == 0 {
        return Err(ProbeError::Config(format!("invalid address {}:{}", params.host, params.port)));
    }
    let qos = qos_from(params.qos)?;

    let client_id = format!("pulsewatch-probe-{:08x}", rand::random::<u32>());
    let mut options = MqttOptions::new(client_id, params.host.clone(), params.port);
    options.set_clean_session(true);
    if let Some(username) = params.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, params.password.clone().unwrap_or_default());
    }

    let probe_topic = format!("pulsewatch/probe/{}", options.client_id());
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let start = Instant::now();

    let result = tokio::time::timeout(timeout, async {
        wait_for(&mut eventloop, |e| matches!(e, Event::Incoming(Packet::ConnAck(_)))).await?;

        match params.topic.as_deref().filter(|t| !t.is_empty()) {
            Some(topic) => {
                client
                    .subscribe(topic, qos)
                    .await
                    .map_err(|e| ProbeError::Network(format!("failed to subscribe: {}", e)))?;
                let ack = wait_for(&mut eventloop, |e| matches!(e, Event::Incoming(Packet::SubAck(_)))).await?;
                if let Event::Incoming(Packet::SubAck(suback)) = ack {
                    if suback.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                        return Err(ProbeError::Mismatch(format!("broker rejected subscription to {}", topic)));
                    }
                }
            }
            None => {
                client
                    .publish(probe_topic.as_str(), qos, true, Vec::new())
                    .await
                    .map_err(|e| ProbeError::Network(format!("failed to publish: {}", e)))?;
                wait_for(&mut eventloop, |e| match qos {
                    QoS::AtMostOnce => matches!(e, Event::Outgoing(Outgoing::Publish(_))),
                    QoS::AtLeastOnce => matches!(e, Event::Incoming(Packet::PubAck(_))),
                    QoS::ExactlyOnce => matches!(e, Event::Incoming(Packet::PubComp(_))),
                })
                .await?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|_| ProbeError::Timeout(timeout))
    .and_then(|r| r);

    let elapsed = start.elapsed();

    // Best-effort goodbye; the outcome is already decided.
    if client.try_disconnect().is_ok() {
        let _ = tokio::time::timeout(Duration::from_millis(100), eventloop.poll()).await;
    }

    result?;
    Ok(Probed::healthy(
        CheckStatus::Up,
        Measurements {
            response_time_ms: Some(elapsed.as_millis() as u64),
            ..Default::default()
        },
    ))
}

async fn wait_for<F>(eventloop: &mut EventLoop, wanted: F) -> Result<Event, ProbeError>
where
    F: Fn(&Event) -> bool,
{
    loop {
        match eventloop.poll().await {
            Ok(event) if wanted(&event) => return Ok(event),
            Ok(_) => continue,
            Err(e) => return Err(ProbeError::Network(format!("MQTT connection error: {}", e))),
        }
    }
}
