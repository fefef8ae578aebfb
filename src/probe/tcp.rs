//! TCP connect probe.

use super::{finish, Driver, ProbeError, Probed};
use crate::db::{CheckStatus, Measurements, ProbeOutcome, Target, TargetParams};

use async_trait::async_trait;
use chrono::Utc;
use socket2::SockRef;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Connects, then closes.
#[derive(Debug, Default)]
pub struct TcpDriver;

#[async_trait]
impl Driver for TcpDriver {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match &target.params {
            TargetParams::Tcp(params) => run_tcp_probe(&params.host, params.port, deadline).await,
            _ => Err(ProbeError::Config("expected TCP parameters".to_string())),
        };

        finish(target, started_at, start, result, CheckStatus::Down)
    }
}

/// Open a TCP connection within `timeout` and close it immediately.
pub async fn run_tcp_probe(host: &str, port: u16, timeout: Duration) -> Result<Probed, ProbeError> {
    if host.is_empty() || port == 0 {
        return Err(ProbeError::Config(format!("invalid address {}:{}", host, port)));
    }

    let start = Instant::now();
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to connect to {}:{}: {}", host, port, e)))?;
    let elapsed = start.elapsed();
    let peer = stream.peer_addr().ok();

    close_now(&stream);
    drop(stream);

    Ok(Probed::healthy(
        CheckStatus::Up,
        Measurements {
            response_time_ms: Some(elapsed.as_millis() as u64),
            resolved_ip: peer.map(|addr| addr.ip().to_string()),
            ..Default::default()
        },
    ))
}

/// Reset instead of lingering in TIME_WAIT.
fn close_now(stream: &TcpStream) {
    if let Err(e) = SockRef::from(stream).set_linger(Some(Duration::ZERO)) {
        tracing::debug!("TCP probe: failed to set linger: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_probe_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let probed = run_tcp_probe("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        assert_eq!(probed.status, CheckStatus::Up);
        assert!(probed.measurements.response_time_ms.is_some());
        assert_eq!(probed.measurements.resolved_ip.as_deref(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = run_tcp_probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::Network(_))));
    }

    #[tokio::test]
    async fn test_sinkhole_reports_down_within_deadline() {
        // 192.0.2.0/24 is TEST-NET-1: either unroutable or silently dropped.
        let target = Target::new(
            9,
            "sinkhole",
            TargetParams::Tcp(crate::db::TcpParams {
                host: "192.0.2.1".to_string(),
                port: 9,
            }),
        );
        let outcome = TcpDriver.probe(&target, Duration::from_millis(500)).await;
        assert_eq!(outcome.status, CheckStatus::Down);
        assert!(outcome.elapsed_ms <= 600);
    }
}
