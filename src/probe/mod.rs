//! Probe drivers for every target kind.
//!
//! A driver executes one probe against a target snapshot and always returns a
//! `ProbeOutcome`; errors are folded into the outcome rather than propagated.

mod dns;
mod grpc;
mod http;
mod instance;
mod mqtt;
mod tcp;
mod tls;

pub use dns::*;
pub use grpc::*;
pub use http::*;
pub use instance::*;
pub use mqtt::*;
pub use tcp::*;
pub use tls::*;

use crate::db::{CheckStatus, Measurements, ProbeOutcome, Target, TargetKind};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on any probe deadline regardless of the target timeout.
pub const MAX_PROBE_DEADLINE: Duration = Duration::from_secs(60);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Mismatch(String),
}

/// What a driver observed on success.
#[derive(Debug, Clone)]
pub struct Probed {
    pub status: CheckStatus,
    pub measurements: Measurements,
    pub error: Option<String>,
}

impl Probed {
    pub fn healthy(status: CheckStatus, measurements: Measurements) -> Self {
        Self {
            status,
            measurements,
            error: None,
        }
    }
}

/// A probe implementation for one target kind.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Run one probe. Implementations must return before `deadline` elapses.
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome;

    /// Passive drivers never get scheduled; their outcomes arrive from outside.
    fn is_passive(&self) -> bool {
        false
    }
}

/// Effective deadline for a target.
pub fn deadline_for(target: &Target) -> Duration {
    target.timeout().min(MAX_PROBE_DEADLINE)
}

/// Fold a driver result into an outcome.
///
/// Configuration errors map to `Unknown`; any other error maps to `unhealthy`
/// (`Down` for services, `Failed` for DNS).
pub(crate) fn finish(
    target: &Target,
    started_at: chrono::DateTime<Utc>,
    start: Instant,
    result: Result<Probed, ProbeError>,
    unhealthy: CheckStatus,
) -> ProbeOutcome {
    let elapsed = start.elapsed();
    let mut outcome = ProbeOutcome::new(target.id, started_at, CheckStatus::Unknown).with_elapsed(elapsed);

    match result {
        Ok(probed) => {
            outcome.status = probed.status;
            outcome.measurements = probed.measurements;
            outcome.error = probed.error;
        }
        Err(ProbeError::Config(msg)) => {
            tracing::warn!("Probe: target {} has invalid configuration: {}", target.id, msg);
            outcome.error = Some(format!("invalid configuration: {}", msg));
        }
        Err(e) => {
            outcome.status = unhealthy;
            outcome.error = Some(e.to_string());
        }
    }

    outcome
}

/// Lookup from target kind to driver.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<TargetKind, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in driver.
    pub fn standard(dns_default: Option<SocketAddr>) -> Self {
        let mut registry = Self::new();
        registry.register(TargetKind::Http, Arc::new(HttpDriver::new()));
        registry.register(TargetKind::Tcp, Arc::new(TcpDriver));
        registry.register(TargetKind::Grpc, Arc::new(GrpcDriver));
        registry.register(TargetKind::Mqtt, Arc::new(MqttDriver));
        registry.register(TargetKind::Dns, Arc::new(DnsDriver::new(dns_default)));
        registry.register(TargetKind::Instance, Arc::new(InstanceDriver));
        registry.register(TargetKind::DomainTls, Arc::new(TlsDriver::new()));
        registry
    }

    /// Register (or replace) the driver for a kind.
    pub fn register(&mut self, kind: TargetKind, driver: Arc<dyn Driver>) {
        self.drivers.insert(kind, driver);
    }

    fn driver_for(&self, target: &Target) -> Option<&Arc<dyn Driver>> {
        target.kind().and_then(|kind| self.drivers.get(&kind))
    }

    /// Whether the scheduler should leave this target alone.
    pub fn is_passive(&self, target: &Target) -> bool {
        self.driver_for(target).is_some_and(|d| d.is_passive())
    }

    /// Run the target's driver under `deadline`.
    pub async fn probe(&self, target: &Target, deadline: Duration) -> ProbeOutcome {
        let started_at = Utc::now();

        let Some(driver) = self.driver_for(target) else {
            tracing::warn!(
                "Probe: no driver for target {} (kind {})",
                target.id,
                target.params.kind_name()
            );
            return ProbeOutcome::new(target.id, started_at, CheckStatus::Unknown)
                .with_error(format!("unsupported kind: {}", target.params.kind_name()));
        };

        match tokio::time::timeout(deadline, driver.probe(target, deadline)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let status = match target.kind() {
                    Some(TargetKind::Dns) => CheckStatus::Failed,
                    _ => CheckStatus::Down,
                };
                ProbeOutcome::new(target.id, started_at, status)
                    .with_elapsed(deadline)
                    .with_error(ProbeError::Timeout(deadline).to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InstanceParams, TargetParams, TcpParams};

    struct SlowDriver;

    #[async_trait]
    impl Driver for SlowDriver {
        async fn probe(&self, target: &Target, _deadline: Duration) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ProbeOutcome::new(target.id, Utc::now(), CheckStatus::Up)
        }
    }

    #[tokio::test]
    async fn test_unsupported_kind_is_unknown() {
        let registry = DriverRegistry::standard(None);
        let target = Target::new(
            1,
            "legacy",
            TargetParams::Unsupported {
                kind: "ping".to_string(),
                reason: "unknown variant".to_string(),
            },
        );
        let outcome = registry.probe(&target, Duration::from_secs(1)).await;
        assert_eq!(outcome.status, CheckStatus::Unknown);
        assert_eq!(outcome.error.as_deref(), Some("unsupported kind: ping"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_enforced_over_slow_driver() {
        let mut registry = DriverRegistry::new();
        registry.register(TargetKind::Tcp, Arc::new(SlowDriver));
        let target = Target::new(
            2,
            "slow",
            TargetParams::Tcp(TcpParams {
                host: "127.0.0.1".to_string(),
                port: 9,
            }),
        );
        let outcome = registry.probe(&target, Duration::from_millis(500)).await;
        assert_eq!(outcome.status, CheckStatus::Down);
        assert!(outcome.elapsed_ms <= 550);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_instance_is_passive_and_deadline_capped() {
        let registry = DriverRegistry::standard(None);
        let mut target = Target::new(3, "host", TargetParams::Instance(InstanceParams::default()));
        assert!(registry.is_passive(&target));
        target.timeout_ms = 120_000;
        assert_eq!(deadline_for(&target), MAX_PROBE_DEADLINE);
    }
}
