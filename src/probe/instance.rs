//! Passive instance targets: outcomes come from agent reports, not probes.

use super::Driver;
use crate::db::{CheckStatus, InstanceMetrics, ProbeOutcome, Target, TargetId};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error recorded when an instance misses its report window.
pub const NO_AGENT_REPORT: &str = "no agent report";

/// A metrics report posted by an instance agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub instance_id: TargetId,
    #[serde(flatten)]
    pub metrics: InstanceMetrics,
}

#[derive(Debug, Default)]
pub struct InstanceDriver;

#[async_trait]
impl Driver for InstanceDriver {
    async fn probe(&self, target: &Target, _deadline: Duration) -> ProbeOutcome {
        ProbeOutcome::new(target.id, Utc::now(), CheckStatus::Unknown)
            .with_error("passive target awaiting agent report")
    }

    fn is_passive(&self) -> bool {
        true
    }
}

/// Turn an accepted agent report into an `Up` outcome.
pub fn outcome_from_report(report: IngestReport, received_at: DateTime<Utc>) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::new(report.instance_id, received_at, CheckStatus::Up);
    outcome.metrics = Some(report.metrics);
    outcome
}

/// The outcome synthesized when an instance has been silent too long.
pub fn silence_outcome(target_id: TargetId, now: DateTime<Utc>) -> ProbeOutcome {
    ProbeOutcome::new(target_id, now, CheckStatus::Down).with_error(NO_AGENT_REPORT)
}

/// Reports older than this are considered missing.
pub fn silence_window(target: &Target) -> Duration {
    target.interval().saturating_mul(3)
}
