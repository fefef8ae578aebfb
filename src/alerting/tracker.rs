//! Per-target health state and edge detection.

use crate::db::{Alert, AlertStatus, Check, CheckStatus, ProbeOutcome, SourceKind, Target, TargetId, TargetKind};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Thresholds applied when a target doesn't set its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub failure: u32,
    pub recovery: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            failure: 1,
            recovery: 1,
        }
    }
}

impl Thresholds {
    /// The target's own thresholds, falling back to `self`.
    pub fn for_target(&self, target: &Target) -> Thresholds {
        Thresholds {
            failure: target.failure_threshold.unwrap_or(self.failure).max(1),
            recovery: target.recovery_threshold.unwrap_or(self.recovery).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Triggered,
    Resolved,
}

/// In-memory state for one target.
///
/// `health` only flips on an edge, so it can lag `last_status` while a
/// threshold is being approached.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_status: Option<CheckStatus>,
    pub last_change: Option<DateTime<Utc>>,
    pub health: Health,
    /// Start of the most recent incident.
    pub triggered_at: Option<DateTime<Utc>>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_status: None,
            last_change: None,
            health: Health::Healthy,
            triggered_at: None,
        }
    }
}

impl TargetState {
    /// Fold one outcome into the state, returning the edge it caused.
    pub fn apply(&mut self, outcome: &ProbeOutcome, thresholds: Thresholds) -> Option<Edge> {
        let status = outcome.status;
        if self.last_status != Some(status) {
            self.last_change = Some(outcome.started_at);
        }
        self.last_status = Some(status);

        if status.is_unhealthy() {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
            if self.health == Health::Healthy && self.consecutive_failures >= thresholds.failure {
                self.health = Health::Unhealthy;
                self.triggered_at = Some(outcome.started_at);
                return Some(Edge::Triggered);
            }
        } else if status.is_healthy() {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
            if self.health == Health::Unhealthy && self.consecutive_successes >= thresholds.recovery {
                self.health = Health::Healthy;
                return Some(Edge::Resolved);
            }
        }
        None
    }

    /// Rebuild a state by applying `outcomes` oldest first.
    pub fn replay<'a, I>(outcomes: I, thresholds: Thresholds) -> TargetState
    where
        I: IntoIterator<Item = &'a ProbeOutcome>,
    {
        let mut state = TargetState::default();
        for outcome in outcomes {
            state.apply(outcome, thresholds);
        }
        state
    }
}

/// Alert descriptor labels for a target kind.
fn metric_for(kind: TargetKind, target: &Target) -> (&'static str, String) {
    match kind {
        TargetKind::Http | TargetKind::Tcp | TargetKind::Grpc | TargetKind::Mqtt => {
            ("service_status", "up".to_string())
        }
        TargetKind::Dns => ("dns_resolution", "resolved".to_string()),
        TargetKind::Instance => ("agent_heartbeat", "report within 3x interval".to_string()),
        TargetKind::DomainTls => {
            let warning = match &target.params {
                crate::db::TargetParams::DomainTls(p) => p.warning_threshold_days,
                _ => 0,
            };
            ("certificate_expiry", format!("> {} days", warning))
        }
    }
}

fn current_value(outcome: &ProbeOutcome) -> String {
    match outcome.measurements.days_left {
        Some(days) => format!("{} days", days),
        None => outcome.status.as_str().to_string(),
    }
}

/// Build the alert for an edge.
pub fn alert_for(target: &Target, kind: TargetKind, state: &TargetState, edge: Edge, outcome: &ProbeOutcome) -> Alert {
    let (metric, threshold) = metric_for(kind, target);
    let source_kind: SourceKind = kind.source_kind();
    let (status, resolved_at, message) = match edge {
        Edge::Triggered => {
            let cause = outcome.error.as_deref().unwrap_or("unhealthy");
            (
                AlertStatus::Triggered,
                None,
                format!("{} is {}: {}", target.name, outcome.status, cause),
            )
        }
        Edge::Resolved => (
            AlertStatus::Resolved,
            Some(outcome.started_at),
            format!("{} recovered ({})", target.name, outcome.status),
        ),
    };

    Alert {
        id: 0,
        source_kind,
        target_id: target.id,
        metric: metric.to_string(),
        threshold,
        current_value: current_value(outcome),
        status,
        triggered_at: state.triggered_at.unwrap_or(outcome.started_at),
        resolved_at,
        message,
    }
}

/// Arena of per-target states, each behind its own lock.
#[derive(Debug, Default)]
pub struct StateTracker {
    defaults: Thresholds,
    states: Mutex<HashMap<TargetId, Arc<Mutex<TargetState>>>>,
}

impl StateTracker {
    pub fn new(defaults: Thresholds) -> Self {
        Self {
            defaults,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, id: TargetId) -> Arc<Mutex<TargetState>> {
        let mut states = self.states.lock().unwrap();
        states.entry(id).or_default().clone()
    }

    /// Feed an outcome; returns the alert when it caused an edge.
    pub fn observe(&self, target: &Target, outcome: &ProbeOutcome) -> Option<Alert> {
        let kind = target.kind()?;
        let thresholds = self.defaults.for_target(target);

        let entry = self.entry(target.id);
        let mut state = entry.lock().unwrap();
        let edge = state.apply(outcome, thresholds)?;

        tracing::info!(
            "State: target {} ({}) {:?} after {} as {}",
            target.id,
            target.name,
            edge,
            outcome.status,
            kind
        );
        Some(alert_for(target, kind, &state, edge, outcome))
    }

    pub fn snapshot(&self, id: TargetId) -> Option<TargetState> {
        let states = self.states.lock().unwrap();
        states.get(&id).map(|s| s.lock().unwrap().clone())
    }

    /// Seed a target's state from stored checks, newest first as the
    /// repository returns them.
    pub fn replay(&self, target: &Target, checks: &[Check]) -> TargetState {
        let thresholds = self.defaults.for_target(target);
        let state = TargetState::replay(checks.iter().rev().map(|c| &c.outcome), thresholds);
        let mut states = self.states.lock().unwrap();
        states.insert(target.id, Arc::new(Mutex::new(state.clone())));
        state
    }

    /// Drop a deleted target's state.
    pub fn evict(&self, id: TargetId) {
        self.states.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
