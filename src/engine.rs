//! Engine supervisor: wires the repository, drivers, scheduler and dispatcher.

use crate::alerting::{Dispatcher, Thresholds};
use crate::config::{ConfigError, EngineConfig};
use crate::db::{Repository, RepositoryError, TargetKind};
use crate::probe::{outcome_from_report, parse_resolver, DriverRegistry, IngestReport};
use crate::scheduler::{Scheduler, SchedulerConfig, StopReport};

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Errors that prevent the engine from starting.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no instance target with id {0}")]
    NotFound(i64),
    #[error("invalid report: {0}")]
    Invalid(String),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct Engine {
    config: EngineConfig,
    repository: Arc<dyn Repository>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Scheduler,
}

impl Engine {
    /// Build an engine with every built-in driver.
    pub fn new(config: EngineConfig, repository: Arc<dyn Repository>) -> Result<Self, EngineError> {
        let dns_default = config.dns_resolver.as_deref().and_then(parse_resolver);
        Self::with_registry(config, repository, DriverRegistry::standard(dns_default))
    }

    /// Build an engine with a caller-supplied driver registry.
    pub fn with_registry(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        registry: DriverRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        // Fail fast when the backend can't even list targets.
        let targets = repository.list_targets()?;
        tracing::info!("Engine: {} targets configured", targets.len());

        let dispatcher = Arc::new(Dispatcher::new(
            repository.clone(),
            config.max_concurrent_deliveries,
            config.sink_cache_ttl,
        ));
        let scheduler = Scheduler::new(
            repository.clone(),
            registry,
            dispatcher.clone(),
            SchedulerConfig {
                max_concurrent_probes: config.max_concurrent_probes,
                planning_period: config.planning_period,
                thresholds: Thresholds {
                    failure: config.default_failure_threshold,
                    recovery: config.default_recovery_threshold,
                },
            },
        );

        Ok(Self {
            config,
            repository,
            dispatcher,
            scheduler,
        })
    }

    /// Restore per-target state from recent checks, then start scheduling.
    pub fn start(&self) {
        match self.repository.list_targets() {
            Ok(targets) => {
                for target in &targets {
                    let window = target.interval().saturating_mul(10);
                    let from = chrono::Duration::from_std(window)
                        .ok()
                        .and_then(|w| Utc::now().checked_sub_signed(w));
                    match self.repository.list_checks(target.id, from, None) {
                        Ok(checks) if !checks.is_empty() => {
                            self.scheduler.tracker().replay(target, &checks);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Engine: failed to restore state for target {}: {}", target.id, e),
                    }
                }
            }
            Err(e) => tracing::error!("Engine: failed to list targets for state restore: {}", e),
        }

        self.scheduler.start();
    }

    /// Pick up target and sink changes.
    pub async fn reload(&self) {
        tracing::info!("Engine: reloading targets and sinks");
        self.dispatcher.invalidate_sinks().await;
        self.scheduler.request_replan();
    }

    pub async fn stop(&self) -> StopReport {
        self.scheduler.stop(self.config.shutdown_grace).await
    }

    /// Accept an agent report for an instance target.
    pub async fn ingest_metrics(&self, report: IngestReport) -> Result<(), IngestError> {
        validate_report(&report)?;

        let target = self
            .repository
            .get_target(report.instance_id)?
            .filter(|t| t.kind() == Some(TargetKind::Instance))
            .ok_or(IngestError::NotFound(report.instance_id))?;

        tracing::debug!("Engine: report from instance {} ({})", target.id, target.name);
        let outcome = outcome_from_report(report, Utc::now());
        self.scheduler.submit_outcome(&target, outcome).await;
        Ok(())
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn validate_report(report: &IngestReport) -> Result<(), IngestError> {
    let m = &report.metrics;
    let percentages = [
        ("cpu_usage", m.cpu_usage),
        ("memory_usage", m.memory_usage),
        ("disk_usage", m.disk_usage),
    ];
    for (name, value) in percentages {
        if let Some(v) = value {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(IngestError::Invalid(format!("{} must be between 0 and 100", name)));
            }
        }
    }

    let loads = [
        ("load_average_1m", m.load_average_1m),
        ("load_average_5m", m.load_average_5m),
        ("load_average_15m", m.load_average_15m),
    ];
    for (name, value) in loads {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(IngestError::Invalid(format!("{} must be non-negative", name)));
            }
        }
    }

    let counters = [
        ("network_io_in", m.network_io_in),
        ("network_io_out", m.network_io_out),
        ("uptime", m.uptime),
        ("process_count", m.process_count),
    ];
    for (name, value) in counters {
        if value.is_some_and(|v| v < 0) {
            return Err(IngestError::Invalid(format!("{} must be non-negative", name)));
        }
    }
    Ok(())
}
