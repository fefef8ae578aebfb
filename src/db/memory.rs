//! In-memory repository, used when embedding the engine and in tests.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

use super::models::*;
use super::repository::{Repository, RepositoryError};

#[derive(Default)]
struct Inner {
    targets: Vec<Target>,
    checks: Vec<Check>,
    alerts: Vec<Alert>,
    sinks: Vec<NotificationSink>,
    fail_appends: bool,
}

/// A `Repository` that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole target set.
    pub fn set_targets(&self, targets: Vec<Target>) {
        self.inner.lock().unwrap().targets = targets;
    }

    pub fn upsert_target(&self, target: Target) {
        let mut inner = self.inner.lock().unwrap();
        match inner.targets.iter_mut().find(|t| t.id == target.id) {
            Some(existing) => *existing = target,
            None => inner.targets.push(target),
        }
    }

    pub fn remove_target(&self, id: TargetId) {
        self.inner.lock().unwrap().targets.retain(|t| t.id != id);
    }

    pub fn set_sinks(&self, sinks: Vec<NotificationSink>) {
        self.inner.lock().unwrap().sinks = sinks;
    }

    /// Make check and alert appends fail, simulating an unavailable backend.
    pub fn set_fail_appends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_appends = fail;
    }

    pub fn checks(&self) -> Vec<Check> {
        self.inner.lock().unwrap().checks.clone()
    }

    pub fn checks_for(&self, target_id: TargetId) -> Vec<Check> {
        self.inner
            .lock()
            .unwrap()
            .checks
            .iter()
            .filter(|c| c.outcome.target_id == target_id)
            .cloned()
            .collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().unwrap().alerts.clone()
    }
}

impl Repository for MemoryStore {
    fn list_targets(&self) -> Result<Vec<Target>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.targets.iter().filter(|t| !t.deleted).cloned().collect())
    }

    fn get_target(&self, id: TargetId) -> Result<Option<Target>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.targets.iter().find(|t| t.id == id && !t.deleted).cloned())
    }

    fn append_check(&self, outcome: &ProbeOutcome) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_appends {
            return Err(RepositoryError::Unavailable("appends disabled".to_string()));
        }
        let id = inner.checks.len() as i64 + 1;
        inner.checks.push(Check {
            id,
            outcome: outcome.clone(),
        });
        Ok(())
    }

    fn append_alert(&self, alert: &Alert) -> Result<i64, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_appends {
            return Err(RepositoryError::Unavailable("appends disabled".to_string()));
        }
        let id = inner.alerts.len() as i64 + 1;
        let mut stored = alert.clone();
        stored.id = id;
        inner.alerts.push(stored);
        Ok(id)
    }

    fn list_sinks(&self) -> Result<Vec<NotificationSink>, RepositoryError> {
        Ok(self.inner.lock().unwrap().sinks.clone())
    }

    fn list_checks(
        &self,
        target_id: TargetId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Check>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let mut checks: Vec<Check> = inner
            .checks
            .iter()
            .filter(|c| c.outcome.target_id == target_id)
            .filter(|c| from.map_or(true, |f| c.outcome.started_at >= f))
            .filter(|c| to.map_or(true, |t| c.outcome.started_at <= t))
            .cloned()
            .collect();
        checks.sort_by(|a, b| {
            b.outcome
                .started_at
                .cmp(&a.outcome.started_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(checks)
    }

    fn latest_check(&self, target_id: TargetId) -> Result<Option<Check>, RepositoryError> {
        Ok(self.list_checks(target_id, None, None)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_checks_newest_first() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        for i in 0..3 {
            let outcome =
                ProbeOutcome::new(7, t0 + ChronoDuration::seconds(i), CheckStatus::Up);
            store.append_check(&outcome).unwrap();
        }
        let checks = store.list_checks(7, None, None).unwrap();
        assert_eq!(checks.len(), 3);
        assert!(checks[0].outcome.started_at > checks[2].outcome.started_at);
        assert_eq!(
            store.latest_check(7).unwrap().unwrap().outcome.started_at,
            t0 + ChronoDuration::seconds(2)
        );
    }

    #[test]
    fn test_soft_deleted_targets_hidden() {
        let store = MemoryStore::new();
        let mut target = Target::new(1, "gone", TargetParams::Instance(InstanceParams::default()));
        target.deleted = true;
        store.upsert_target(target);
        assert!(store.list_targets().unwrap().is_empty());
        assert!(store.get_target(1).unwrap().is_none());
    }
}
