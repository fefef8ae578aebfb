//! Scheduler module for planning, dispatching and recording probes.
//!
//! One loop owns all timing: it re-reads the target list every planning
//! period, fires due ticks into a bounded worker pool and sweeps silent
//! instance targets. Workers run the probe and push the outcome through
//! append, state tracking and alert dispatch.

mod ticks;

pub use ticks::*;

use crate::alerting::{Dispatcher, StateTracker, Thresholds};
use crate::db::{ProbeOutcome, Repository, Target, TargetId, TargetKind};
use crate::probe::{deadline_for, silence_outcome, silence_window, DriverRegistry};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_probes: usize,
    pub planning_period: Duration,
    pub thresholds: Thresholds,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 64,
            planning_period: Duration::from_secs(10),
            thresholds: Thresholds::default(),
        }
    }
}

/// How `stop` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// Every worker finished within the grace period.
    pub drained: bool,
    /// Workers still running when the grace period ran out; their results are discarded.
    pub abandoned: usize,
}

/// Per-target in-flight gate.
#[derive(Debug, Default)]
struct Gate {
    in_flight: bool,
    /// Set once the target disappears; late results are dropped.
    retired: bool,
}

/// Everything the scheduler serializes per target.
#[derive(Debug, Default)]
struct Slot {
    gate: Mutex<Gate>,
    /// Held from append through alert dispatch so outcomes are recorded
    /// and tracked in one order.
    order: tokio::sync::Mutex<()>,
}

type SlotRef = Arc<Slot>;

/// Clears the in-flight flag when the worker ends, even by panic.
struct InFlight(SlotRef);

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut gate) = self.0.gate.lock() {
            gate.in_flight = false;
        }
    }
}

struct Shared {
    repository: Arc<dyn Repository>,
    registry: DriverRegistry,
    tracker: StateTracker,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<Semaphore>,
    slots: Mutex<HashMap<TargetId, SlotRef>>,
    /// When the last report (or synthesized silence) was seen per instance.
    instance_seen: Mutex<HashMap<TargetId, Instant>>,
    /// Set when `stop` gives up on in-flight work.
    discard: RwLock<bool>,
}

impl Shared {
    fn slot(&self, id: TargetId) -> SlotRef {
        self.slots.lock().unwrap().entry(id).or_default().clone()
    }

    fn retire(&self, id: TargetId) {
        if let Some(slot) = self.slots.lock().unwrap().remove(&id) {
            slot.gate.lock().unwrap().retired = true;
        }
        self.instance_seen.lock().unwrap().remove(&id);
        self.tracker.evict(id);
    }

    /// Append, track, alert.
    async fn complete(&self, target: &Target, slot: &SlotRef, outcome: ProbeOutcome) {
        let _order = slot.order.lock().await;
        {
            let discard = self.discard.read().unwrap();
            if *discard {
                tracing::debug!("Scheduler: discarding late result for target {}", target.id);
                return;
            }
            let gate = slot.gate.lock().unwrap();
            if gate.retired {
                tracing::debug!("Scheduler: target {} was removed, dropping result", target.id);
                return;
            }
            if let Err(e) = self.repository.append_check(&outcome) {
                tracing::error!("Scheduler: failed to append check for target {}: {}", target.id, e);
            }
        }

        if let Some(alert) = self.tracker.observe(target, &outcome) {
            self.dispatcher.dispatch(alert).await;
        }
    }
}

/// The probe scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
    replan: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: DriverRegistry,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let max = config.max_concurrent_probes.clamp(1, u32::MAX as usize);
        let shared = Arc::new(Shared {
            repository,
            registry,
            tracker: StateTracker::new(config.thresholds),
            dispatcher,
            pool: Arc::new(Semaphore::new(max)),
            slots: Mutex::new(HashMap::new()),
            instance_seen: Mutex::new(HashMap::new()),
            discard: RwLock::new(false),
        });

        Self {
            shared,
            config: SchedulerConfig {
                max_concurrent_probes: max,
                ..config
            },
            replan: Arc::new(Notify::new()),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Start the planning/dispatch loop.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            tracing::warn!("Scheduler: already started");
            return;
        }

        tracing::info!(
            "Starting scheduler (pool {}, planning every {:?})",
            self.config.max_concurrent_probes,
            self.config.planning_period
        );
        *task = Some(tokio::spawn(run_loop(
            self.shared.clone(),
            self.config.clone(),
            self.replan.clone(),
            self.shutdown.subscribe(),
        )));
    }

    /// Run a planning pass as soon as possible.
    pub fn request_replan(&self) {
        self.replan.notify_one();
    }

    /// Feed an externally produced outcome through the same pipeline as probes.
    pub async fn submit_outcome(&self, target: &Target, outcome: ProbeOutcome) {
        if target.kind() == Some(TargetKind::Instance) {
            self.shared
                .instance_seen
                .lock()
                .unwrap()
                .insert(target.id, Instant::now());
        }
        let slot = self.shared.slot(target.id);
        self.shared.complete(target, &slot, outcome).await;
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.shared.tracker
    }

    /// Stop planning and dispatching, then wait up to `grace` for workers.
    pub async fn stop(&self, grace: Duration) -> StopReport {
        let _ = self.shutdown.send(true);
        let deadline = Instant::now() + grace;

        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                tracing::warn!("Scheduler: loop did not exit within grace period");
            }
        }

        let max = self.config.max_concurrent_probes as u32;
        let drained = matches!(
            tokio::time::timeout_at(deadline, self.shared.pool.acquire_many(max)).await,
            Ok(Ok(_))
        );
        let abandoned = max as usize - self.shared.pool.available_permits().min(max as usize);

        *self.shared.discard.write().unwrap() = true;

        if drained {
            tracing::info!("Scheduler stopped");
        } else {
            tracing::warn!("Scheduler stopped with {} probes still running; their results will be discarded", abandoned);
        }
        StopReport { drained, abandoned }
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    config: SchedulerConfig,
    replan: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut table = TickTable::new();
    let mut targets: HashMap<TargetId, Arc<Target>> = HashMap::new();
    let mut next_plan = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Instant::now();
        if now >= next_plan {
            plan(&shared, &mut table, &mut targets, now);
            sweep_instances(&shared, &targets, now);
            next_plan = now + config.planning_period;
        }

        for id in table.due(now) {
            if let Some(target) = targets.get(&id) {
                dispatch(&shared, target.clone());
            }
            table.advance(id, now);
        }

        let wake = table.next_deadline().map_or(next_plan, |d| d.min(next_plan));
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = replan.notified() => {
                next_plan = Instant::now();
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    tracing::info!("Scheduler: planning loop exited");
}

/// Reconcile the tick table with the repository's target list.
fn plan(
    shared: &Shared,
    table: &mut TickTable,
    targets: &mut HashMap<TargetId, Arc<Target>>,
    now: Instant,
) {
    let listed = match shared.repository.list_targets() {
        Ok(listed) => listed,
        Err(e) => {
            tracing::error!("Scheduler: failed to list targets, keeping previous plan: {}", e);
            return;
        }
    };

    let fresh: HashMap<TargetId, Arc<Target>> = listed
        .into_iter()
        .filter(|t| !t.deleted)
        .map(|t| (t.id, Arc::new(t)))
        .collect();

    let active: Vec<(TargetId, Duration)> = fresh
        .values()
        .filter(|t| !shared.registry.is_passive(t))
        .map(|t| (t.id, t.interval()))
        .collect();

    let changes = table.reconcile(&active, now, random_jitter);

    for id in targets.keys().filter(|id| !fresh.contains_key(id)) {
        shared.retire(*id);
    }
    for target in fresh.values() {
        if target.kind() == Some(TargetKind::Instance) && !targets.contains_key(&target.id) {
            seed_instance(shared, target.id, now);
        }
    }

    if !changes.added.is_empty() || !changes.removed.is_empty() || !changes.retimed.is_empty() {
        tracing::info!(
            "Scheduler: planned {} targets (+{} -{} ~{})",
            fresh.len(),
            changes.added.len(),
            changes.removed.len(),
            changes.retimed.len()
        );
    }
    *targets = fresh;
}

/// Start an instance's silence clock from its last stored check.
fn seed_instance(shared: &Shared, id: TargetId, now: Instant) {
    let last = match shared.repository.latest_check(id) {
        Ok(Some(check)) => {
            let age = (Utc::now() - check.outcome.started_at).to_std().unwrap_or(Duration::ZERO);
            now.checked_sub(age).unwrap_or(now)
        }
        Ok(None) => now,
        Err(e) => {
            tracing::warn!("Scheduler: failed to read last check for instance {}: {}", id, e);
            now
        }
    };
    shared.instance_seen.lock().unwrap().entry(id).or_insert(last);
}

/// Synthesize a Down outcome for every instance silent past its window.
fn sweep_instances(shared: &Arc<Shared>, targets: &HashMap<TargetId, Arc<Target>>, now: Instant) {
    for target in targets.values() {
        if target.kind() != Some(TargetKind::Instance) {
            continue;
        }
        let silent = {
            let mut seen = shared.instance_seen.lock().unwrap();
            let last = *seen.entry(target.id).or_insert(now);
            let silent = now.duration_since(last) > silence_window(target);
            if silent {
                seen.insert(target.id, now);
            }
            silent
        };
        if !silent {
            continue;
        }

        tracing::warn!("Scheduler: instance {} ({}) has not reported", target.id, target.name);
        let shared = shared.clone();
        let target = target.clone();
        let slot = shared.slot(target.id);
        tokio::spawn(async move {
            let outcome = silence_outcome(target.id, Utc::now());
            shared.complete(&target, &slot, outcome).await;
        });
    }
}

/// Hand a due target to the worker pool unless it is already running.
fn dispatch(shared: &Arc<Shared>, target: Arc<Target>) {
    let slot = shared.slot(target.id);
    let permit: OwnedSemaphorePermit = {
        let mut g = slot.gate.lock().unwrap();
        if g.in_flight {
            tracing::debug!("Scheduler: target {} still in flight, skipping tick", target.id);
            return;
        }
        match shared.pool.clone().try_acquire_owned() {
            Ok(p) => {
                g.in_flight = true;
                p
            }
            Err(_) => {
                tracing::warn!("Scheduler: probe pool saturated, dropping tick for target {}", target.id);
                return;
            }
        }
    };

    let shared = shared.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let _in_flight = InFlight(slot.clone());

        let outcome = shared.registry.probe(&target, deadline_for(&target)).await;
        shared.complete(&target, &slot, outcome).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AlertStatus, CheckStatus, InstanceParams, MemoryStore, TargetParams, TcpParams};
    use crate::alerting::TargetState;
    use crate::probe::{outcome_from_report, Driver, IngestReport, NO_AGENT_REPORT};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps for `delay`, tracking concurrency per target and recording calls.
    #[derive(Default)]
    struct FakeDriver {
        delay: Duration,
        running: Mutex<HashMap<TargetId, usize>>,
        max_running: AtomicUsize,
        calls: Mutex<Vec<(TargetId, Instant)>>,
    }

    impl FakeDriver {
        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Default::default()
            })
        }

        fn calls_for(&self, id: TargetId) -> usize {
            self.calls.lock().unwrap().iter().filter(|(t, _)| *t == id).count()
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        async fn probe(&self, target: &Target, _deadline: Duration) -> ProbeOutcome {
            self.calls.lock().unwrap().push((target.id, Instant::now()));
            {
                let mut running = self.running.lock().unwrap();
                let n = running.entry(target.id).or_default();
                *n += 1;
                self.max_running.fetch_max(*n, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            *self.running.lock().unwrap().get_mut(&target.id).unwrap() -= 1;
            ProbeOutcome::new(target.id, Utc::now(), CheckStatus::Up)
        }
    }

    fn tcp_target(id: TargetId, interval_secs: u64) -> Target {
        let mut target = Target::new(
            id,
            &format!("t{}", id),
            TargetParams::Tcp(TcpParams {
                host: "127.0.0.1".to_string(),
                port: 9,
            }),
        );
        target.interval_secs = interval_secs;
        target
    }

    fn scheduler(store: &Arc<MemoryStore>, driver: Arc<FakeDriver>, planning_period: Duration) -> Scheduler {
        scheduler_with_pool(store, driver, planning_period, 256)
    }

    fn scheduler_with_pool(
        store: &Arc<MemoryStore>,
        driver: Arc<FakeDriver>,
        planning_period: Duration,
        max_concurrent_probes: usize,
    ) -> Scheduler {
        let mut registry = DriverRegistry::standard(None);
        registry.register(TargetKind::Tcp, driver);
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), 4, Duration::from_secs(30)));
        Scheduler::new(
            store.clone(),
            registry,
            dispatcher,
            SchedulerConfig {
                max_concurrent_probes,
                planning_period,
                thresholds: Thresholds::default(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_probe_per_target() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets((1..=5).map(|id| tcp_target(id, 1)).collect());
        let driver = FakeDriver::with_delay(Duration::from_millis(2500));
        let scheduler = scheduler(&store, driver.clone(), Duration::from_secs(10));

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.stop(Duration::from_secs(5)).await;

        assert_eq!(driver.max_running.load(Ordering::SeqCst), 1);
        // A 2.5s probe on a 1s cadence runs about every 3s, never back to back.
        for id in 1..=5 {
            let n = driver.calls_for(id);
            assert!((5..=8).contains(&n), "target {} probed {} times", id, n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_checks_after_stop() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets(vec![tcp_target(1, 1)]);
        let driver = FakeDriver::with_delay(Duration::from_secs(3));
        let scheduler = scheduler(&store, driver.clone(), Duration::from_secs(10));

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let report = scheduler.stop(Duration::from_millis(200)).await;
        assert!(!report.drained);
        assert_eq!(report.abandoned, 1);

        let after_stop = store.checks().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.checks().len(), after_stop);
        assert_eq!(driver.calls_for(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_within_grace() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets(vec![tcp_target(1, 1)]);
        let driver = FakeDriver::with_delay(Duration::from_millis(300));
        let scheduler = scheduler(&store, driver, Duration::from_secs(10));

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let report = scheduler.stop(Duration::from_secs(5)).await;
        assert!(report.drained);
        assert_eq!(report.abandoned, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_mid_probe_appends_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets(vec![tcp_target(1, 60)]);
        let driver = FakeDriver::with_delay(Duration::from_secs(70));
        let scheduler = scheduler(&store, driver.clone(), Duration::from_secs(10));

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(driver.calls_for(1), 1);

        store.remove_target(1);
        scheduler.request_replan();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(store.checks_for(1).is_empty());
        assert!(scheduler.tracker().snapshot(1).is_none());
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_converges_to_new_target_set() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets((1..=100).map(|id| tcp_target(id, 1)).collect());
        let driver = FakeDriver::with_delay(Duration::from_millis(10));
        let scheduler = scheduler(&store, driver.clone(), Duration::from_secs(10));

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(3)).await;

        for id in 1..=50 {
            store.remove_target(id);
        }
        for id in 101..=150 {
            store.upsert_target(tcp_target(id, 1));
        }
        scheduler.request_replan();
        let reload = Instant::now();
        tokio::time::sleep(Duration::from_secs(10)).await;
        scheduler.stop(Duration::from_secs(1)).await;

        let calls = driver.calls.lock().unwrap().clone();
        assert!(calls.iter().all(|(id, at)| *id > 50 || *at <= reload));
        for id in 51..=150 {
            assert!(calls.iter().any(|(t, at)| *t == id && *at > reload), "target {} never probed", id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_without_refire() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets(vec![tcp_target(1, 60)]);
        let driver = FakeDriver::with_delay(Duration::ZERO);
        let scheduler = scheduler(&store, driver.clone(), Duration::from_secs(10));

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(driver.calls_for(1) >= 1);

        store.upsert_target(tcp_target(1, 5));
        scheduler.request_replan();
        let reload = Instant::now();
        tokio::time::sleep(Duration::from_secs(21)).await;

        let calls: Vec<Instant> = driver
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, at)| *at > reload)
            .map(|(_, at)| *at)
            .collect();
        assert!(calls[0] <= reload + Duration::from_secs(5));
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(4));
        }
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_instance_triggers_alert() {
        let store = Arc::new(MemoryStore::new());
        let mut instance = Target::new(7, "db-host", TargetParams::Instance(InstanceParams::default()));
        instance.interval_secs = 30;
        store.set_targets(vec![instance.clone()]);
        let scheduler = scheduler(&store, FakeDriver::with_delay(Duration::ZERO), Duration::from_secs(1));

        scheduler.start();
        let report: IngestReport = serde_json::from_str(r#"{"instance_id":7,"cpu_usage":12.5}"#).unwrap();
        scheduler
            .submit_outcome(&instance, outcome_from_report(report, Utc::now()))
            .await;

        tokio::time::sleep(Duration::from_secs(89)).await;
        assert!(store.alerts().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let alerts = store.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Triggered);
        assert_eq!(alerts[0].metric, "agent_heartbeat");

        let checks = store.checks_for(7);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].outcome.status, CheckStatus::Up);
        assert_eq!(checks[1].outcome.status, CheckStatus::Down);
        assert_eq!(checks[1].outcome.error.as_deref(), Some(NO_AGENT_REPORT));
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_drops_ticks() {
        let store = Arc::new(MemoryStore::new());
        store.set_targets(vec![tcp_target(1, 10), tcp_target(2, 10)]);
        let driver = FakeDriver::with_delay(Duration::from_secs(30));
        let scheduler = scheduler_with_pool(&store, driver.clone(), Duration::from_secs(60), 1);

        scheduler.start();
        // Both targets come due inside the first interval; only one gets the slot.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(driver.calls.lock().unwrap().len(), 1);
        assert!(store.checks().is_empty());
        scheduler.stop(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_does_not_stall_other_targets() {
        let store = Arc::new(MemoryStore::new());
        let mut instance = Target::new(7, "db-host", TargetParams::Instance(InstanceParams::default()));
        instance.interval_secs = u64::MAX;
        let mut slow = tcp_target(3, 1);
        slow.interval_secs = u64::MAX;
        store.set_targets(vec![instance, slow, tcp_target(1, 1)]);
        let driver = FakeDriver::with_delay(Duration::ZERO);
        let scheduler = scheduler(&store, driver.clone(), Duration::from_secs(1));

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        let calls = driver.calls_for(1);
        assert!(calls >= 8, "1s target probed {} times", calls);
        assert!(store.alerts().is_empty());
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_instance_outcomes_keep_state_in_append_order() {
        let store = Arc::new(MemoryStore::new());
        let instance = Target::new(7, "db-host", TargetParams::Instance(InstanceParams::default()));
        store.set_targets(vec![instance.clone()]);
        let scheduler = Arc::new(scheduler(&store, FakeDriver::with_delay(Duration::ZERO), Duration::from_secs(1)));

        let mut tasks = Vec::new();
        for i in 0..200 {
            let scheduler = scheduler.clone();
            let target = instance.clone();
            tasks.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    // Same path the silence sweep takes.
                    let slot = scheduler.shared.slot(target.id);
                    let outcome = silence_outcome(target.id, Utc::now());
                    scheduler.shared.complete(&target, &slot, outcome).await;
                } else {
                    let report: IngestReport =
                        serde_json::from_str(r#"{"instance_id":7,"cpu_usage":3.0}"#).unwrap();
                    scheduler
                        .submit_outcome(&target, outcome_from_report(report, Utc::now()))
                        .await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let checks = store.checks_for(7);
        assert_eq!(checks.len(), 200);
        let live = scheduler.tracker().snapshot(7).unwrap();
        let rebuilt = TargetState::replay(checks.iter().map(|c| &c.outcome), Thresholds::default());
        assert_eq!(live.last_status, Some(checks[199].outcome.status));
        assert_eq!(live.last_status, rebuilt.last_status);
        assert_eq!(live.consecutive_failures, rebuilt.consecutive_failures);
        assert_eq!(live.consecutive_successes, rebuilt.consecutive_successes);
        assert_eq!(live.health, rebuilt.health);
    }
}
