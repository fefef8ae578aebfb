//! Per-target tick bookkeeping for the dispatch loop.

use crate::db::{TargetId, MAX_INTERVAL};

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEntry {
    pub interval: Duration,
    pub next_fire: Instant,
}

/// What a reconcile pass changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: Vec<TargetId>,
    pub removed: Vec<TargetId>,
    pub retimed: Vec<TargetId>,
}

/// Next-fire times for every actively probed target.
#[derive(Debug, Default)]
pub struct TickTable {
    entries: HashMap<TargetId, TickEntry>,
}

impl TickTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the table in line with the current `(id, interval)` set.
    ///
    /// New entries get `now + jitter(interval)`; existing entries keep their
    /// phase, but a shortened interval pulls the next fire in to at most
    /// `now + interval`.
    pub fn reconcile<J>(&mut self, targets: &[(TargetId, Duration)], now: Instant, mut jitter: J) -> Reconciled
    where
        J: FnMut(Duration) -> Duration,
    {
        let mut result = Reconciled::default();
        let wanted: HashMap<TargetId, Duration> = targets.iter().copied().collect();

        self.entries.retain(|id, _| {
            let keep = wanted.contains_key(id);
            if !keep {
                result.removed.push(*id);
            }
            keep
        });

        for (&id, &interval) in &wanted {
            let interval = interval.clamp(Duration::from_millis(1), MAX_INTERVAL);
            match self.entries.get_mut(&id) {
                Some(entry) if entry.interval != interval => {
                    entry.interval = interval;
                    entry.next_fire = entry.next_fire.min(now + interval);
                    result.retimed.push(id);
                }
                Some(_) => {}
                None => {
                    let offset = jitter(interval).min(interval);
                    self.entries.insert(
                        id,
                        TickEntry {
                            interval,
                            next_fire: now + offset,
                        },
                    );
                    result.added.push(id);
                }
            }
        }

        result.added.sort_unstable();
        result.removed.sort_unstable();
        result.retimed.sort_unstable();
        result
    }

    /// Targets whose next fire is at or before `now`.
    pub fn due(&self, now: Instant) -> Vec<TargetId> {
        let mut due: Vec<TargetId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_fire <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();
        due
    }

    /// Move an entry one interval past its scheduled fire time.
    ///
    /// If that is still not in the future the entry snaps to the next future
    /// multiple of its interval, so a stalled clock never produces a backlog.
    pub fn advance(&mut self, id: TargetId, now: Instant) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let scheduled = entry.next_fire;
        let mut next = scheduled + entry.interval;
        if next <= now {
            let behind = now.duration_since(scheduled).as_nanos();
            let step = entry.interval.as_nanos().max(1);
            let periods = (behind / step + 1).min(u32::MAX as u128) as u32;
            next = scheduled + entry.interval * periods;
            if next <= now {
                next = now + entry.interval;
            }
        }
        entry.next_fire = next;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.next_fire).min()
    }

    pub fn get(&self, id: TargetId) -> Option<&TickEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Uniform start offset in `[0, interval)`.
pub fn random_jitter(interval: Duration) -> Duration {
    let nanos = interval.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::random::<u64>() % nanos)
}
