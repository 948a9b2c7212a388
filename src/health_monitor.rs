//! Heartbeat tracking and stall detection for stage workers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct HealthState {
    last_seen: HashMap<String, Instant>,
    stalled: BTreeSet<String>,
}

/// Tracks worker heartbeats and reports workers that stop reporting.
///
/// A loader under repair or a worker blocked on a bay stops heartbeating,
/// which is exactly what the supervisor wants to surface.
pub struct HealthMonitor {
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn overdue_workers(state: &HealthState, now: Instant, timeout: Duration) -> Vec<String> {
        state
            .last_seen
            .iter()
            .filter_map(|(worker, &last)| {
                if now.duration_since(last) > timeout {
                    Some(worker.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn new() -> Self {
        Self {
            state: Mutex::new(HealthState {
                last_seen: HashMap::new(),
                stalled: BTreeSet::new(),
            }),
        }
    }

    /// Ensure a worker is tracked; no-op if already registered.
    pub fn register(&self, worker: &str) {
        let mut guard = self.lock();
        guard
            .last_seen
            .entry(worker.to_string())
            .or_insert_with(Instant::now);
    }

    /// Record a heartbeat; clears any prior stall mark for the worker.
    pub fn heartbeat(&self, worker: &str) {
        let mut guard = self.lock();
        guard.last_seen.insert(worker.to_string(), Instant::now());
        guard.stalled.remove(worker);
    }

    /// Stop tracking a worker that exited its loop normally.
    pub fn retire(&self, worker: &str) {
        let mut guard = self.lock();
        guard.last_seen.remove(worker);
        guard.stalled.remove(worker);
    }

    /// Mark workers whose last heartbeat exceeds `timeout`; returns all
    /// currently stalled workers.
    pub fn detect_stalled(&self, timeout: Duration) -> BTreeSet<String> {
        let mut guard = self.lock();
        let now = Instant::now();
        // Collect overdue workers first to avoid mutating while iterating.
        let overdue = Self::overdue_workers(&guard, now, timeout);
        guard.stalled.extend(overdue);
        guard.stalled.clone()
    }

    /// Snapshot of the workers currently marked stalled.
    pub fn stalled_workers(&self) -> BTreeSet<String> {
        self.lock().stalled.clone()
    }

    pub fn tracked(&self) -> usize {
        self.lock().last_seen.len()
    }

    /// Test-only hook to set deterministic timestamps without sleeping.
    #[cfg(test)]
    fn set_last_seen_for_test(&self, worker: &str, instant: Instant) {
        self.lock().last_seen.insert(worker.to_string(), instant);
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
