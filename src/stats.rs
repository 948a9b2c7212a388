//! Lock-free pipeline counters and their serializable snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::container::DepartureRecord;
use crate::types::{Region, RejectReason};

/// Counters any worker may bump without taking a lock.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub verified: AtomicU64,
    pub picked: AtomicU64,
    pub packed: AtomicU64,
    pub labelled: AtomicU64,
    pub sorted: AtomicU64,
    pub backpressure_pauses: AtomicU64,
    pub containers_created: AtomicU64,
    pub containers_promoted: AtomicU64,
    pub containers_loaded: AtomicU64,
    pub carriers_created: AtomicU64,
    pub carriers_departed: AtomicU64,
    pub carriers_force_departed: AtomicU64,
    pub orders_dispatched: AtomicU64,
    pub breakdowns: AtomicU64,
    pub repairs: AtomicU64,
    pub abandoned: AtomicU64,
    pub system_faults: AtomicU64,
    latency_total_ms: AtomicU64,
    dwell_total_ms: AtomicU64,
    first_load_wait_total_ms: AtomicU64,
    rejected: [AtomicU64; RejectReason::ALL.len()],
    regions: [AtomicU64; Region::ALL.len()],
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        bump(counter);
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, reason: RejectReason) {
        bump(&self.rejected[reason.index()]);
    }

    pub fn rejections(&self, reason: RejectReason) -> u64 {
        self.rejected[reason.index()].load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Record an order leaving Sort; `latency` runs from creation.
    pub fn record_sorted(&self, region: Region, latency: Duration) {
        bump(&self.sorted);
        bump(&self.regions[region.index()]);
        self.latency_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_departure(&self, record: &DepartureRecord) {
        if record.forced {
            bump(&self.carriers_force_departed);
        } else {
            bump(&self.carriers_departed);
        }
        Self::add(&self.orders_dispatched, record.orders as u64);
        self.dwell_total_ms
            .fetch_add(record.dwell.as_millis() as u64, Ordering::Relaxed);
        if let Some(wait) = record.wait_for_first_load {
            self.first_load_wait_total_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let sorted = load(&self.sorted);
        let departures = load(&self.carriers_departed) + load(&self.carriers_force_departed);
        let average = |total: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            }
        };

        StatsSnapshot {
            received: load(&self.received),
            verified: load(&self.verified),
            picked: load(&self.picked),
            packed: load(&self.packed),
            labelled: load(&self.labelled),
            sorted,
            rejected_total: self.total_rejected(),
            rejected: RejectReason::ALL
                .iter()
                .map(|reason| (reason.as_str(), self.rejections(*reason)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            backpressure_pauses: load(&self.backpressure_pauses),
            containers_created: load(&self.containers_created),
            containers_promoted: load(&self.containers_promoted),
            containers_loaded: load(&self.containers_loaded),
            carriers_created: load(&self.carriers_created),
            carriers_departed: load(&self.carriers_departed),
            carriers_force_departed: load(&self.carriers_force_departed),
            orders_dispatched: load(&self.orders_dispatched),
            breakdowns: load(&self.breakdowns),
            repairs: load(&self.repairs),
            abandoned: load(&self.abandoned),
            system_faults: load(&self.system_faults),
            avg_order_latency_ms: average(load(&self.latency_total_ms), sorted),
            avg_carrier_dwell_ms: average(load(&self.dwell_total_ms), departures),
            avg_first_load_wait_ms: average(load(&self.first_load_wait_total_ms), departures),
            regions: Region::ALL
                .iter()
                .map(|region| (format!("{region:?}"), load(&self.regions[region.index()])))
                .collect(),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub verified: u64,
    pub picked: u64,
    pub packed: u64,
    pub labelled: u64,
    pub sorted: u64,
    pub rejected_total: u64,
    pub rejected: BTreeMap<&'static str, u64>,
    pub backpressure_pauses: u64,
    pub containers_created: u64,
    pub containers_promoted: u64,
    pub containers_loaded: u64,
    pub carriers_created: u64,
    pub carriers_departed: u64,
    pub carriers_force_departed: u64,
    pub orders_dispatched: u64,
    pub breakdowns: u64,
    pub repairs: u64,
    pub abandoned: u64,
    pub system_faults: u64,
    pub avg_order_latency_ms: f64,
    pub avg_carrier_dwell_ms: f64,
    pub avg_first_load_wait_ms: f64,
    pub regions: BTreeMap<String, u64>,
}
