//! Loading bays and the trucks parked at them.
//!
//! The coordinator owns the registry of active carriers. Every registry
//! mutation happens inside one critical section; a carrier's bay permit lives
//! in the registry entry, so removing the entry is what frees the bay.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::container::{Carrier, CarrierView, DepartureRecord};
use crate::error::{PipelineError, Result};
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::{CancelToken, RunFlag};
use crate::pool::{Exclusive, Limiter, Permit};
use crate::stats::PipelineStats;
use crate::types::{CarrierId, CarrierStatus};

struct Bay {
    carrier: Arc<Carrier>,
    _permit: Permit,
}

#[derive(Default)]
struct Registry {
    active: BTreeMap<CarrierId, Bay>,
}

/// Lock-free view for monitoring.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct DispatchSnapshot {
    pub active_carriers: usize,
    pub available_bays: usize,
    pub waiting_loaders: usize,
    pub carriers_created: u64,
    pub departed: u64,
    pub released_empty: u64,
    pub paused: bool,
}

pub struct DispatchCoordinator {
    bays: Limiter,
    registry: Exclusive<Registry>,
    carrier_capacity: usize,
    next_carrier: AtomicU64,
    waiting: AtomicUsize,
    active: AtomicUsize,
    departed: AtomicU64,
    released_empty: AtomicU64,
    paused: AtomicBool,
    departures: Mutex<Vec<DepartureRecord>>,
    cancel: Arc<CancelToken>,
    stats: Arc<PipelineStats>,
}

impl DispatchCoordinator {
    pub fn new(
        bays: usize,
        carrier_capacity: usize,
        cancel: Arc<CancelToken>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            bays: Limiter::new("bays", bays),
            registry: Exclusive::new("carrier-registry", Registry::default()),
            carrier_capacity,
            next_carrier: AtomicU64::new(1),
            waiting: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            departed: AtomicU64::new(0),
            released_empty: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            departures: Mutex::new(Vec::new()),
            cancel,
            stats,
        }
    }

    /// Stop handing out carriers; loaders keep their containers and retry.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("dispatch paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("dispatch resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn register(&self, registry: &mut Registry, permit: Permit, queue_depth: usize) -> Arc<Carrier> {
        let id = self.next_carrier.fetch_add(1, Ordering::SeqCst);
        let carrier = Arc::new(Carrier::new(id, self.carrier_capacity));
        // A fresh carrier always has room for the caller's slot.
        let reserved = carrier.try_reserve();
        debug_assert!(reserved, "new carrier {id} refused its first reservation");
        registry.active.insert(
            id,
            Bay {
                carrier: Arc::clone(&carrier),
                _permit: permit,
            },
        );
        self.active.fetch_add(1, Ordering::SeqCst);
        PipelineStats::incr(&self.stats.carriers_created);
        info!(
            carrier = id,
            destination = carrier.destination(),
            queue_depth,
            bays_free = self.bays.available(),
            "truck arrived at bay"
        );
        carrier
    }

    /// Find a carrier with a free slot and reserve that slot for the caller.
    ///
    /// Reuses an active carrier when one has room, otherwise opens a bay.
    /// When every bay is taken the registry is released before blocking on
    /// the bay limiter. Returns `None` while dispatch is paused.
    pub fn get_carrier_for_loading(&self, queue_depth: usize) -> Result<Option<Arc<Carrier>>> {
        if self.is_paused() {
            return Ok(None);
        }
        {
            let mut registry = self.registry.enter()?;
            if let Some(bay) = registry
                .active
                .values()
                .find(|bay| bay.carrier.try_reserve())
            {
                return Ok(Some(Arc::clone(&bay.carrier)));
            }
            if let Some(permit) = self.bays.try_acquire() {
                return Ok(Some(self.register(&mut registry, permit, queue_depth)));
            }
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        debug!(queue_depth, "all bays occupied, waiting");
        let permit = self.bays.acquire(&self.cancel);
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let permit = permit?;

        let mut registry = self.registry.enter()?;
        Ok(Some(self.register(&mut registry, permit, queue_depth)))
    }

    // Caller holds the registry. Dropping the removed bay frees its permit.
    fn retire(
        &self,
        registry: &mut Registry,
        id: CarrierId,
        forced: bool,
    ) -> Result<Option<DepartureRecord>> {
        let Some(bay) = registry.active.remove(&id) else {
            return Ok(None);
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        let record = bay.carrier.depart(forced)?;
        drop(bay);
        self.departed.fetch_add(1, Ordering::SeqCst);
        self.stats.record_departure(&record);
        if forced {
            warn!(
                carrier = id,
                containers = record.containers,
                orders = record.orders,
                dwell = ?record.dwell,
                "truck force-departed"
            );
        } else {
            info!(
                carrier = id,
                containers = record.containers,
                orders = record.orders,
                dwell = ?record.dwell,
                "truck departed"
            );
        }
        self.departures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(Some(record))
    }

    /// Remove a full carrier from its bay and send it off.
    pub fn carrier_departed(&self, carrier: &Carrier) -> Result<DepartureRecord> {
        let mut registry = self.registry.enter()?;
        self.retire(&mut registry, carrier.id(), false)?
            .ok_or(PipelineError::UnknownCarrier {
                carrier: carrier.id(),
            })
    }

    /// Force out loaded carriers whose first container has waited at least
    /// `max_age`. Carriers with a loader mid-load are left alone.
    pub fn force_dispatch_old_trucks(&self, max_age: Duration) -> Result<usize> {
        let mut registry = self.registry.enter()?;
        let stale: Vec<CarrierId> = registry
            .active
            .values()
            .filter(|bay| {
                let view = bay.carrier.view();
                view.status == CarrierStatus::Loading
                    && view.containers > 0
                    && view.reserved == 0
                    && bay
                        .carrier
                        .first_loaded_at()
                        .is_some_and(|at| at.elapsed() >= max_age)
            })
            .map(|bay| bay.carrier.id())
            .collect();

        let mut forced = 0;
        for id in stale {
            if self.retire(&mut registry, id, true)?.is_some() {
                forced += 1;
            }
        }
        Ok(forced)
    }

    /// Shutdown drain: every loaded carrier leaves, empty ones just free
    /// their bay. Returns the number of carriers that departed.
    pub fn force_all_departure(&self) -> Result<usize> {
        let mut registry = self.registry.enter()?;
        let ids: Vec<CarrierId> = registry.active.keys().copied().collect();
        let mut departed = 0;
        for id in ids {
            let empty = registry
                .active
                .get(&id)
                .is_some_and(|bay| bay.carrier.container_count() == 0);
            if empty {
                registry.active.remove(&id);
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.released_empty.fetch_add(1, Ordering::SeqCst);
                debug!(carrier = id, "released empty truck");
            } else if self.retire(&mut registry, id, true)?.is_some() {
                departed += 1;
            }
        }
        if departed > 0 {
            info!(departed, "remaining trucks dispatched");
        }
        Ok(departed)
    }

    pub fn active_carriers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn available_bays(&self) -> usize {
        self.bays.available()
    }

    pub fn waiting_loaders(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            active_carriers: self.active_carriers(),
            available_bays: self.available_bays(),
            waiting_loaders: self.waiting_loaders(),
            carriers_created: self.next_carrier.load(Ordering::SeqCst) - 1,
            departed: self.departed.load(Ordering::SeqCst),
            released_empty: self.released_empty.load(Ordering::SeqCst),
            paused: self.is_paused(),
        }
    }

    /// Detailed per-carrier view. Takes the registry lock.
    pub fn carriers(&self) -> Result<Vec<CarrierView>> {
        Ok(self
            .registry
            .enter()?
            .active
            .values()
            .map(|bay| bay.carrier.view())
            .collect())
    }

    pub fn departures(&self) -> Vec<DepartureRecord> {
        self.departures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Periodic age sweep until `running` drops.
    pub fn run_sweeper(
        &self,
        running: &RunFlag,
        interval: Duration,
        max_age: Duration,
        health: &HealthMonitor,
    ) -> Result<usize> {
        let name = "dispatch-sweeper";
        health.register(name);
        let mut total = 0;
        while running.is_running() {
            health.heartbeat(name);
            let forced = self.force_dispatch_old_trucks(max_age)?;
            if forced > 0 {
                info!(forced, "age sweep dispatched waiting trucks");
            }
            total += forced;
            // Wake often enough to notice the stop flag.
            let step = interval.min(Duration::from_millis(100));
            let mut slept = Duration::ZERO;
            while slept < interval && running.is_running() {
                self.cancel.pause(step)?;
                slept += step;
            }
        }
        health.retire(name);
        Ok(total)
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        running: RunFlag,
        interval: Duration,
        max_age: Duration,
        health: Arc<HealthMonitor>,
    ) -> Result<thread::JoinHandle<Result<usize>>> {
        let dispatch = Arc::clone(self);
        let name = "dispatch-sweeper".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || dispatch.run_sweeper(&running, interval, max_age, &health))
            .map_err(|source| PipelineError::Spawn { name, source })
    }
}
