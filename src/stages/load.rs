//! Loading: puts containers onto trucks at the bays. Each loader can break
//! down and sits out a repair before its next attempt.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::StageContext;
use crate::channel::Channel;
use crate::container::{Container, LoadOutcome};
use crate::dice::Check;
use crate::dispatch::DispatchCoordinator;
use crate::error::{PipelineError, Result};
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::RunFlag;
use crate::stats::PipelineStats;
use crate::types::CarrierId;

/// Worker-local machine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Operational,
    Broken,
    Repairing,
}

#[derive(Debug)]
pub enum LoadReport {
    Loaded { carrier: CarrierId, departed: bool },
    /// Dispatch is paused; the caller still owns the container.
    Deferred(Container),
}

pub struct Loader {
    name: String,
    ctx: StageContext,
    dispatch: Arc<DispatchCoordinator>,
    state: LoaderState,
}

impl Loader {
    pub fn new(name: impl Into<String>, ctx: StageContext, dispatch: Arc<DispatchCoordinator>) -> Self {
        Self {
            name: name.into(),
            ctx,
            dispatch,
            state: LoaderState::Operational,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Roll for a breakdown and, if one happens, wait out the repair.
    pub fn maintain(&mut self) -> Result<()> {
        if !self.ctx.dice.fails(Check::Breakdown) {
            return Ok(());
        }
        self.state = LoaderState::Broken;
        PipelineStats::incr(&self.ctx.stats.breakdowns);
        warn!(loader = %self.name, "loader broke down");

        self.state = LoaderState::Repairing;
        self.ctx.work(self.ctx.config.timings.repair_ms, 0)?;
        self.state = LoaderState::Operational;
        PipelineStats::incr(&self.ctx.stats.repairs);
        info!(loader = %self.name, "loader repaired");
        Ok(())
    }

    pub fn load_container(&mut self, container: Container, queue_depth: usize) -> Result<LoadReport> {
        self.maintain()?;
        let Some(carrier) = self.dispatch.get_carrier_for_loading(queue_depth)? else {
            return Ok(LoadReport::Deferred(container));
        };

        let timings = &self.ctx.config.timings;
        if let Err(err) = self.ctx.work(timings.load_base_ms, timings.load_jitter_ms) {
            carrier.cancel_reservation();
            return Err(err);
        }

        let container_id = container.id();
        let orders = container.len();
        match carrier.load(container)? {
            LoadOutcome::Loaded { remaining } => {
                PipelineStats::incr(&self.ctx.stats.containers_loaded);
                debug!(loader = %self.name, container = container_id, carrier = carrier.id(), remaining, "container loaded");
                Ok(LoadReport::Loaded {
                    carrier: carrier.id(),
                    departed: false,
                })
            }
            LoadOutcome::Filled => {
                PipelineStats::incr(&self.ctx.stats.containers_loaded);
                debug!(loader = %self.name, container = container_id, carrier = carrier.id(), "truck full");
                // The container is on the truck either way; a full truck left
                // behind is sent off by `force_all_departure`.
                let departed = match self.dispatch.carrier_departed(&carrier) {
                    Ok(_) => true,
                    Err(err) => {
                        PipelineStats::incr(&self.ctx.stats.system_faults);
                        error!(loader = %self.name, carrier = carrier.id(), error = %err, "departure failed");
                        false
                    }
                };
                Ok(LoadReport::Loaded {
                    carrier: carrier.id(),
                    departed,
                })
            }
            LoadOutcome::Overflow(container) => {
                error!(
                    loader = %self.name,
                    container = container.id(),
                    carrier = carrier.id(),
                    orders,
                    "reserved carrier had no room"
                );
                PipelineStats::add(&self.ctx.stats.abandoned, orders as u64);
                PipelineStats::incr(&self.ctx.stats.system_faults);
                Err(PipelineError::CarrierOverflow {
                    carrier: carrier.id(),
                    container: container_id,
                })
            }
        }
    }

    /// Worker loop. A deferred container is retried until it loads or the
    /// run flag drops, in which case it goes back on the channel.
    pub fn run(&mut self, input: &Channel<Container>, running: &RunFlag, health: &HealthMonitor) -> Result<()> {
        health.register(&self.name);
        let poll = self.ctx.config.poll_timeout();
        let retry = self
            .ctx
            .config
            .scaled_wait(self.ctx.config.dispatch_retry_ms, Duration::from_millis(1));
        while running.is_running() {
            health.heartbeat(&self.name);
            let Some(mut container) = input.poll(poll) else {
                continue;
            };
            loop {
                let held = container.len() as u64;
                match self.load_container(container, input.len()) {
                    Ok(LoadReport::Loaded { .. }) => break,
                    Ok(LoadReport::Deferred(back)) => {
                        if !running.is_running() {
                            input.offer(back);
                            break;
                        }
                        health.heartbeat(&self.name);
                        if let Err(err) = self.ctx.cancel.pause(retry) {
                            PipelineStats::add(&self.ctx.stats.abandoned, back.len() as u64);
                            return Err(err);
                        }
                        container = back;
                    }
                    Err(PipelineError::Cancelled) => {
                        PipelineStats::add(&self.ctx.stats.abandoned, held);
                        warn!(loader = %self.name, orders = held, "cancelled with container in hand");
                        return Err(PipelineError::Cancelled);
                    }
                    // Overflow already counted its orders.
                    Err(err @ PipelineError::CarrierOverflow { .. }) => {
                        error!(loader = %self.name, error = %err, "load fault");
                        break;
                    }
                    Err(err) => {
                        PipelineStats::add(&self.ctx.stats.abandoned, held);
                        PipelineStats::incr(&self.ctx.stats.system_faults);
                        error!(loader = %self.name, orders = held, error = %err, "load fault, container dropped");
                        break;
                    }
                }
            }
        }
        health.retire(&self.name);
        Ok(())
    }

    pub fn spawn(
        mut self,
        input: Arc<Channel<Container>>,
        running: RunFlag,
        health: Arc<HealthMonitor>,
    ) -> Result<thread::JoinHandle<Result<()>>> {
        let name = self.name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(&input, &running, &health))
            .map_err(|source| PipelineError::Spawn { name, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, Timings};
    use crate::stages::testing::{context, context_with, order_at};
    use crate::types::OrderStatus;

    fn container(id: u64, orders: u64) -> Container {
        let mut container = Container::new(id, 30);
        for n in 0..orders {
            container
                .add(order_at(id * 100 + n, OrderStatus::Sorted))
                .expect("room");
        }
        container
    }

    fn dispatch_for(ctx: &StageContext, bays: usize, capacity: usize) -> Arc<DispatchCoordinator> {
        Arc::new(DispatchCoordinator::new(
            bays,
            capacity,
            Arc::clone(&ctx.cancel),
            Arc::clone(&ctx.stats),
        ))
    }

    #[test]
    fn filling_load_departs_the_truck() {
        let ctx = context(&[]);
        let dispatch = dispatch_for(&ctx, 1, 2);
        let mut loader = Loader::new("loader-1", ctx.clone(), Arc::clone(&dispatch));

        let first = loader.load_container(container(1, 3), 0).expect("load");
        assert!(matches!(first, LoadReport::Loaded { departed: false, .. }));
        let second = loader.load_container(container(2, 2), 0).expect("load");
        assert!(matches!(second, LoadReport::Loaded { departed: true, .. }));

        let records = dispatch.departures();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].orders, 5);
        assert_eq!(dispatch.available_bays(), 1);
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.containers_loaded, 2);
        assert_eq!(stats.orders_dispatched, 5);
    }

    #[test]
    fn breakdown_is_repaired_before_loading() {
        let ctx = context(&[Check::Breakdown]);
        let dispatch = dispatch_for(&ctx, 1, 5);
        let mut loader = Loader::new("loader-2", ctx.clone(), dispatch);
        loader.load_container(container(1, 1), 0).expect("load");
        assert_eq!(loader.state(), LoaderState::Operational);
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.breakdowns, 1);
        assert_eq!(stats.repairs, 1);
    }

    #[test]
    fn paused_dispatch_defers_container() {
        let ctx = context(&[]);
        let dispatch = dispatch_for(&ctx, 1, 5);
        dispatch.pause();
        let mut loader = Loader::new("loader-3", ctx, Arc::clone(&dispatch));
        let report = loader.load_container(container(4, 2), 0).expect("load");
        match report {
            LoadReport::Deferred(back) => assert_eq!(back.len(), 2),
            other => panic!("expected deferral, got {other:?}"),
        }
        assert_eq!(dispatch.active_carriers(), 0);
    }

    #[test]
    fn cancelled_load_returns_reservation() {
        let config = PipelineConfig {
            timings: Timings {
                time_scale: 1.0,
                load_base_ms: 10_000,
                ..Timings::default()
            },
            ..PipelineConfig::default()
        };
        let ctx = context_with(config, &[]);
        let dispatch = dispatch_for(&ctx, 1, 5);
        let cancel = Arc::clone(&ctx.cancel);
        let worker = {
            let dispatch = Arc::clone(&dispatch);
            thread::spawn(move || {
                let mut loader = Loader::new("loader-4", ctx, dispatch);
                loader.load_container(container(5, 1), 0).map(|_| ())
            })
        };
        while dispatch.active_carriers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        cancel.cancel();
        let result = worker.join().expect("loader panicked");
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        let views = dispatch.carriers().expect("views");
        assert_eq!(views[0].reserved, 0);
        assert_eq!(views[0].containers, 0);
    }

    #[test]
    fn run_loop_loads_until_stopped() {
        let ctx = context(&[]);
        let dispatch = dispatch_for(&ctx, 2, 2);
        let input = Arc::new(Channel::new("load"));
        for id in 1..=3 {
            input.offer(container(id, 1));
        }
        let running = RunFlag::new();
        let health = Arc::new(HealthMonitor::new());
        let handle = Loader::new("loader-5", ctx.clone(), Arc::clone(&dispatch))
            .spawn(Arc::clone(&input), running.clone(), Arc::clone(&health))
            .expect("spawn");
        while !input.is_empty() || ctx.stats.snapshot().containers_loaded < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        running.stop();
        handle.join().expect("loader panicked").expect("run");

        assert_eq!(health.tracked(), 0);
        assert_eq!(dispatch.force_all_departure().expect("drain"), 1);
        let records = dispatch.departures();
        assert_eq!(records.len(), 2);
        // The half-loaded truck only leaves at shutdown.
        assert_eq!(records.iter().filter(|r| r.forced).count(), 1);
    }

    #[test]
    fn faulty_container_is_counted_as_abandoned() {
        let ctx = context(&[]);
        let dispatch = dispatch_for(&ctx, 1, 5);
        let input = Arc::new(Channel::new("load"));
        // Orders that skipped sorting cannot be marked loaded.
        let mut unsorted = Container::new(1, 30);
        for n in 0..2 {
            unsorted
                .add(order_at(n, OrderStatus::Labelled))
                .expect("room");
        }
        input.offer(unsorted);
        input.offer(container(2, 1));

        let running = RunFlag::new();
        let handle = Loader::new("loader-6", ctx.clone(), Arc::clone(&dispatch))
            .spawn(Arc::clone(&input), running.clone(), Arc::new(HealthMonitor::new()))
            .expect("spawn");
        while !input.is_empty() || ctx.stats.snapshot().containers_loaded < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        running.stop();
        handle.join().expect("loader panicked").expect("run");

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.system_faults, 1);
        assert_eq!(stats.containers_loaded, 1);
        let views = dispatch.carriers().expect("views");
        assert_eq!(views[0].reserved, 0);
        assert_eq!(views[0].containers, 1);
    }
}
