//! Sorting: groups labelled orders into batches, assigns regions, and fills
//! containers for the loading dock.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info};

use super::StageContext;
use crate::channel::Channel;
use crate::container::Container;
use crate::error::{PipelineError, Result};
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::RunFlag;
use crate::order::Order;
use crate::pool::Exclusive;
use crate::stats::PipelineStats;
use crate::types::{ContainerId, OrderStatus, Region};

struct SortState {
    batch: Vec<Order>,
    current: Option<Container>,
    next_container: ContainerId,
    batches: u64,
    promoted: u64,
}

/// What a flush pushed downstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub drained: usize,
    pub promoted: usize,
}

pub struct SortingArea {
    ctx: StageContext,
    state: Exclusive<SortState>,
    load: Arc<Channel<Container>>,
}

impl SortingArea {
    pub fn new(ctx: StageContext, load: Arc<Channel<Container>>) -> Self {
        let batch_size = ctx.config.batch_size;
        Self {
            ctx,
            state: Exclusive::new(
                "sorting",
                SortState {
                    batch: Vec::with_capacity(batch_size),
                    current: None,
                    next_container: 1,
                    batches: 0,
                    promoted: 0,
                },
            ),
            load,
        }
    }

    pub fn batch_len(&self) -> Result<usize> {
        Ok(self.state.enter()?.batch.len())
    }

    /// Orders sitting in the open, not yet promoted container.
    pub fn current_len(&self) -> Result<usize> {
        Ok(self.state.enter()?.current.as_ref().map_or(0, Container::len))
    }

    pub fn batches_drained(&self) -> Result<u64> {
        Ok(self.state.enter()?.batches)
    }

    pub fn sort_unit(&self, mut order: Order) -> Result<()> {
        self.ctx.work(self.ctx.config.timings.sort_per_unit_ms, 0)?;
        let region = Region::for_order(order.id());
        order.region = Some(region);
        debug!(order = order.id(), ?region, "sorted into region");

        let mut state = self.state.enter()?;
        state.batch.push(order);
        if state.batch.len() >= self.ctx.config.batch_size {
            self.drain_batch(&mut state)?;
        }
        Ok(())
    }

    fn promote(&self, container: Container) {
        PipelineStats::incr(&self.ctx.stats.containers_promoted);
        info!(
            container = container.id(),
            orders = container.len(),
            backlog = self.load.len() + 1,
            "container sent to loading"
        );
        self.load.offer(container);
    }

    fn drain_batch(&self, state: &mut SortState) -> Result<()> {
        if state.batch.is_empty() {
            return Ok(());
        }
        state.batches += 1;
        let batch = std::mem::take(&mut state.batch);
        let mut failure = None;

        for mut order in batch {
            if let Err(err) = order.advance(OrderStatus::Sorted) {
                error!(order = order.id(), error = %err, "order dropped in sorting");
                PipelineStats::incr(&self.ctx.stats.abandoned);
                PipelineStats::incr(&self.ctx.stats.system_faults);
                failure.get_or_insert(err);
                continue;
            }

            // Opened lazily so an unused container is never counted.
            let capacity = self.ctx.config.container_capacity;
            let container = state.current.get_or_insert_with(|| {
                let id = state.next_container;
                state.next_container += 1;
                PipelineStats::incr(&self.ctx.stats.containers_created);
                debug!(container = id, "opened container");
                Container::new(id, capacity)
            });
            let container_id = container.id();
            let region = order.region.unwrap_or_else(|| Region::for_order(order.id()));
            let latency = order.created_at().elapsed();
            if let Err(order) = container.add(order) {
                error!(
                    order = order.id(),
                    container = container_id,
                    "no room in container that reported free space"
                );
                PipelineStats::incr(&self.ctx.stats.abandoned);
                PipelineStats::incr(&self.ctx.stats.system_faults);
                failure.get_or_insert(PipelineError::CapacityAccounting {
                    container: container_id,
                    order: order.id(),
                });
                continue;
            }
            self.ctx.stats.record_sorted(region, latency);

            if container.is_full() {
                if let Some(full) = state.current.take() {
                    state.promoted += 1;
                    self.promote(full);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drain a partial batch and promote a non-empty open container.
    /// Calling it again with nothing new sorted does nothing.
    pub fn flush_remaining(&self) -> Result<FlushReport> {
        let mut state = self.state.enter()?;
        let drained = state.batch.len();
        let promoted_before = state.promoted;
        self.drain_batch(&mut state)?;

        match state.current.take() {
            Some(container) if !container.is_empty() => {
                state.promoted += 1;
                self.promote(container);
            }
            Some(empty) => {
                // Never used; do not report it as created.
                self.ctx.stats.containers_created.fetch_sub(1, Ordering::Relaxed);
                debug!(container = empty.id(), "discarded empty container");
            }
            None => {}
        }

        let promoted = (state.promoted - promoted_before) as usize;
        if drained > 0 || promoted > 0 {
            info!(drained, promoted, "sorting flushed");
        }
        Ok(FlushReport { drained, promoted })
    }

    /// Worker loop. Flushes once the run flag drops.
    pub fn run(
        &self,
        input: &Channel<Order>,
        running: &RunFlag,
        health: &HealthMonitor,
    ) -> Result<FlushReport> {
        let name = "sorter";
        health.register(name);
        let poll = self.ctx.config.poll_timeout();
        while running.is_running() {
            health.heartbeat(name);
            let Some(order) = input.poll(poll) else {
                continue;
            };
            let id = order.id();
            match self.sort_unit(order) {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => {
                    PipelineStats::incr(&self.ctx.stats.abandoned);
                    return Err(PipelineError::Cancelled);
                }
                // Faults inside a batch were already counted per order.
                Err(err) => error!(order = id, error = %err, "sorting fault"),
            }
        }
        health.retire(name);
        self.flush_remaining()
    }

    pub fn spawn(
        self: &Arc<Self>,
        input: Arc<Channel<Order>>,
        running: RunFlag,
        health: Arc<HealthMonitor>,
    ) -> Result<thread::JoinHandle<Result<FlushReport>>> {
        let area = Arc::clone(self);
        let name = "sorter".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || area.run(&input, &running, &health))
            .map_err(|source| PipelineError::Spawn { name, source })
    }
}
