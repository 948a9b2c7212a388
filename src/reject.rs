//! Asynchronous consumer for rejected orders.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::channel::Channel;
use crate::error::{PipelineError, Result};
use crate::lifecycle::{CancelToken, RunFlag};
use crate::order::Order;
use crate::stats::PipelineStats;

/// Decouples rejection bookkeeping from the stage that rejected the order.
///
/// [`RejectSink::submit`] never blocks; a dedicated thread counts and logs
/// each rejection at its own pace.
pub struct RejectSink {
    queue: Channel<Order>,
    stats: Arc<PipelineStats>,
    cancel: Arc<CancelToken>,
    running: RunFlag,
    handling: Duration,
    poll: Duration,
    grace: Duration,
}

impl RejectSink {
    pub fn new(
        stats: Arc<PipelineStats>,
        cancel: Arc<CancelToken>,
        handling: Duration,
        poll: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            queue: Channel::new("rejects"),
            stats,
            cancel,
            running: RunFlag::new(),
            handling,
            poll,
            grace,
        }
    }

    /// Hand a rejected order over. The order must already carry its reason.
    pub fn submit(&self, order: Order) {
        match order.rejection() {
            Some(reason) => warn!(order = order.id(), reason = reason.as_str(), "order rejected"),
            None => error!(order = order.id(), status = ?order.status(), "non-rejected order sent to reject sink"),
        }
        self.queue.offer(order);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn running(&self) -> &RunFlag {
        &self.running
    }

    /// Request a cooperative stop; the worker drains for at most `grace`.
    pub fn stop(&self) {
        self.running.stop();
    }

    fn handle(&self, order: Order) -> Result<()> {
        self.cancel.pause(self.handling)?;
        match order.rejection() {
            Some(reason) => {
                self.stats.record_rejection(reason);
                info!(order = order.id(), reason = reason.as_str(), "rejection recorded");
            }
            None => {
                PipelineStats::incr(&self.stats.system_faults);
                error!(order = order.id(), "dropping order without rejection reason");
            }
        }
        Ok(())
    }

    /// Worker loop: consume until stopped, then drain within the grace period.
    pub fn run(&self) -> Result<()> {
        while self.running.is_running() {
            if let Some(order) = self.queue.poll(self.poll) {
                self.handle(order)?;
            }
        }
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            match self.queue.try_poll() {
                Some(order) => self.handle(order)?,
                None => break,
            }
        }
        let left = self.queue.len();
        if left > 0 {
            warn!(pending = left, "reject sink stopped with pending rejections");
        }
        Ok(())
    }

    pub fn spawn(self: &Arc<Self>) -> Result<thread::JoinHandle<Result<()>>> {
        let sink = Arc::clone(self);
        let name = "reject-sink".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || sink.run())
            .map_err(|source| PipelineError::Spawn { name, source })
    }
}
