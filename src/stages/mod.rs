//! Stage stations and the shared worker loop that drives them.

pub mod intake;
pub mod label;
pub mod load;
pub mod pack;
pub mod pick;
pub mod sort;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::channel::Channel;
use crate::config::PipelineConfig;
use crate::container::Container;
use crate::dice::Dice;
use crate::error::{PipelineError, Result};
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::{CancelToken, RunFlag};
use crate::order::Order;
use crate::reject::RejectSink;
use crate::stats::PipelineStats;

pub use intake::IntakeStation;
pub use label::LabelStation;
pub use load::{LoadReport, Loader, LoaderState};
pub use pack::PackStation;
pub use pick::PickStation;
pub use sort::{FlushReport, SortingArea};

/// What a stage decided about one order.
#[derive(Debug)]
pub enum Verdict {
    Passed(Order),
    Rejected(Order),
}

impl Verdict {
    pub fn order(&self) -> &Order {
        match self {
            Verdict::Passed(order) | Verdict::Rejected(order) => order,
        }
    }

    pub fn into_passed(self) -> Option<Order> {
        match self {
            Verdict::Passed(order) => Some(order),
            Verdict::Rejected(_) => None,
        }
    }
}

/// A stage that transforms one order at a time.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, order: Order) -> Result<Verdict>;
}

/// Collaborators every station needs.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub dice: Arc<dyn Dice>,
    pub cancel: Arc<CancelToken>,
    pub stats: Arc<PipelineStats>,
}

impl StageContext {
    pub fn new(
        config: Arc<PipelineConfig>,
        dice: Arc<dyn Dice>,
        cancel: Arc<CancelToken>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            dice,
            cancel,
            stats,
        }
    }

    /// Scaled base delay plus scaled jitter.
    pub fn delay(&self, base_ms: u64, jitter_ms: u64) -> Duration {
        self.dice
            .delay(self.config.scaled(base_ms), self.config.scaled(jitter_ms))
    }

    /// Simulated work; returns early with `Cancelled` on hard shutdown.
    pub fn work(&self, base_ms: u64, jitter_ms: u64) -> Result<()> {
        self.cancel.pause(self.delay(base_ms, jitter_ms))
    }
}

/// Pause-before-dequeue gate driven by the load channel depth.
pub struct Backpressure {
    downstream: Arc<Channel<Container>>,
    threshold: usize,
    pause: Duration,
}

impl Backpressure {
    pub fn new(downstream: Arc<Channel<Container>>, threshold: usize, pause: Duration) -> Self {
        Self {
            downstream,
            threshold,
            pause,
        }
    }

    pub fn engaged(&self) -> bool {
        self.downstream.len() >= self.threshold
    }
}

/// Channel plumbing around a [`Stage`].
pub struct StageWorker<S: Stage> {
    pub name: String,
    pub stage: Arc<S>,
    pub input: Arc<Channel<Order>>,
    pub output: Arc<Channel<Order>>,
    pub rejects: Arc<RejectSink>,
    pub running: RunFlag,
    pub health: Arc<HealthMonitor>,
    pub backpressure: Option<Backpressure>,
    pub ctx: StageContext,
}

impl<S: Stage + 'static> StageWorker<S> {
    /// Poll, process, and route orders until the run flag drops.
    pub fn run(&self) -> Result<()> {
        self.health.register(&self.name);
        let poll = self.ctx.config.poll_timeout();
        while self.running.is_running() {
            self.health.heartbeat(&self.name);
            if let Some(gate) = &self.backpressure {
                if gate.engaged() {
                    PipelineStats::incr(&self.ctx.stats.backpressure_pauses);
                    debug!(worker = %self.name, "load backlog above threshold, pausing");
                    self.ctx.cancel.pause(gate.pause)?;
                    continue;
                }
            }
            let Some(order) = self.input.poll(poll) else {
                continue;
            };
            let id = order.id();
            match self.stage.process(order) {
                Ok(Verdict::Passed(order)) => self.output.offer(order),
                Ok(Verdict::Rejected(order)) => self.rejects.submit(order),
                Err(PipelineError::Cancelled) => {
                    PipelineStats::incr(&self.ctx.stats.abandoned);
                    warn!(worker = %self.name, order = id, "cancelled with order in flight");
                    return Err(PipelineError::Cancelled);
                }
                Err(err) => {
                    PipelineStats::incr(&self.ctx.stats.abandoned);
                    PipelineStats::incr(&self.ctx.stats.system_faults);
                    error!(worker = %self.name, order = id, error = %err, "stage fault, order dropped");
                }
            }
        }
        self.health.retire(&self.name);
        Ok(())
    }

    pub fn spawn(self) -> Result<thread::JoinHandle<Result<()>>> {
        let name = self.name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|source| PipelineError::Spawn { name, source })
    }
}
