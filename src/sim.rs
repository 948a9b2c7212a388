//! Pipeline assembly, the run driver, and the benchmark and stress runners.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::config::PipelineConfig;
use crate::container::Container;
use crate::dice::{Dice, SeededDice};
use crate::dispatch::{DispatchCoordinator, DispatchSnapshot};
use crate::error::{PipelineError, Result};
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::{CancelToken, RunFlag};
use crate::order::Order;
use crate::pool::Limiter;
use crate::reject::RejectSink;
use crate::stages::{
    self, Backpressure, FlushReport, IntakeStation, LabelStation, Loader, PackStation,
    PickStation, SortingArea, Stage, StageContext, StageWorker,
};
use crate::stats::{PipelineStats, StatsSnapshot};

// How often the driver re-checks drain and settle conditions.
const SETTLE_CHECK: Duration = Duration::from_millis(20);
// Floor for looping waits when the time scale is zero.
const MIN_WAIT: Duration = Duration::from_millis(5);
const SUPERVISOR_TICK: Duration = Duration::from_millis(100);

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data and getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// The inter-stage channels.
#[derive(Clone)]
struct Channels {
    pick: Arc<Channel<Order>>,
    pack: Arc<Channel<Order>>,
    label: Arc<Channel<Order>>,
    sort: Arc<Channel<Order>>,
    load: Arc<Channel<Container>>,
}

impl Channels {
    fn new() -> Self {
        Self {
            pick: Arc::new(Channel::new("pick")),
            pack: Arc::new(Channel::new("pack")),
            label: Arc::new(Channel::new("label")),
            sort: Arc::new(Channel::new("sort")),
            load: Arc::new(Channel::new("load")),
        }
    }

    fn depths(&self) -> BTreeMap<&'static str, usize> {
        BTreeMap::from([
            (self.pick.name(), self.pick.len()),
            (self.pack.name(), self.pack.len()),
            (self.label.name(), self.label.len()),
            (self.sort.name(), self.sort.len()),
            (self.load.name(), self.load.len()),
        ])
    }

    fn orders_queued(&self) -> usize {
        self.pick.len() + self.pack.len() + self.label.len() + self.sort.len()
    }
}

/// Threads of one stage sharing a stop flag.
struct WorkerGroup<T> {
    stage: &'static str,
    running: RunFlag,
    handles: Vec<JoinHandle<Result<T>>>,
}

impl<T> WorkerGroup<T> {
    fn new(stage: &'static str) -> Self {
        Self::with_flag(stage, RunFlag::new())
    }

    fn with_flag(stage: &'static str, running: RunFlag) -> Self {
        Self {
            stage,
            running,
            handles: Vec::new(),
        }
    }

    fn finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }
}

#[derive(Default)]
struct ShutdownLog {
    hard_cancelled: bool,
    worker_faults: usize,
}

/// Outcome of one pipeline run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub elapsed_ms: u64,
    pub generated: u64,
    pub stats: StatsSnapshot,
    pub dispatch: DispatchSnapshot,
    pub flush: FlushReport,
    pub swept: usize,
    pub forced_at_shutdown: usize,
    /// Channel depths left after shutdown.
    pub residual: BTreeMap<&'static str, usize>,
    pub pending_rejects: usize,
    pub stalled_workers: Vec<String>,
    pub worker_faults: usize,
    pub hard_cancelled: bool,
}

impl RunReport {
    /// Received orders that reached neither a truck nor the reject sink.
    pub fn unsettled(&self) -> u64 {
        self.stats.received.saturating_sub(
            self.stats.orders_dispatched + self.stats.rejected_total + self.stats.abandoned,
        )
    }

    pub fn is_clean(&self) -> bool {
        self.residual.values().all(|&depth| depth == 0)
            && self.pending_rejects == 0
            && self.stats.abandoned == 0
            && self.worker_faults == 0
            && !self.hard_cancelled
            && self.unsettled() == 0
    }

    pub fn summary(&self) -> String {
        let s = &self.stats;
        let mut lines = vec![
            "RUN SUMMARY".to_string(),
            format!("elapsed_ms={}", self.elapsed_ms),
            format!("received={} verified={} picked={} packed={} labelled={} sorted={}",
                s.received, s.verified, s.picked, s.packed, s.labelled, s.sorted),
            format!("rejected={}", s.rejected_total),
        ];
        for (reason, count) in &s.rejected {
            lines.push(format!("  {reason}={count}"));
        }
        lines.extend([
            format!(
                "containers created={} promoted={} loaded={}",
                s.containers_created, s.containers_promoted, s.containers_loaded
            ),
            format!(
                "carriers created={} departed={} force_departed={} released_empty={}",
                s.carriers_created,
                s.carriers_departed,
                s.carriers_force_departed,
                self.dispatch.released_empty
            ),
            format!("dispatched={}", s.orders_dispatched),
            format!("breakdowns={} repairs={}", s.breakdowns, s.repairs),
            format!("backpressure_pauses={}", s.backpressure_pauses),
            format!(
                "avg_order_latency_ms={:.1} avg_carrier_dwell_ms={:.1} avg_first_load_wait_ms={:.1}",
                s.avg_order_latency_ms, s.avg_carrier_dwell_ms, s.avg_first_load_wait_ms
            ),
            format!("regions={:?}", s.regions),
            format!("residual={:?}", self.residual),
            format!("pending_rejects={}", self.pending_rejects),
            format!("abandoned={} system_faults={}", s.abandoned, s.system_faults),
            format!("stalled_workers={:?}", self.stalled_workers),
            format!("unsettled={}", self.unsettled()),
            format!("clean={}", self.is_clean()),
        ]);
        lines.join("\n")
    }
}

/// Logs progress and marks stalled workers while the pipeline runs.
struct Supervisor {
    stats: Arc<PipelineStats>,
    dispatch: Arc<DispatchCoordinator>,
    rejects: Arc<RejectSink>,
    health: Arc<HealthMonitor>,
    channels: Channels,
    cancel: Arc<CancelToken>,
}

impl Supervisor {
    fn log_progress(&self) {
        let s = self.stats.snapshot();
        let d = self.dispatch.snapshot();
        info!(
            received = s.received,
            sorted = s.sorted,
            rejected = s.rejected_total,
            dispatched = s.orders_dispatched,
            pick = self.channels.pick.len(),
            pack = self.channels.pack.len(),
            label = self.channels.label.len(),
            sort = self.channels.sort.len(),
            load = self.channels.load.len(),
            rejects = self.rejects.pending(),
            trucks = d.active_carriers,
            bays_free = d.available_bays,
            loaders_waiting = d.waiting_loaders,
            "progress"
        );
    }

    fn run(&self, running: &RunFlag, progress_every: Duration, stall_after: Duration) -> Result<()> {
        let mut last_progress = Instant::now();
        let mut reported = std::collections::BTreeSet::new();
        while running.is_running() {
            self.cancel.pause(SUPERVISOR_TICK)?;
            let stalled = self.health.detect_stalled(stall_after);
            for worker in stalled.difference(&reported) {
                warn!(worker = %worker, "worker stopped reporting");
            }
            reported = stalled;
            if last_progress.elapsed() >= progress_every {
                self.log_progress();
                last_progress = Instant::now();
            }
        }
        self.log_progress();
        Ok(())
    }
}

/// A fully wired pipeline that has not started yet.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    ctx: StageContext,
    health: Arc<HealthMonitor>,
    dispatch: Arc<DispatchCoordinator>,
    rejects: Arc<RejectSink>,
    channels: Channels,
}

impl Pipeline {
    /// Build with seeded dice. `config` must already be validated.
    pub fn new(config: PipelineConfig) -> Self {
        let dice = Arc::new(SeededDice::new(config.failure_rates.clone(), config.seed));
        Self::with_dice(config, dice)
    }

    pub fn with_dice(config: PipelineConfig, dice: Arc<dyn Dice>) -> Self {
        let config = Arc::new(config);
        let cancel = Arc::new(CancelToken::new());
        let stats = Arc::new(PipelineStats::new());
        let ctx = StageContext::new(
            Arc::clone(&config),
            dice,
            Arc::clone(&cancel),
            Arc::clone(&stats),
        );
        let dispatch = Arc::new(DispatchCoordinator::new(
            config.bays,
            config.carrier_capacity,
            Arc::clone(&cancel),
            Arc::clone(&stats),
        ));
        let rejects = Arc::new(RejectSink::new(
            Arc::clone(&stats),
            Arc::clone(&cancel),
            config.scaled(config.timings.reject_handling_ms),
            config.poll_timeout(),
            Duration::from_millis(config.reject_grace_ms),
        ));
        Self {
            config,
            ctx,
            health: Arc::new(HealthMonitor::new()),
            dispatch,
            rejects,
            channels: Channels::new(),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.ctx.stats)
    }

    pub fn dispatch(&self) -> Arc<DispatchCoordinator> {
        Arc::clone(&self.dispatch)
    }

    fn spawn_stage<S: Stage + 'static>(
        &self,
        group: &mut WorkerGroup<()>,
        prefix: &str,
        workers: usize,
        stage: Arc<S>,
        (input, output): (&Arc<Channel<Order>>, &Arc<Channel<Order>>),
        backpressure: Option<(usize, Duration)>,
    ) -> Result<()> {
        for n in 1..=workers {
            let worker = StageWorker {
                name: if workers == 1 {
                    prefix.to_string()
                } else {
                    format!("{prefix}-{n}")
                },
                stage: Arc::clone(&stage),
                input: Arc::clone(input),
                output: Arc::clone(output),
                rejects: Arc::clone(&self.rejects),
                running: group.running.clone(),
                health: Arc::clone(&self.health),
                backpressure: backpressure.map(|(threshold, pause)| {
                    Backpressure::new(Arc::clone(&self.channels.load), threshold, pause)
                }),
                ctx: self.ctx.clone(),
            };
            group.handles.push(worker.spawn()?);
        }
        Ok(())
    }

    /// Spawn every worker thread.
    pub fn start(self) -> Result<RunningPipeline> {
        let config = Arc::clone(&self.config);
        let ch = self.channels.clone();

        let mut rejects = WorkerGroup::with_flag("rejects", self.rejects.running().clone());
        rejects.handles.push(self.rejects.spawn()?);

        let mut load = WorkerGroup::new("load");
        for n in 1..=config.loaders {
            let loader = Loader::new(format!("loader-{n}"), self.ctx.clone(), Arc::clone(&self.dispatch));
            load.handles
                .push(loader.spawn(Arc::clone(&ch.load), load.running.clone(), Arc::clone(&self.health))?);
        }

        let mut sort = WorkerGroup::new("sort");
        let area = Arc::new(SortingArea::new(self.ctx.clone(), Arc::clone(&ch.load)));
        sort.handles
            .push(area.spawn(Arc::clone(&ch.sort), sort.running.clone(), Arc::clone(&self.health))?);

        let mut label = WorkerGroup::new("label");
        let labeller = Arc::new(LabelStation::new(self.ctx.clone()));
        self.spawn_stage(&mut label, "labeller", 1, labeller, (&ch.label, &ch.sort), None)?;

        let mut pack = WorkerGroup::new("pack");
        let packer = Arc::new(PackStation::new(self.ctx.clone()));
        let pause = config.scaled_wait(config.backpressure_pause_ms, MIN_WAIT);
        self.spawn_stage(
            &mut pack,
            "packer",
            config.pack_lines,
            packer,
            (&ch.pack, &ch.label),
            Some((config.backpressure_threshold, pause)),
        )?;

        let mut pick = WorkerGroup::new("pick");
        let picker = Arc::new(PickStation::new(
            self.ctx.clone(),
            Limiter::new("pick", config.pick_permits),
        ));
        self.spawn_stage(&mut pick, "picker", config.pickers, picker, (&ch.pick, &ch.pack), None)?;

        let mut sweeper = WorkerGroup::new("sweeper");
        sweeper.handles.push(self.dispatch.spawn_sweeper(
            sweeper.running.clone(),
            config.scaled_wait(config.sweep_interval_ms, config.poll_timeout()),
            config.scaled(config.force_dispatch_age_ms),
            Arc::clone(&self.health),
        )?);

        let mut supervisor = WorkerGroup::new("supervisor");
        let watcher = Supervisor {
            stats: Arc::clone(&self.ctx.stats),
            dispatch: Arc::clone(&self.dispatch),
            rejects: Arc::clone(&self.rejects),
            health: Arc::clone(&self.health),
            channels: ch.clone(),
            cancel: Arc::clone(&self.ctx.cancel),
        };
        let progress_every = config.scaled_wait(config.progress_interval_ms, MIN_WAIT * 20);
        let stall_after = config.scaled_wait(config.stall_timeout_ms, config.poll_timeout() * 5);
        let flag = supervisor.running.clone();
        supervisor.handles.push(
            thread::Builder::new()
                .name("supervisor".to_string())
                .spawn(move || watcher.run(&flag, progress_every, stall_after))
                .map_err(|source| PipelineError::Spawn {
                    name: "supervisor".to_string(),
                    source,
                })?,
        );

        let mut intake = WorkerGroup::new("intake");
        intake.handles.push(stages::intake::spawn(
            Arc::new(IntakeStation::new(self.ctx.clone())),
            Arc::clone(&ch.pick),
            Arc::clone(&self.rejects),
            intake.running.clone(),
            Arc::clone(&self.health),
        )?);

        info!(
            orders = config.orders,
            pickers = config.pickers,
            pack_lines = config.pack_lines,
            loaders = config.loaders,
            bays = config.bays,
            time_scale = config.timings.time_scale,
            "pipeline started"
        );
        Ok(RunningPipeline {
            pipeline: self,
            started: Instant::now(),
            intake,
            pick,
            pack,
            label,
            sort,
            load,
            sweeper,
            supervisor,
            rejects,
        })
    }

    /// Start, run until the shift ends or every order has settled, then
    /// shut down in pipeline order.
    pub fn run(self) -> Result<RunReport> {
        let window = self.config.scaled(self.config.run_for_ms);
        let running = self.start()?;
        running.wait_until_settled(window);
        Ok(running.shutdown())
    }
}

/// A started pipeline. Dropping it without [`RunningPipeline::shutdown`]
/// leaves the worker threads running.
pub struct RunningPipeline {
    pipeline: Pipeline,
    started: Instant,
    intake: WorkerGroup<u64>,
    pick: WorkerGroup<()>,
    pack: WorkerGroup<()>,
    label: WorkerGroup<()>,
    sort: WorkerGroup<FlushReport>,
    load: WorkerGroup<()>,
    sweeper: WorkerGroup<usize>,
    supervisor: WorkerGroup<()>,
    rejects: WorkerGroup<()>,
}

impl RunningPipeline {
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.pipeline.stats()
    }

    pub fn dispatch(&self) -> Arc<DispatchCoordinator> {
        self.pipeline.dispatch()
    }

    /// Intake finished and every received order was labelled, rejected, or
    /// abandoned with nothing left in the order channels.
    pub fn settled(&self) -> bool {
        let s = self.pipeline.ctx.stats.snapshot();
        self.intake.finished()
            && self.pipeline.channels.orders_queued() == 0
            && self.pipeline.rejects.pending() == 0
            && s.labelled + s.rejected_total + s.abandoned >= s.received
    }

    /// Block until settled or until `window` has passed. A zero window
    /// waits for settling alone.
    pub fn wait_until_settled(&self, window: Duration) {
        let deadline = self.started + window;
        while !self.settled() {
            if !window.is_zero() && Instant::now() >= deadline {
                info!("shift over");
                return;
            }
            thread::sleep(SETTLE_CHECK);
        }
        debug!("all received orders settled");
    }

    fn wait_for_drain(&self, depth: impl Fn() -> usize, grace: Duration) {
        let deadline = Instant::now() + grace;
        while depth() > 0 && Instant::now() < deadline && !self.pipeline.ctx.cancel.is_cancelled() {
            thread::sleep(SETTLE_CHECK);
        }
    }

    // Stop the group, give it `grace` to exit, then cancel everything still
    // blocked and join.
    fn join_group<T>(&self, group: WorkerGroup<T>, grace: Duration, log: &mut ShutdownLog) -> Vec<T> {
        group.running.stop();
        let deadline = Instant::now() + grace;
        while !group.finished() && Instant::now() < deadline {
            thread::sleep(SETTLE_CHECK);
        }
        if !group.finished() {
            warn!(stage = group.stage, "workers did not stop within grace, cancelling");
            self.pipeline.ctx.cancel.cancel();
            log.hard_cancelled = true;
        }

        let mut results = Vec::new();
        for handle in group.handles {
            match handle.join() {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(PipelineError::Cancelled)) => {
                    debug!(stage = group.stage, "worker exited on cancellation");
                }
                Ok(Err(err)) => {
                    error!(stage = group.stage, error = %err, "worker failed");
                    log.worker_faults += 1;
                }
                Err(_) => {
                    error!(stage = group.stage, "worker panicked");
                    log.worker_faults += 1;
                }
            }
        }
        results
    }

    /// Ordered shutdown: intake first, then each stage once its input has
    /// drained, then the remaining trucks, the reject sink, and monitoring.
    pub fn shutdown(mut self) -> RunReport {
        let grace = Duration::from_millis(self.pipeline.config.grace_ms);
        let stall_after = self.pipeline.config.scaled_wait(
            self.pipeline.config.stall_timeout_ms,
            self.pipeline.config.poll_timeout() * 5,
        );
        let stalled_workers: Vec<String> = self
            .pipeline
            .health
            .detect_stalled(stall_after)
            .into_iter()
            .collect();
        let mut log = ShutdownLog::default();
        let this = &mut self;
        info!("shutting down");

        let intake = std::mem::replace(&mut this.intake, WorkerGroup::new("intake"));
        let generated: u64 = this.join_group(intake, grace, &mut log).into_iter().sum();

        let ch = this.pipeline.channels.clone();
        this.wait_for_drain(|| ch.pick.len(), grace);
        let pick = std::mem::replace(&mut this.pick, WorkerGroup::new("pick"));
        this.join_group(pick, grace, &mut log);

        this.wait_for_drain(|| ch.pack.len(), grace);
        let pack = std::mem::replace(&mut this.pack, WorkerGroup::new("pack"));
        this.join_group(pack, grace, &mut log);

        this.wait_for_drain(|| ch.label.len(), grace);
        let label = std::mem::replace(&mut this.label, WorkerGroup::new("label"));
        this.join_group(label, grace, &mut log);

        this.wait_for_drain(|| ch.sort.len(), grace);
        let sort = std::mem::replace(&mut this.sort, WorkerGroup::new("sort"));
        let flush = this
            .join_group(sort, grace, &mut log)
            .into_iter()
            .next()
            .unwrap_or_default();

        this.wait_for_drain(|| ch.load.len(), grace);
        let load = std::mem::replace(&mut this.load, WorkerGroup::new("load"));
        this.join_group(load, grace, &mut log);

        let sweeper = std::mem::replace(&mut this.sweeper, WorkerGroup::new("sweeper"));
        let swept: usize = this.join_group(sweeper, grace, &mut log).into_iter().sum();

        let forced_at_shutdown = match this.pipeline.dispatch.force_all_departure() {
            Ok(count) => count,
            Err(err) => {
                error!(error = %err, "final truck dispatch failed");
                log.worker_faults += 1;
                0
            }
        };

        this.pipeline.rejects.stop();
        let reject_grace = Duration::from_millis(this.pipeline.config.reject_grace_ms) + grace;
        let rejects = std::mem::replace(&mut this.rejects, WorkerGroup::new("rejects"));
        this.join_group(rejects, reject_grace, &mut log);

        let supervisor = std::mem::replace(&mut this.supervisor, WorkerGroup::new("supervisor"));
        this.join_group(supervisor, grace, &mut log);

        // Releases detached checkers still waiting out their delay.
        this.pipeline.ctx.cancel.cancel();

        let report = RunReport {
            elapsed_ms: this.started.elapsed().as_millis() as u64,
            generated,
            stats: this.pipeline.ctx.stats.snapshot(),
            dispatch: this.pipeline.dispatch.snapshot(),
            flush,
            swept,
            forced_at_shutdown,
            residual: ch.depths(),
            pending_rejects: this.pipeline.rejects.pending(),
            stalled_workers,
            worker_faults: log.worker_faults,
            hard_cancelled: log.hard_cancelled,
        };
        if report.is_clean() {
            info!(elapsed_ms = report.elapsed_ms, "shutdown complete");
        } else {
            warn!(
                residual = ?report.residual,
                pending_rejects = report.pending_rejects,
                abandoned = report.stats.abandoned,
                unsettled = report.unsettled(),
                "unclean shutdown"
            );
        }
        report
    }
}

/// Aggregated metrics from a single benchmark run.
struct BenchResult {
    pickers: usize,
    loaders: usize,
    bays: usize,
    report: RunReport,
    throughput: f64,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
}

const CSV_HEADER: &str = "pickers,loaders,bays,orders,elapsed_ms,throughput_orders_per_s,dispatched,rejected,abandoned,carriers,avg_dwell_ms,cpu_user_s,cpu_sys_s,clean";

impl BenchResult {
    fn csv_row(&self) -> String {
        let cpu = |value: Option<f64>| value.map_or_else(|| "NA".to_string(), |v| format!("{v:.4}"));
        let s = &self.report.stats;
        format!(
            "{},{},{},{},{},{:.2},{},{},{},{},{:.1},{},{},{}",
            self.pickers,
            self.loaders,
            self.bays,
            s.received,
            self.report.elapsed_ms,
            self.throughput,
            s.orders_dispatched,
            s.rejected_total,
            s.abandoned,
            s.carriers_created,
            s.avg_carrier_dwell_ms,
            cpu(self.cpu_user_s),
            cpu(self.cpu_sys_s),
            self.report.is_clean()
        )
    }
}

fn benchmark_once(config: PipelineConfig) -> Result<BenchResult> {
    let (pickers, loaders, bays) = (config.pickers, config.loaders, config.bays);
    let cpu_start = cpu_times_seconds();
    let report = Pipeline::new(config).run()?;
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };
    let throughput = if report.elapsed_ms > 0 {
        report.stats.orders_dispatched as f64 / (report.elapsed_ms as f64 / 1000.0)
    } else {
        0.0
    };
    Ok(BenchResult {
        pickers,
        loaders,
        bays,
        report,
        throughput,
        cpu_user_s,
        cpu_sys_s,
    })
}

/// Run once and print a CSV header plus one row.
pub fn run_benchmark(config: PipelineConfig) -> Result<()> {
    let result = benchmark_once(config)?;
    println!("{CSV_HEADER}");
    println!("{}", result.csv_row());
    if !result.report.is_clean() {
        eprintln!("# warning,unclean_shutdown,residual={:?}", result.report.residual);
    }
    Ok(())
}

/// Sweep worker and bay counts over `base`, one CSV row per combination.
pub fn run_stress(
    base: &PipelineConfig,
    picker_sets: &[usize],
    loader_sets: &[usize],
    bay_sets: &[usize],
) -> Result<()> {
    println!("{CSV_HEADER}");
    for &pickers in picker_sets {
        for &loaders in loader_sets {
            for &bays in bay_sets {
                let config = PipelineConfig {
                    pickers,
                    pick_permits: pickers,
                    loaders,
                    bays,
                    ..base.clone()
                };
                let result = benchmark_once(config)?;
                println!("{}", result.csv_row());
                if !result.report.is_clean() {
                    eprintln!(
                        "# warning,unclean_shutdown,pickers={pickers},loaders={loaders},bays={bays}"
                    );
                }
            }
        }
    }
    Ok(())
}
