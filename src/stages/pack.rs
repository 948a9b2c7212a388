//! Packing: boxes each picked order on a single line while an independent
//! content check runs alongside.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Stage, StageContext, Verdict};
use crate::dice::{Check, Dice};
use crate::error::{PipelineError, Result};
use crate::lifecycle::CancelToken;
use crate::order::Order;
use crate::pool::{Exclusive, Limiter};
use crate::stats::PipelineStats;
use crate::types::{OrderStatus, RejectReason};

// Thread start-up is real time, not simulated time.
const MIN_CONTENT_WAIT: Duration = Duration::from_millis(200);

enum PackGate {
    Line(Exclusive<()>),
    Lines(Limiter),
}

pub struct PackStation {
    ctx: StageContext,
    gate: PackGate,
    in_progress: AtomicUsize,
    peak: AtomicUsize,
}

impl PackStation {
    /// `pack_lines == 1` gives a single exclusive line; more lines share a
    /// limiter.
    pub fn new(ctx: StageContext) -> Self {
        let gate = match ctx.config.pack_lines {
            0 | 1 => PackGate::Line(Exclusive::new("packing", ())),
            lines => PackGate::Lines(Limiter::new("packing", lines)),
        };
        Self {
            ctx,
            gate,
            in_progress: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Highest number of orders ever packed at the same time.
    pub fn peak_in_progress(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn start_content_check(&self, order: &Order) -> Result<mpsc::Receiver<bool>> {
        let (tx, rx) = mpsc::channel();
        let dice: Arc<dyn Dice> = Arc::clone(&self.ctx.dice);
        let cancel: Arc<CancelToken> = Arc::clone(&self.ctx.cancel);
        let duration = self.ctx.config.scaled(self.ctx.config.timings.content_check_ms);
        let name = format!("content-check-{}", order.id());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if cancel.pause(duration).is_ok() {
                    // The packer may have given up already.
                    let _ = tx.send(!dice.fails(Check::ContentMismatch));
                }
            })
            .map_err(|source| PipelineError::Spawn { name, source })?;
        Ok(rx)
    }

    pub fn pack_unit(&self, mut order: Order) -> Result<Verdict> {
        let timings = &self.ctx.config.timings;
        let _line = match &self.gate {
            PackGate::Line(section) => Some(section.enter()?),
            PackGate::Lines(_) => None,
        };
        let _permit = match &self.gate {
            PackGate::Lines(limiter) => Some(limiter.acquire(&self.ctx.cancel)?),
            PackGate::Line(_) => None,
        };

        let current = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let result = self.pack_on_line(&mut order, timings.content_check_timeout_ms);
        self.in_progress.fetch_sub(1, Ordering::SeqCst);

        match result? {
            None => {
                order.advance(OrderStatus::Packed)?;
                order.packed = true;
                PipelineStats::incr(&self.ctx.stats.packed);
                info!(order = order.id(), "packed");
                Ok(Verdict::Passed(order))
            }
            Some(reason) => {
                order.reject(reason)?;
                Ok(Verdict::Rejected(order))
            }
        }
    }

    /// Returns the rejection reason, if any.
    fn pack_on_line(&self, order: &mut Order, timeout_ms: u64) -> Result<Option<RejectReason>> {
        let timings = &self.ctx.config.timings;
        let started = Instant::now();
        let budget = self.ctx.config.scaled(timeout_ms).max(MIN_CONTENT_WAIT);
        let deadline = started + budget;
        let content = self.start_content_check(order)?;
        debug!(order = order.id(), "packing");

        self.ctx.work(timings.pack_base_ms, timings.pack_jitter_ms)?;
        if self.ctx.dice.fails(Check::ScannerError) {
            return Ok(Some(RejectReason::PackingError));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match content.recv_timeout(remaining) {
            Ok(true) => Ok(None),
            Ok(false) => Ok(Some(RejectReason::ContentMismatch)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(order = order.id(), waited = ?started.elapsed(), "content check timed out");
                Ok(Some(RejectReason::VerificationTimeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The checker only hangs up without answering when cancelled.
                self.ctx.cancel.check()?;
                Ok(Some(RejectReason::VerificationTimeout))
            }
        }
    }
}

impl Stage for PackStation {
    fn name(&self) -> &'static str {
        "pack"
    }

    fn process(&self, order: Order) -> Result<Verdict> {
        self.pack_unit(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, Timings};
    use crate::stages::testing::{context, context_with, order_at};
    use std::thread;

    #[test]
    fn passing_pack_sets_flag_and_status() {
        let station = PackStation::new(context(&[]));
        let order = station
            .pack_unit(order_at(1, OrderStatus::Picked))
            .expect("pack")
            .into_passed()
            .expect("passed");
        assert_eq!(order.status(), OrderStatus::Packed);
        assert!(order.packed);
        assert_eq!(station.in_progress(), 0);
    }

    #[test]
    fn scanner_error_rejects_as_packing_error() {
        let station = PackStation::new(context(&[Check::ScannerError]));
        let verdict = station
            .pack_unit(order_at(2, OrderStatus::Picked))
            .expect("pack");
        assert_eq!(verdict.order().rejection(), Some(RejectReason::PackingError));
        assert!(!verdict.order().packed);
    }

    #[test]
    fn content_mismatch_rejects() {
        let station = PackStation::new(context(&[Check::ContentMismatch]));
        let verdict = station
            .pack_unit(order_at(3, OrderStatus::Picked))
            .expect("pack");
        assert_eq!(
            verdict.order().rejection(),
            Some(RejectReason::ContentMismatch)
        );
    }

    #[test]
    fn slow_content_check_times_out() {
        let config = PipelineConfig {
            timings: Timings {
                time_scale: 1.0,
                pack_base_ms: 0,
                pack_jitter_ms: 0,
                content_check_ms: 5_000,
                content_check_timeout_ms: 10,
                ..Timings::default()
            },
            ..PipelineConfig::default()
        };
        let ctx = context_with(config, &[]);
        let cancel = Arc::clone(&ctx.cancel);
        let station = PackStation::new(ctx);
        let verdict = station
            .pack_unit(order_at(4, OrderStatus::Picked))
            .expect("pack");
        assert_eq!(
            verdict.order().rejection(),
            Some(RejectReason::VerificationTimeout)
        );
        // Release the detached checker.
        cancel.cancel();
    }

    #[test]
    fn single_line_packs_one_order_at_a_time() {
        let config = PipelineConfig {
            timings: Timings {
                time_scale: 1.0,
                pack_base_ms: 5,
                pack_jitter_ms: 0,
                content_check_ms: 1,
                content_check_timeout_ms: 1000,
                ..Timings::default()
            },
            ..PipelineConfig::default()
        };
        let station = Arc::new(PackStation::new(context_with(config, &[])));
        let handles: Vec<_> = (0..6)
            .map(|id| {
                let station = Arc::clone(&station);
                thread::spawn(move || {
                    station
                        .pack_unit(order_at(id, OrderStatus::Picked))
                        .expect("pack")
                        .into_passed()
                        .expect("passed")
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("packer panicked");
        }
        assert_eq!(station.peak_in_progress(), 1);
    }

    #[test]
    fn cancel_during_pack_returns_cancelled() {
        let config = PipelineConfig {
            timings: Timings {
                time_scale: 1.0,
                pack_base_ms: 10_000,
                ..Timings::default()
            },
            ..PipelineConfig::default()
        };
        let ctx = context_with(config, &[]);
        let cancel = Arc::clone(&ctx.cancel);
        let station = Arc::new(PackStation::new(ctx));
        let worker = {
            let station = Arc::clone(&station);
            thread::spawn(move || station.pack_unit(order_at(5, OrderStatus::Picked)))
        };
        while station.in_progress() == 0 {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        cancel.cancel();
        let result = worker.join().expect("packer panicked");
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(station.in_progress(), 0);
    }
}
