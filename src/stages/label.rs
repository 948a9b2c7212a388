//! Labelling: prints a shipping label with a tracking number, scans it, and
//! verifies it before the order may be sorted.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::{Stage, StageContext, Verdict};
use crate::dice::Check;
use crate::error::Result;
use crate::order::Order;
use crate::stats::PipelineStats;
use crate::types::{OrderStatus, RejectReason};

pub const TRACKING_PREFIX: &str = "A";
pub const FIRST_TRACKING_NUMBER: u64 = 400;
const TRACKING_DIGITS: usize = 6;

/// Format a tracking number, e.g. `A000400`.
pub fn tracking_code(number: u64) -> String {
    format!("{TRACKING_PREFIX}{number:0width$}", width = TRACKING_DIGITS)
}

/// Well-formed codes are the prefix followed by at least six digits; the
/// sequence keeps counting past `A999999`.
pub fn is_valid_tracking(code: &str) -> bool {
    code.strip_prefix(TRACKING_PREFIX).is_some_and(|digits| {
        digits.len() >= TRACKING_DIGITS && digits.bytes().all(|b| b.is_ascii_digit())
    })
}

pub struct LabelStation {
    ctx: StageContext,
    next_tracking: AtomicU64,
}

impl LabelStation {
    pub fn new(ctx: StageContext) -> Self {
        Self {
            ctx,
            next_tracking: AtomicU64::new(FIRST_TRACKING_NUMBER),
        }
    }

    fn allocate_tracking(&self) -> String {
        tracking_code(self.next_tracking.fetch_add(1, Ordering::SeqCst))
    }

    fn verify_label(&self, order: &Order) -> Result<bool> {
        self.ctx.work(self.ctx.config.timings.label_verify_ms, 0)?;
        let readable = !self.ctx.dice.fails(Check::BarcodeUnreadable);
        let well_formed = order.tracking.as_deref().is_some_and(is_valid_tracking);
        Ok(readable && well_formed && order.verification.address)
    }

    pub fn label_unit(&self, mut order: Order) -> Result<Verdict> {
        let timings = &self.ctx.config.timings;
        debug!(order = order.id(), "labelling");
        self.ctx.work(timings.label_base_ms, timings.label_jitter_ms)?;
        self.ctx.work(timings.quality_scan_ms, 0)?;

        if self.ctx.dice.fails(Check::LabelError) {
            order.reject(RejectReason::LabelError)?;
            return Ok(Verdict::Rejected(order));
        }

        order.tracking = Some(self.allocate_tracking());
        if !self.verify_label(&order)? {
            order.reject(RejectReason::LabelVerification)?;
            return Ok(Verdict::Rejected(order));
        }

        order.advance(OrderStatus::Labelled)?;
        order.labelled = true;
        PipelineStats::incr(&self.ctx.stats.labelled);
        info!(order = order.id(), tracking = order.tracking.as_deref(), "labelled");
        Ok(Verdict::Passed(order))
    }
}

impl Stage for LabelStation {
    fn name(&self) -> &'static str {
        "label"
    }

    fn process(&self, order: Order) -> Result<Verdict> {
        self.label_unit(order)
    }
}
