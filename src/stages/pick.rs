//! Picking: robotic arms pull order items from shelves, a bounded number at
//! a time.

use tracing::{debug, info};

use super::{Stage, StageContext, Verdict};
use crate::dice::Check;
use crate::error::Result;
use crate::order::Order;
use crate::pool::Limiter;
use crate::stats::PipelineStats;
use crate::types::{OrderStatus, RejectReason};

pub struct PickStation {
    ctx: StageContext,
    capacity: Limiter,
}

impl PickStation {
    /// All picker workers share `capacity`, so at most its permit count of
    /// orders are being picked at once.
    pub fn new(ctx: StageContext, capacity: Limiter) -> Self {
        Self { ctx, capacity }
    }

    pub fn available_capacity(&self) -> usize {
        self.capacity.available()
    }

    pub fn pick_unit(&self, mut order: Order) -> Result<Verdict> {
        let timings = &self.ctx.config.timings;
        // Held until return, whichever path that takes.
        let _permit = self.capacity.acquire(&self.ctx.cancel)?;
        debug!(order = order.id(), "picking");

        self.ctx.work(timings.pick_base_ms, timings.pick_jitter_ms)?;

        if self.ctx.dice.fails(Check::MissingItems) {
            order.reject(RejectReason::MissingItems)?;
            return Ok(Verdict::Rejected(order));
        }

        let items = order.items().to_vec();
        for item in items {
            self.ctx.work(timings.item_verify_ms, 0)?;
            if self.ctx.dice.fails(Check::ItemVerification) {
                debug!(order = order.id(), item, "item verification failed");
                order.reject(RejectReason::ItemVerification)?;
                return Ok(Verdict::Rejected(order));
            }
        }

        order.advance(OrderStatus::Picked)?;
        PipelineStats::incr(&self.ctx.stats.picked);
        info!(order = order.id(), items = order.items().len(), "picked");
        Ok(Verdict::Passed(order))
    }
}

impl Stage for PickStation {
    fn name(&self) -> &'static str {
        "pick"
    }

    fn process(&self, order: Order) -> Result<Verdict> {
        self.pick_unit(order)
    }
}
