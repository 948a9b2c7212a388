//! Order intake: generates orders at a fixed cadence and verifies them.

use std::sync::Arc;

use tracing::{debug, info};

use super::{StageContext, Verdict};
use crate::channel::Channel;
use crate::dice::Check;
use crate::error::Result;
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::RunFlag;
use crate::order::{CATALOG, Order, Verification};
use crate::reject::RejectSink;
use crate::stats::PipelineStats;
use crate::types::{OrderId, OrderStatus, RejectReason};

const MAX_ITEMS: u64 = 4;

type Record = fn(&mut Verification, bool);

fn record_payment(v: &mut Verification, passed: bool) {
    v.payment = passed;
}

fn record_inventory(v: &mut Verification, passed: bool) {
    v.inventory = passed;
}

fn record_address(v: &mut Verification, passed: bool) {
    v.address = passed;
}

// Checked in this order; the first failure short-circuits the rest.
const CHECKS: [(Check, RejectReason, Record); 3] = [
    (Check::Payment, RejectReason::Payment, record_payment),
    (Check::Inventory, RejectReason::Inventory, record_inventory),
    (Check::Address, RejectReason::Address, record_address),
];

pub struct IntakeStation {
    ctx: StageContext,
}

impl IntakeStation {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    fn random_items(&self) -> Vec<&'static str> {
        let dice = &self.ctx.dice;
        let count = dice.below(MAX_ITEMS) + 1;
        (0..count)
            .map(|_| CATALOG[dice.below(CATALOG.len() as u64) as usize])
            .collect()
    }

    /// Create order `id` and run payment, inventory and address checks.
    pub fn receive_unit(&self, id: OrderId) -> Result<Verdict> {
        let mut order = Order::new(id, self.random_items());
        PipelineStats::incr(&self.ctx.stats.received);
        debug!(order = id, items = order.items().len(), "receiving order");

        for (check, reason, record) in CHECKS {
            let passed = !self.ctx.dice.fails(check);
            record(&mut order.verification, passed);
            if !passed {
                order.reject(reason)?;
                return Ok(Verdict::Rejected(order));
            }
        }

        order.advance(OrderStatus::Verified)?;
        PipelineStats::incr(&self.ctx.stats.verified);
        Ok(Verdict::Passed(order))
    }

    /// Generate orders `1..=orders` one interval apart until done or stopped.
    /// Returns the number of orders generated.
    pub fn run(
        &self,
        output: &Channel<Order>,
        rejects: &RejectSink,
        running: &RunFlag,
        health: &HealthMonitor,
    ) -> Result<u64> {
        let name = "intake";
        health.register(name);
        let interval = self.ctx.config.scaled(self.ctx.config.timings.intake_interval_ms);
        let mut generated = 0;
        for id in 1..=self.ctx.config.orders {
            if !running.is_running() {
                break;
            }
            health.heartbeat(name);
            match self.receive_unit(id)? {
                Verdict::Passed(order) => {
                    debug!(order = id, "verified, sent to picking");
                    output.offer(order);
                }
                Verdict::Rejected(order) => rejects.submit(order),
            }
            generated += 1;
            self.ctx.cancel.pause(interval)?;
        }
        health.retire(name);
        info!(generated, "order intake completed");
        Ok(generated)
    }
}

/// Shared by the driver so intake can be spawned like the other workers.
pub fn spawn(
    station: Arc<IntakeStation>,
    output: Arc<Channel<Order>>,
    rejects: Arc<RejectSink>,
    running: RunFlag,
    health: Arc<HealthMonitor>,
) -> Result<std::thread::JoinHandle<Result<u64>>> {
    let name = "intake".to_string();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || station.run(&output, &rejects, &running, &health))
        .map_err(|source| crate::error::PipelineError::Spawn { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::Dice;
    use crate::dice::testing::ScriptedDice;
    use crate::stages::testing::context;

    #[test]
    fn all_checks_pass_yields_verified_order() {
        let station = IntakeStation::new(context(&[]));
        let order = station
            .receive_unit(1)
            .expect("receive")
            .into_passed()
            .expect("passed");
        assert_eq!(order.status(), OrderStatus::Verified);
        assert!(order.verification.all_passed());
        assert!((1..=4).contains(&order.items().len()));
    }

    #[test]
    fn payment_failure_short_circuits_later_checks() {
        let dice = Arc::new(ScriptedDice::failing(&[Check::Payment, Check::Inventory]));
        let mut ctx = context(&[]);
        ctx.dice = Arc::clone(&dice) as Arc<dyn Dice>;
        let station = IntakeStation::new(ctx);
        let verdict = station.receive_unit(2).expect("receive");
        let order = match verdict {
            Verdict::Rejected(order) => order,
            Verdict::Passed(_) => panic!("expected rejection"),
        };
        assert_eq!(order.rejection(), Some(RejectReason::Payment));
        assert!(!order.verification.payment);
        // Inventory and address were never rolled.
        assert_eq!(dice.rolled(), vec![Check::Payment]);
    }

    #[test]
    fn inventory_failure_skips_address() {
        let dice = Arc::new(ScriptedDice::failing(&[Check::Inventory]));
        let mut ctx = context(&[]);
        ctx.dice = Arc::clone(&dice) as Arc<dyn Dice>;
        let verdict = IntakeStation::new(ctx).receive_unit(4).expect("receive");
        assert_eq!(verdict.order().rejection(), Some(RejectReason::Inventory));
        assert_eq!(dice.rolled(), vec![Check::Payment, Check::Inventory]);
    }

    #[test]
    fn address_failure_records_address_reason() {
        let station = IntakeStation::new(context(&[Check::Address]));
        let verdict = station.receive_unit(3).expect("receive");
        assert_eq!(verdict.order().rejection(), Some(RejectReason::Address));
        assert!(verdict.order().verification.payment);
        assert!(verdict.order().verification.inventory);
    }

    #[test]
    fn run_generates_configured_orders() {
        let ctx = crate::stages::testing::context_with(
            crate::config::PipelineConfig {
                orders: 5,
                ..Default::default()
            },
            &[],
        );
        let stats = Arc::clone(&ctx.stats);
        let rejects = RejectSink::new(
            Arc::clone(&stats),
            Arc::clone(&ctx.cancel),
            std::time::Duration::ZERO,
            std::time::Duration::from_millis(5),
            std::time::Duration::ZERO,
        );
        let station = IntakeStation::new(ctx);
        let output = Channel::new("pick");
        let generated = station
            .run(&output, &rejects, &RunFlag::new(), &HealthMonitor::new())
            .expect("run");
        assert_eq!(generated, 5);
        assert_eq!(output.len(), 5);
        assert_eq!(stats.snapshot().received, 5);
    }
}
