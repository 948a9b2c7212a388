//! The unit of work carried through every stage.

use std::time::Instant;

use crate::error::{PipelineError, Result};
use crate::types::{OrderId, OrderStatus, Region, RejectReason};

/// Items an order may contain.
pub const CATALOG: [&str; 12] = [
    "Laptop",
    "Phone",
    "Tablet",
    "Headphones",
    "Keyboard",
    "Mouse",
    "Monitor",
    "Cable",
    "Charger",
    "Case",
    "Speaker",
    "Camera",
];

/// Outcome flags of the three intake checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    pub payment: bool,
    pub inventory: bool,
    pub address: bool,
}

impl Verification {
    pub fn all_passed(&self) -> bool {
        self.payment && self.inventory && self.address
    }
}

/// An order owned by exactly one stage at a time.
///
/// Moving an `Order` into a channel hands it to the next stage; no stage
/// keeps a reference after the handoff.
#[derive(Debug)]
pub struct Order {
    id: OrderId,
    created_at: Instant,
    status: OrderStatus,
    items: Vec<&'static str>,
    pub verification: Verification,
    pub packed: bool,
    pub labelled: bool,
    pub tracking: Option<String>,
    pub region: Option<Region>,
}

impl Order {
    pub fn new(id: OrderId, items: Vec<&'static str>) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            status: OrderStatus::New,
            items,
            verification: Verification::default(),
            packed: false,
            labelled: false,
            tracking: None,
            region: None,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[&'static str] {
        &self.items
    }

    /// Move forward along the pipeline; backwards or post-terminal moves fail.
    pub fn advance(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                order: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the order rejected. Returns the reason the order ends with.
    pub fn reject(&mut self, reason: RejectReason) -> Result<RejectReason> {
        self.advance(OrderStatus::Rejected(reason))?;
        Ok(reason)
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self.status {
            OrderStatus::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.packed && self.labelled && self.tracking.is_some()
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Order {}
