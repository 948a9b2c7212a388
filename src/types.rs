//! Shared identifiers and status enums used across the pipeline.

use serde::Serialize;

/// Unique identifier for an order flowing through the pipeline.
pub type OrderId = u64;
/// Unique identifier for a sorted container.
pub type ContainerId = u64;
/// Unique identifier for a truck at a loading bay.
pub type CarrierId = u64;

/// Why an order left the pipeline early. Each reason is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Payment,
    Inventory,
    Address,
    MissingItems,
    ItemVerification,
    PackingError,
    ContentMismatch,
    VerificationTimeout,
    LabelError,
    LabelVerification,
}

impl RejectReason {
    pub const ALL: [RejectReason; 10] = [
        RejectReason::Payment,
        RejectReason::Inventory,
        RejectReason::Address,
        RejectReason::MissingItems,
        RejectReason::ItemVerification,
        RejectReason::PackingError,
        RejectReason::ContentMismatch,
        RejectReason::VerificationTimeout,
        RejectReason::LabelError,
        RejectReason::LabelVerification,
    ];

    /// Dense index for per-reason counters.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Payment => "payment",
            RejectReason::Inventory => "inventory",
            RejectReason::Address => "address",
            RejectReason::MissingItems => "missing_items",
            RejectReason::ItemVerification => "item_verification",
            RejectReason::PackingError => "packing_error",
            RejectReason::ContentMismatch => "content_mismatch",
            RejectReason::VerificationTimeout => "verification_timeout",
            RejectReason::LabelError => "label_error",
            RejectReason::LabelVerification => "label_verification",
        }
    }
}

/// Lifecycle of an order. Variants are declared in pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Verified,
    Picked,
    Packed,
    Labelled,
    Sorted,
    Loaded,
    Dispatched,
    Rejected(RejectReason),
}

impl OrderStatus {
    /// Position along the happy path; `None` for rejections.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::New => Some(0),
            OrderStatus::Verified => Some(1),
            OrderStatus::Picked => Some(2),
            OrderStatus::Packed => Some(3),
            OrderStatus::Labelled => Some(4),
            OrderStatus::Sorted => Some(5),
            OrderStatus::Loaded => Some(6),
            OrderStatus::Dispatched => Some(7),
            OrderStatus::Rejected(_) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Dispatched | OrderStatus::Rejected(_))
    }

    /// Whether `self -> next` is a legal forward move.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target == current + 1,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Sorting regions assigned by the Sort stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Region {
    North,
    South,
    East,
    West,
    Central,
}

impl Region {
    pub const ALL: [Region; 5] = [
        Region::North,
        Region::South,
        Region::East,
        Region::West,
        Region::Central,
    ];

    pub fn for_order(id: OrderId) -> Self {
        Self::ALL[(id % Self::ALL.len() as u64) as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// State of a truck parked at a bay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierStatus {
    Loading,
    Full,
    Departed,
    ForceDeparted,
}
