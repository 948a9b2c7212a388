//! Capacity-bounded aggregates: containers of orders and trucks of containers.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Result;
use crate::order::Order;
use crate::types::{CarrierId, CarrierStatus, ContainerId, OrderStatus};

pub const DEFAULT_DESTINATION: &str = "regional-hub";

/// Sorted orders travelling together to a loading bay.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    capacity: usize,
    created_at: Instant,
    orders: Vec<Order>,
}

impl Container {
    pub fn new(id: ContainerId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            created_at: Instant::now(),
            orders: Vec::with_capacity(capacity),
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Add an order; hands it back if the container is already full.
    pub fn add(&mut self, order: Order) -> std::result::Result<(), Order> {
        if self.is_full() {
            return Err(order);
        }
        self.orders.push(order);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.orders.len() >= self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.orders.len())
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    fn advance_all(&mut self, status: OrderStatus) -> Result<()> {
        for order in &mut self.orders {
            order.advance(status)?;
        }
        Ok(())
    }
}

/// Result of putting a container on a truck.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded { remaining: usize },
    /// This load filled the truck; the caller departs it.
    Filled,
    /// The truck had no room. Indicates a reservation accounting bug.
    Overflow(Container),
}

/// Summary produced when a truck leaves its bay.
#[derive(Clone, Debug, Serialize)]
pub struct DepartureRecord {
    pub carrier: CarrierId,
    pub containers: usize,
    pub orders: usize,
    pub forced: bool,
    pub wait_for_first_load: Option<Duration>,
    pub dwell: Duration,
}

/// Read-only view of a truck for monitoring.
#[derive(Clone, Debug, Serialize)]
pub struct CarrierView {
    pub id: CarrierId,
    pub containers: usize,
    pub reserved: usize,
    pub capacity: usize,
    pub status: CarrierStatus,
    pub age: Duration,
}

#[derive(Debug)]
struct CarrierState {
    containers: Vec<Container>,
    reserved: usize,
    first_loaded_at: Option<Instant>,
    status: CarrierStatus,
}

/// A truck parked at a bay, shared between the dispatch registry and the
/// loaders currently filling it.
#[derive(Debug)]
pub struct Carrier {
    id: CarrierId,
    capacity: usize,
    created_at: Instant,
    destination: &'static str,
    state: Mutex<CarrierState>,
}

impl Carrier {
    pub fn new(id: CarrierId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            created_at: Instant::now(),
            destination: DEFAULT_DESTINATION,
            state: Mutex::new(CarrierState {
                containers: Vec::with_capacity(capacity),
                reserved: 0,
                first_loaded_at: None,
                status: CarrierStatus::Loading,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> CarrierId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn destination(&self) -> &'static str {
        self.destination
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn first_loaded_at(&self) -> Option<Instant> {
        self.lock().first_loaded_at
    }

    pub fn status(&self) -> CarrierStatus {
        self.lock().status
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn reserved(&self) -> usize {
        self.lock().reserved
    }

    pub fn is_full(&self) -> bool {
        self.lock().containers.len() >= self.capacity
    }

    /// Free slots not yet promised to a loader.
    pub fn available(&self) -> usize {
        let state = self.lock();
        if state.status != CarrierStatus::Loading {
            return 0;
        }
        self.capacity
            .saturating_sub(state.containers.len() + state.reserved)
    }

    /// Promise one slot to a loader.
    pub fn try_reserve(&self) -> bool {
        let mut state = self.lock();
        if state.status != CarrierStatus::Loading
            || state.containers.len() + state.reserved >= self.capacity
        {
            return false;
        }
        state.reserved += 1;
        true
    }

    /// Give back a slot the loader will not use.
    pub fn cancel_reservation(&self) {
        let mut state = self.lock();
        state.reserved = state.reserved.saturating_sub(1);
    }

    /// Put `container` on the truck, consuming one reservation.
    pub fn load(&self, mut container: Container) -> Result<LoadOutcome> {
        let mut state = self.lock();
        state.reserved = state.reserved.saturating_sub(1);
        if state.status != CarrierStatus::Loading || state.containers.len() >= self.capacity {
            return Ok(LoadOutcome::Overflow(container));
        }
        container.advance_all(OrderStatus::Loaded)?;
        state.containers.push(container);
        state.first_loaded_at.get_or_insert_with(Instant::now);
        if state.containers.len() >= self.capacity {
            state.status = CarrierStatus::Full;
            Ok(LoadOutcome::Filled)
        } else {
            Ok(LoadOutcome::Loaded {
                remaining: self.capacity - state.containers.len(),
            })
        }
    }

    /// Close the truck and mark every order on it dispatched.
    pub(crate) fn depart(&self, forced: bool) -> Result<DepartureRecord> {
        let mut state = self.lock();
        state.status = if forced {
            CarrierStatus::ForceDeparted
        } else {
            CarrierStatus::Departed
        };
        for container in &mut state.containers {
            container.advance_all(OrderStatus::Dispatched)?;
        }
        let orders = state.containers.iter().map(Container::len).sum();
        Ok(DepartureRecord {
            carrier: self.id,
            containers: state.containers.len(),
            orders,
            forced,
            wait_for_first_load: state
                .first_loaded_at
                .map(|loaded| loaded.duration_since(self.created_at)),
            dwell: self.created_at.elapsed(),
        })
    }

    pub fn view(&self) -> CarrierView {
        let state = self.lock();
        CarrierView {
            id: self.id,
            containers: state.containers.len(),
            reserved: state.reserved,
            capacity: self.capacity,
            status: state.status,
            age: self.created_at.elapsed(),
        }
    }
}
