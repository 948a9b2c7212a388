//! Resource pools gating stage capacity.
//!
//! [`Limiter`] is a fair counting semaphore handing out RAII [`Permit`]s;
//! [`Exclusive`] is a named single-owner critical section.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::lifecycle::CancelToken;

// Upper bound on how long a blocked acquirer goes without re-checking
// cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(25);

struct LimiterState {
    available: usize,
    next_ticket: u64,
    waiters: VecDeque<u64>,
}

struct LimiterInner {
    name: &'static str,
    permits: usize,
    state: Mutex<LimiterState>,
    released: Condvar,
    // Lock-free mirrors of the guarded counters for monitoring readers.
    available_hint: AtomicUsize,
    waiting_hint: AtomicUsize,
}

impl LimiterInner {
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // Counters are only touched in short non-panicking sections.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &LimiterState) {
        self.available_hint.store(state.available, Ordering::SeqCst);
        self.waiting_hint.store(state.waiters.len(), Ordering::SeqCst);
    }
}

/// Fixed-permit concurrency limiter with FIFO hand-off among waiters.
#[derive(Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

impl Limiter {
    /// Create a limiter with `permits` slots. Callers validate `permits > 0`.
    pub fn new(name: &'static str, permits: usize) -> Self {
        debug_assert!(permits > 0, "limiter {name} needs at least one permit");
        Self {
            inner: Arc::new(LimiterInner {
                name,
                permits,
                state: Mutex::new(LimiterState {
                    available: permits,
                    next_ticket: 0,
                    waiters: VecDeque::new(),
                }),
                released: Condvar::new(),
                available_hint: AtomicUsize::new(permits),
                waiting_hint: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.permits
    }

    /// Free permits. Reads a mirror, so it never contends with acquirers.
    pub fn available(&self) -> usize {
        self.inner.available_hint.load(Ordering::SeqCst)
    }

    /// Number of callers currently blocked in [`Limiter::acquire`].
    pub fn waiting(&self) -> usize {
        self.inner.waiting_hint.load(Ordering::SeqCst)
    }

    fn permit(&self) -> Permit {
        Permit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Take a permit only if one is free and nobody is queued ahead.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut guard = self.inner.lock();
        if guard.available > 0 && guard.waiters.is_empty() {
            guard.available -= 1;
            self.inner.publish(&guard);
            return Some(self.permit());
        }
        None
    }

    /// Block until a permit is granted in arrival order, or until `cancel`
    /// fires.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<Permit> {
        let mut guard = self.inner.lock();
        if guard.available > 0 && guard.waiters.is_empty() {
            guard.available -= 1;
            self.inner.publish(&guard);
            return Ok(self.permit());
        }

        let ticket = guard.next_ticket;
        guard.next_ticket += 1;
        guard.waiters.push_back(ticket);
        self.inner.publish(&guard);
        debug!(
            limiter = self.inner.name,
            ticket,
            queued = guard.waiters.len(),
            "waiting for permit"
        );

        loop {
            if cancel.is_cancelled() {
                guard.waiters.retain(|&queued| queued != ticket);
                self.inner.publish(&guard);
                // The head of the queue may have changed.
                self.inner.released.notify_all();
                return Err(PipelineError::Cancelled);
            }
            if guard.available > 0 && guard.waiters.front() == Some(&ticket) {
                guard.waiters.pop_front();
                guard.available -= 1;
                self.inner.publish(&guard);
                if guard.available > 0 {
                    self.inner.released.notify_all();
                }
                return Ok(self.permit());
            }
            let (next, _) = self
                .inner
                .released
                .wait_timeout(guard, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }
}

/// A held limiter slot. Dropping it returns the slot on every exit path.
pub struct Permit {
    inner: Arc<LimiterInner>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("limiter", &self.inner.name).finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut guard = self.inner.lock();
        guard.available += 1;
        debug_assert!(
            guard.available <= self.inner.permits,
            "limiter {} over-released",
            self.inner.name
        );
        self.inner.publish(&guard);
        self.inner.released.notify_all();
    }
}

/// A single-owner critical section around `T`.
pub struct Exclusive<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> Exclusive<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enter the critical section, blocking while another owner holds it.
    pub fn enter(&self) -> Result<MutexGuard<'_, T>> {
        self.inner
            .lock()
            .map_err(|_| PipelineError::LockPoisoned(self.name))
    }

    /// Enter only if nobody holds the section right now.
    pub fn try_enter(&self) -> Result<Option<MutexGuard<'_, T>>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(PipelineError::LockPoisoned(self.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, mpsc};
    use std::thread;

    fn record_max(max: &AtomicUsize, current: usize) {
        let mut prev = max.load(Ordering::SeqCst);
        while current > prev {
            match max.compare_exchange(prev, current, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    #[test]
    fn permits_stay_within_bounds_under_contention() {
        let limiter = Limiter::new("pick", 4);
        let cancel = Arc::new(CancelToken::new());
        let contenders = 16;
        let barrier = Arc::new(Barrier::new(contenders));
        let occupancy = Arc::new(AtomicUsize::new(0));
        let max_occupancy = Arc::new(AtomicUsize::new(0));
        let violation = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for _ in 0..contenders {
            let limiter = limiter.clone();
            let cancel = Arc::clone(&cancel);
            let barrier = Arc::clone(&barrier);
            let occupancy = Arc::clone(&occupancy);
            let max_occupancy = Arc::clone(&max_occupancy);
            let violation = Arc::clone(&violation);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..20 {
                    let _permit = limiter.acquire(&cancel).expect("acquire");
                    let current = occupancy.fetch_add(1, Ordering::SeqCst) + 1;
                    record_max(&max_occupancy, current);
                    if current > 4 || limiter.available() > 4 {
                        violation.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(200));
                    occupancy.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("contender panicked");
        }

        assert!(!violation.load(Ordering::SeqCst));
        assert!(max_occupancy.load(Ordering::SeqCst) <= 4);
        assert_eq!(limiter.available(), 4);
        assert_eq!(limiter.waiting(), 0);
    }

    #[test]
    fn try_acquire_never_blocks() {
        let limiter = Limiter::new("bays", 1);
        let held = limiter.try_acquire().expect("first permit");
        assert!(limiter.try_acquire().is_none());
        drop(held);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn permit_released_on_panic() {
        let limiter = Limiter::new("pick", 1);
        let inner = limiter.clone();
        let result = thread::spawn(move || {
            let _permit = inner.try_acquire().expect("permit");
            panic!("stage failure while holding permit");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let limiter = Limiter::new("bays", 1);
        let cancel = Arc::new(CancelToken::new());
        let held = limiter.try_acquire().expect("permit");
        let (order_tx, order_rx) = mpsc::channel();

        let mut handles = Vec::new();
        for idx in 0..3 {
            let waiter = limiter.clone();
            let cancel = Arc::clone(&cancel);
            let order_tx = order_tx.clone();
            handles.push(thread::spawn(move || {
                let _permit = waiter.acquire(&cancel).expect("acquire");
                order_tx.send(idx).expect("send");
                thread::sleep(Duration::from_millis(5));
            }));
            // Wait until this waiter is queued before starting the next.
            while limiter.waiting() < idx + 1 {
                thread::sleep(Duration::from_millis(1));
            }
        }

        drop(held);
        let served: Vec<_> = (0..3)
            .map(|_| order_rx.recv_timeout(Duration::from_secs(2)).expect("served"))
            .collect();
        assert_eq!(served, vec![0, 1, 2]);
        for handle in handles {
            handle.join().expect("waiter panicked");
        }
    }

    #[test]
    fn try_acquire_does_not_barge_past_waiters() {
        let limiter = Limiter::new("bays", 1);
        let cancel = Arc::new(CancelToken::new());
        let held = limiter.try_acquire().expect("permit");

        let waiter = {
            let limiter = limiter.clone();
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || limiter.acquire(&cancel).map(|_| ()))
        };
        while limiter.waiting() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        drop(held);
        // The freed slot belongs to the queued waiter whether or not it has
        // been scheduled yet.
        assert!(limiter.try_acquire().is_none());
        waiter.join().expect("waiter panicked").expect("acquire");
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn cancel_unblocks_waiter_without_leaking() {
        let limiter = Limiter::new("bays", 1);
        let cancel = Arc::new(CancelToken::new());
        let held = limiter.try_acquire().expect("permit");

        let waiter = {
            let limiter = limiter.clone();
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || limiter.acquire(&cancel).map(|_| ()))
        };
        while limiter.waiting() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        cancel.cancel();
        let result = waiter.join().expect("waiter panicked");
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(limiter.waiting(), 0);
        drop(held);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn exclusive_admits_one_owner_at_a_time() {
        let section = Arc::new(Exclusive::new("packing", 0u32));
        let contenders = 6;
        let barrier = Arc::new(Barrier::new(contenders));
        let occupancy = Arc::new(AtomicUsize::new(0));
        let max_occupancy = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..contenders {
            let section = Arc::clone(&section);
            let barrier = Arc::clone(&barrier);
            let occupancy = Arc::clone(&occupancy);
            let max_occupancy = Arc::clone(&max_occupancy);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut guard = section.enter().expect("enter");
                let current = occupancy.fetch_add(1, Ordering::SeqCst) + 1;
                record_max(&max_occupancy, current);
                thread::sleep(Duration::from_millis(5));
                *guard += 1;
                occupancy.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.join().expect("contender panicked");
        }
        assert_eq!(max_occupancy.load(Ordering::SeqCst), 1);
        assert_eq!(*section.enter().expect("enter"), contenders as u32);
    }

    #[test]
    fn try_enter_reports_busy() {
        let section = Exclusive::new("registry", ());
        let _held = section.enter().expect("enter");
        assert!(section.try_enter().expect("not poisoned").is_none());
    }
}
