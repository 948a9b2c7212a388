//! Unbounded FIFO channel between stages with timed polling.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A synchronized FIFO queue connecting two stages.
///
/// `offer` never blocks; `poll` waits up to a timeout so the consuming
/// worker can re-check its stop flag between attempts.
pub struct Channel<T> {
    name: &'static str,
    inner: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Channel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // A panicking producer cannot leave the deque half-updated, so the
    // contents stay usable after poisoning.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item and wake one waiting consumer.
    pub fn offer(&self, item: T) {
        let mut guard = self.lock();
        guard.push_back(item);
        self.available.notify_one();
    }

    /// Pop immediately without blocking.
    pub fn try_poll(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Block up to `timeout` for an item; `None` if nothing arrived.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if let Some(item) = guard.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            // Wait releases the lock and re-acquires it before returning.
            let (next, _) = self
                .available
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn items_are_consumed_once() {
        let channel = Arc::new(Channel::new("pick"));
        let total = 100u64;
        for id in 0..total {
            channel.offer(id);
        }

        let consumers = 4;
        let barrier = Arc::new(Barrier::new(consumers));
        let seen: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for _ in 0..consumers {
            let channel = Arc::clone(&channel);
            let barrier = Arc::clone(&barrier);
            let seen = Arc::clone(&seen);
            handles.push(thread::spawn(move || {
                barrier.wait();
                while let Some(id) = channel.try_poll() {
                    let mut guard = seen.lock().expect("seen mutex poisoned");
                    // Each id should be observed at most once.
                    assert!(guard.insert(id));
                }
            }));
        }

        for handle in handles {
            handle.join().expect("consumer thread panicked");
        }

        let guard = seen.lock().expect("seen mutex poisoned");
        assert_eq!(guard.len(), total as usize);
        assert!(channel.is_empty());
    }

    #[test]
    fn fifo_within_one_channel() {
        let channel = Channel::new("sort");
        for id in 0..10 {
            channel.offer(id);
        }
        let drained: Vec<_> = (0..10)
            .map(|_| channel.poll(Duration::from_millis(10)).expect("item"))
            .collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn poll_wakes_on_offer() {
        let channel = Arc::new(Channel::new("pack"));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();

        let consumer = Arc::clone(&channel);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("send ready");
            let item = consumer.poll(Duration::from_secs(2));
            tx.send(item).expect("send item");
        });

        ready_rx.recv_timeout(Duration::from_secs(1)).expect("ready");
        channel.offer(99u64);

        let received = rx.recv_timeout(Duration::from_secs(2)).expect("receive");
        assert_eq!(received, Some(99));
        handle.join().expect("poll thread panicked");
    }

    #[test]
    fn poll_times_out_when_empty() {
        let channel: Channel<u64> = Channel::new("label");
        let start = Instant::now();
        assert!(channel.poll(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn drain_empties_channel() {
        let channel = Channel::new("load");
        channel.offer(1);
        channel.offer(2);
        assert_eq!(channel.drain(), vec![1, 2]);
        assert_eq!(channel.len(), 0);
    }
}
