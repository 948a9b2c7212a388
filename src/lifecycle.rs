//! Cooperative stop flags and hard cancellation for worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};

/// Stop flag checked by a worker loop between polls.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide cancellation that interrupts blocking waits.
///
/// Every simulated delay goes through [`CancelToken::pause`], so a cancel
/// wakes sleepers immediately instead of waiting out their delay.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = true;
        self.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail fast if cancellation has already been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub fn pause(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let mut guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *guard {
                return Err(PipelineError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (next, _) = self
                .wake
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn run_flag_clones_share_state() {
        let flag = RunFlag::new();
        let other = flag.clone();
        assert!(other.is_running());
        flag.stop();
        assert!(!other.is_running());
    }

    #[test]
    fn pause_completes_without_cancel() {
        let token = CancelToken::new();
        let start = Instant::now();
        token.pause(Duration::from_millis(20)).expect("pause");
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_long_pause() {
        let token = Arc::new(CancelToken::new());
        let sleeper = Arc::clone(&token);
        let start = Instant::now();
        let handle = thread::spawn(move || sleeper.pause(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let result = handle.join().expect("sleeper panicked");
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(token.check().is_err());
    }
}
