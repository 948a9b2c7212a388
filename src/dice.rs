//! Probabilistic outcomes and delay jitter.
//!
//! Every random decision in the pipeline goes through [`Dice`] so a run can
//! be reproduced from its seed and tests can force individual outcomes.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FailureRates;

/// A probabilistic check performed somewhere in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Check {
    Payment,
    Inventory,
    Address,
    MissingItems,
    ItemVerification,
    ScannerError,
    ContentMismatch,
    LabelError,
    BarcodeUnreadable,
    Breakdown,
}

/// Source of randomness for stage outcomes.
pub trait Dice: Send + Sync {
    /// True when `check` fails on this roll.
    fn fails(&self, check: Check) -> bool;

    /// Uniform value in `0..upper`; 0 when `upper` is 0.
    fn below(&self, upper: u64) -> u64;

    /// A delay of `base` plus uniform jitter in `[0, jitter)`.
    fn delay(&self, base: Duration, jitter: Duration) -> Duration {
        let extra = self.below(jitter.as_micros() as u64);
        base + Duration::from_micros(extra)
    }
}

/// Seeded RNG applying the configured failure rates.
pub struct SeededDice {
    rates: FailureRates,
    rng: Mutex<StdRng>,
}

impl SeededDice {
    pub fn new(rates: FailureRates, seed: u64) -> Self {
        Self {
            rates,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Dice for SeededDice {
    fn fails(&self, check: Check) -> bool {
        let probability = self.rates.probability(check);
        if probability <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_bool(probability.min(1.0))
    }

    fn below(&self, upper: u64) -> u64 {
        if upper == 0 {
            return 0;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..upper)
    }
}
