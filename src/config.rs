//! Pipeline configuration: worker counts, capacities, delays, failure rates.
//!
//! Every field has a default so a TOML file only needs the values it
//! changes. Simulated delays are given in milliseconds and multiplied by
//! `timings.time_scale` at use, which lets tests and benchmarks compress a
//! five minute shift into a few hundred milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dice::Check;
use crate::error::ConfigError;

/// Per-check failure probabilities in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureRates {
    pub payment: f64,
    pub inventory: f64,
    pub address: f64,
    pub missing_items: f64,
    pub item_verification: f64,
    pub scanner_error: f64,
    pub content_mismatch: f64,
    pub label_error: f64,
    pub barcode_unreadable: f64,
    pub breakdown: f64,
}

impl Default for FailureRates {
    fn default() -> Self {
        Self {
            payment: 0.05,
            inventory: 0.10,
            address: 0.02,
            missing_items: 0.05,
            item_verification: 0.01,
            scanner_error: 0.02,
            content_mismatch: 0.01,
            label_error: 0.01,
            barcode_unreadable: 0.002,
            breakdown: 0.05,
        }
    }
}

impl FailureRates {
    /// Rates with every check passing; handy for deterministic runs.
    pub fn none() -> Self {
        Self {
            payment: 0.0,
            inventory: 0.0,
            address: 0.0,
            missing_items: 0.0,
            item_verification: 0.0,
            scanner_error: 0.0,
            content_mismatch: 0.0,
            label_error: 0.0,
            barcode_unreadable: 0.0,
            breakdown: 0.0,
        }
    }

    pub fn probability(&self, check: Check) -> f64 {
        match check {
            Check::Payment => self.payment,
            Check::Inventory => self.inventory,
            Check::Address => self.address,
            Check::MissingItems => self.missing_items,
            Check::ItemVerification => self.item_verification,
            Check::ScannerError => self.scanner_error,
            Check::ContentMismatch => self.content_mismatch,
            Check::LabelError => self.label_error,
            Check::BarcodeUnreadable => self.barcode_unreadable,
            Check::Breakdown => self.breakdown,
        }
    }

    fn entries(&self) -> [(&'static str, f64); 10] {
        [
            ("failure_rates.payment", self.payment),
            ("failure_rates.inventory", self.inventory),
            ("failure_rates.address", self.address),
            ("failure_rates.missing_items", self.missing_items),
            ("failure_rates.item_verification", self.item_verification),
            ("failure_rates.scanner_error", self.scanner_error),
            ("failure_rates.content_mismatch", self.content_mismatch),
            ("failure_rates.label_error", self.label_error),
            ("failure_rates.barcode_unreadable", self.barcode_unreadable),
            ("failure_rates.breakdown", self.breakdown),
        ]
    }
}

/// Simulated processing delays in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Multiplier applied to every simulated delay.
    pub time_scale: f64,
    pub intake_interval_ms: u64,
    pub pick_base_ms: u64,
    pub pick_jitter_ms: u64,
    pub item_verify_ms: u64,
    pub pack_base_ms: u64,
    pub pack_jitter_ms: u64,
    pub content_check_ms: u64,
    pub content_check_timeout_ms: u64,
    pub label_base_ms: u64,
    pub label_jitter_ms: u64,
    pub quality_scan_ms: u64,
    pub label_verify_ms: u64,
    pub sort_per_unit_ms: u64,
    pub load_base_ms: u64,
    pub load_jitter_ms: u64,
    pub repair_ms: u64,
    pub reject_handling_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            intake_interval_ms: 500,
            pick_base_ms: 1000,
            pick_jitter_ms: 2000,
            item_verify_ms: 200,
            pack_base_ms: 2000,
            pack_jitter_ms: 2000,
            content_check_ms: 500,
            content_check_timeout_ms: 1500,
            label_base_ms: 1000,
            label_jitter_ms: 1000,
            quality_scan_ms: 800,
            label_verify_ms: 200,
            sort_per_unit_ms: 150,
            load_base_ms: 3000,
            load_jitter_ms: 2000,
            repair_ms: 5000,
            reject_handling_ms: 100,
        }
    }
}

impl Timings {
    /// Convert a configured millisecond value into a scaled duration.
    pub fn scaled(&self, ms: u64) -> Duration {
        Duration::from_micros((ms as f64 * self.time_scale * 1000.0).round() as u64)
    }

    /// Every delay zero; stages run as fast as the scheduler allows.
    pub fn instant() -> Self {
        Self {
            time_scale: 0.0,
            ..Self::default()
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Orders generated by intake before it stops on its own.
    pub orders: u64,
    /// Simulated shift length; intake and all stages stop after it.
    pub run_for_ms: u64,
    pub pickers: usize,
    pub pick_permits: usize,
    /// 1 means a single exclusive packing line.
    pub pack_lines: usize,
    pub loaders: usize,
    pub bays: usize,
    pub batch_size: usize,
    pub container_capacity: usize,
    pub carrier_capacity: usize,
    /// Load-channel depth at which packing pauses.
    pub backpressure_threshold: usize,
    pub backpressure_pause_ms: u64,
    /// Carriers loaded longer ago than this are force-departed by the sweep.
    pub force_dispatch_age_ms: u64,
    pub sweep_interval_ms: u64,
    pub dispatch_retry_ms: u64,
    /// Unscaled timeout for every channel poll.
    pub poll_timeout_ms: u64,
    /// Unscaled drain budget per stage at shutdown.
    pub grace_ms: u64,
    pub reject_grace_ms: u64,
    pub progress_interval_ms: u64,
    pub stall_timeout_ms: u64,
    pub seed: u64,
    pub timings: Timings,
    pub failure_rates: FailureRates,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            orders: 600,
            run_for_ms: 300_000,
            pickers: 4,
            pick_permits: 4,
            pack_lines: 1,
            loaders: 3,
            bays: 2,
            batch_size: 6,
            container_capacity: 30,
            carrier_capacity: 18,
            backpressure_threshold: 10,
            backpressure_pause_ms: 200,
            force_dispatch_age_ms: 60_000,
            sweep_interval_ms: 5_000,
            dispatch_retry_ms: 500,
            poll_timeout_ms: 100,
            grace_ms: 5_000,
            reject_grace_ms: 1_000,
            progress_interval_ms: 30_000,
            stall_timeout_ms: 10_000,
            seed: 42,
            timings: Timings::default(),
            failure_rates: FailureRates::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a TOML file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("pickers", self.pickers),
            ("pick_permits", self.pick_permits),
            ("pack_lines", self.pack_lines),
            ("loaders", self.loaders),
            ("bays", self.bays),
            ("batch_size", self.batch_size),
            ("container_capacity", self.container_capacity),
            ("carrier_capacity", self.carrier_capacity),
            ("backpressure_threshold", self.backpressure_threshold),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be > 0".to_string(),
                });
            }
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_timeout_ms",
                message: "must be > 0".to_string(),
            });
        }
        if !self.timings.time_scale.is_finite() || self.timings.time_scale < 0.0 {
            return Err(ConfigError::Invalid {
                field: "timings.time_scale",
                message: format!("must be a finite value >= 0, got {}", self.timings.time_scale),
            });
        }
        for (field, rate) in self.failure_rates.entries() {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("must be within [0, 1], got {rate}"),
                });
            }
        }
        Ok(())
    }

    pub fn scaled(&self, ms: u64) -> Duration {
        self.timings.scaled(ms)
    }

    /// Scaled interval for a wait that repeats in a loop. Never below
    /// `floor`, so a zero time scale cannot turn the loop into a spin.
    pub fn scaled_wait(&self, ms: u64, floor: Duration) -> Duration {
        self.scaled(ms).max(floor)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn zero_bays_is_rejected() {
        let config = PipelineConfig {
            bays: 0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bays", .. }));
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let mut config = PipelineConfig::default();
        config.failure_rates.label_error = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_rates.label_error"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "orders = 12\nbays = 3\n\n[timings]\ntime_scale = 0.01\n\n[failure_rates]\npayment = 0.5"
        )
        .expect("write config");

        let config = PipelineConfig::load(file.path()).expect("load");
        assert_eq!(config.orders, 12);
        assert_eq!(config.bays, 3);
        assert_eq!(config.container_capacity, 30);
        assert_eq!(config.timings.time_scale, 0.01);
        assert_eq!(config.timings.repair_ms, 5000);
        assert_eq!(config.failure_rates.payment, 0.5);
        assert_eq!(config.failure_rates.inventory, 0.10);
    }

    #[test]
    fn malformed_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "orders = \"many\"").expect("write config");
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn scaling_compresses_delays() {
        let timings = Timings {
            time_scale: 0.01,
            ..Timings::default()
        };
        assert_eq!(timings.scaled(5000), Duration::from_millis(50));
        assert_eq!(Timings::instant().scaled(5000), Duration::ZERO);
    }
}
