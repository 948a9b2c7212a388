//! Multi-stage order fulfillment simulator.
//!
//! Orders flow Intake → Pick → Pack → Label → Sort → Load, each stage on
//! its own worker threads connected by polled channels. Picking and the
//! loading bays are bounded by fair limiters, packing runs on a single
//! exclusive line, and trucks are coordinated by [`dispatch::DispatchCoordinator`].

pub mod channel;
pub mod config;
pub mod container;
pub mod dice;
pub mod dispatch;
pub mod error;
pub mod health_monitor;
pub mod lifecycle;
pub mod logging;
pub mod order;
pub mod pool;
pub mod reject;
pub mod sim;
pub mod stages;
pub mod stats;
pub mod types;

pub use config::PipelineConfig;
pub use error::{ConfigError, LoggingError, PipelineError};
pub use sim::{Pipeline, RunReport};
