//! Typed errors for the pipeline.
//!
//! Business rejections (payment declined, label error, ...) are not errors;
//! they travel as `RejectReason` inside the order status. The enums here are
//! system faults that must reach the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CarrierId, ContainerId, OrderId, OrderStatus};

/// System faults raised by stages, pools, and the dispatch coordinator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cancelled while waiting")]
    Cancelled,

    #[error("order {order} did not fit into freshly opened container {container}")]
    CapacityAccounting { container: ContainerId, order: OrderId },

    #[error("carrier {carrier} was full when loading container {container}")]
    CarrierOverflow {
        carrier: CarrierId,
        container: ContainerId,
    },

    #[error("carrier {carrier} is not registered as active")]
    UnknownCarrier { carrier: CarrierId },

    #[error("order {order} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        order: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// True when the error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {field} {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RejectReason;

    #[test]
    fn cancelled_is_detectable() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::LockPoisoned("registry").is_cancelled());
    }

    #[test]
    fn capacity_accounting_names_container_and_order() {
        let err = PipelineError::CapacityAccounting {
            container: 3,
            order: 77,
        };
        let text = err.to_string();
        assert!(text.contains("77"));
        assert!(text.contains('3'));
    }

    #[test]
    fn invalid_transition_carries_states() {
        let err = PipelineError::InvalidTransition {
            order: 1,
            from: OrderStatus::Rejected(RejectReason::Payment),
            to: OrderStatus::Picked,
        };
        match &err {
            PipelineError::InvalidTransition { from, to, .. } => {
                assert!(from.is_terminal());
                assert_eq!(*to, OrderStatus::Picked);
            }
            _ => panic!("expected InvalidTransition"),
        }
    }

    #[test]
    fn config_error_invalid_mentions_field() {
        let err = ConfigError::Invalid {
            field: "bays",
            message: "must be > 0".to_string(),
        };
        assert!(err.to_string().contains("bays"));
    }

    #[test]
    fn errors_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::Cancelled);
        assert_std_error(&ConfigError::Invalid {
            field: "x",
            message: String::new(),
        });
    }
}
