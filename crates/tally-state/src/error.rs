//! Error types for the Tally metric state.

use thiserror::Error;

use crate::types::MetricKind;

/// Result type alias for metric state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while validating, storing, or persisting metrics.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid metric name: {0:?}")]
    InvalidName(String),

    #[error("invalid metric type: {0:?}")]
    InvalidKind(String),

    #[error("{kind} metric {id:?} requires a {field} field")]
    MissingValue {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("{kind} metric {id:?} must not carry a {field} field")]
    UnexpectedValue {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    #[error("counter {0:?} delta must not be negative")]
    NegativeDelta(String),

    #[error("counter {0:?} overflowed")]
    CounterOverflow(String),

    #[error("invalid {kind} value {raw:?}")]
    InvalidValue { kind: MetricKind, raw: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StateError {
    /// Whether this error was caused by the submitted metric itself rather
    /// than by the persistence layer. Validation errors are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StateError::InvalidName(_)
                | StateError::InvalidKind(_)
                | StateError::MissingValue { .. }
                | StateError::UnexpectedValue { .. }
                | StateError::NegativeDelta(_)
                | StateError::CounterOverflow(_)
                | StateError::InvalidValue { .. }
        )
    }
}
