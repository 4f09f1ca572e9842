//! Errors reported by the fake vendor control plane

use broker_types::{BrokerError, StepError};
use thiserror::Error;

/// Failure of a control plane call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    /// Rate limited or briefly unavailable; worth retrying
    #[error("{operation} throttled")]
    Throttled { operation: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A resource with that name exists and belongs to someone else
    #[error("{kind} '{name}' already exists")]
    Conflict { kind: &'static str, name: String },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl ControlPlaneError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ControlPlaneError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ControlPlaneError::Throttled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound { .. })
    }
}

impl From<ControlPlaneError> for StepError {
    fn from(err: ControlPlaneError) -> Self {
        if err.is_transient() {
            StepError::transient(err.to_string())
        } else {
            StepError::terminal(err.to_string())
        }
    }
}

impl From<ControlPlaneError> for BrokerError {
    fn from(err: ControlPlaneError) -> Self {
        BrokerError::Backend(err.to_string())
    }
}
