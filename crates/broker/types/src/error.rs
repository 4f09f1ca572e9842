//! Error taxonomy for the broker core.
//!
//! Validation and plan-lookup errors are raised before any workflow exists.
//! Step errors carry no instance state: the driver always keeps the instance
//! as it was before the failing step.

use crate::{BindingId, InstanceId, PlanId, ServiceId};
use thiserror::Error;

/// A parameter set was malformed or not permitted by the plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_validation(.field, .message))]
pub struct ValidationError {
    /// Offending field, when the problem is attributable to one.
    pub field: Option<String>,
    /// Human readable reason.
    pub message: String,
}

fn render_validation(field: &Option<String>, message: &str) -> String {
    match field {
        Some(field) => format!("invalid parameter '{}': {}", field, message),
        None => format!("invalid parameters: {}", message),
    }
}

impl ValidationError {
    /// Error attributed to a single field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Error about the parameter set as a whole.
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::field(field, "is required")
    }
}

/// Failure reported by a single workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Expected to succeed when the step is invoked again.
    #[error("transient: {0}")]
    Transient(String),

    /// The workflow cannot proceed.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl StepError {
    pub fn transient(reason: impl Into<String>) -> Self {
        StepError::Transient(reason.into())
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        StepError::Terminal(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            StepError::Transient(reason) | StepError::Terminal(reason) => reason,
        }
    }
}

/// Coarse classification used by callers to choose a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected input; surfaced as a 422-class response by a front end.
    Validation,
    /// Unknown service or plan; surfaced as a 400-class response.
    PlanNotFound,
    /// Retried by the driver with backoff.
    TransientStep,
    /// Surfaced to an operator; the instance is marked failed.
    TerminalStep,
    /// Stored details are missing or incompatible.
    DataConsistency,
    /// The request conflicts with the current lifecycle state.
    Conflict,
    /// Referenced record does not exist.
    NotFound,
    /// Infrastructure failure outside the workflow model.
    Internal,
}

/// Errors surfaced by the broker core.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("plan {plan_id} not found for {service_id}")]
    PlanNotFound {
        service_id: ServiceId,
        plan_id: PlanId,
    },

    #[error("service not found: {0}")]
    ServiceNotFound(ServiceId),

    #[error("step '{step}' failed transiently: {reason}")]
    TransientStep { step: String, reason: String },

    #[error("step '{step}' failed terminally: {reason}")]
    TerminalStep { step: String, reason: String },

    #[error("step '{step}' still failing after {attempts} attempts: {reason}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        reason: String,
    },

    #[error("data consistency error: {0}")]
    DataConsistency(String),

    #[error("invalid status transition for {instance_id}: {from} -> {to}")]
    InvalidTransition {
        instance_id: InstanceId,
        from: String,
        to: String,
    },

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("binding not found: {0}")]
    BindingNotFound(BindingId),

    #[error("a workflow is already in flight for {0}")]
    InstanceBusy(InstanceId),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Wrap a step-local error with the name of the step that raised it.
    pub fn from_step(step: impl Into<String>, error: StepError) -> Self {
        let step = step.into();
        match error {
            StepError::Transient(reason) => BrokerError::TransientStep { step, reason },
            StepError::Terminal(reason) => BrokerError::TerminalStep { step, reason },
        }
    }

    pub fn plan_not_found(service_id: &ServiceId, plan_id: &PlanId) -> Self {
        BrokerError::PlanNotFound {
            service_id: service_id.clone(),
            plan_id: plan_id.clone(),
        }
    }

    pub fn data_consistency(reason: impl Into<String>) -> Self {
        BrokerError::DataConsistency(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Validation(_) => ErrorKind::Validation,
            BrokerError::PlanNotFound { .. } | BrokerError::ServiceNotFound(_) => {
                ErrorKind::PlanNotFound
            }
            BrokerError::TransientStep { .. } => ErrorKind::TransientStep,
            BrokerError::TerminalStep { .. } | BrokerError::RetriesExhausted { .. } => {
                ErrorKind::TerminalStep
            }
            BrokerError::DataConsistency(_) => ErrorKind::DataConsistency,
            BrokerError::InvalidTransition { .. } | BrokerError::InstanceBusy(_) => {
                ErrorKind::Conflict
            }
            BrokerError::InstanceNotFound(_) | BrokerError::BindingNotFound(_) => {
                ErrorKind::NotFound
            }
            BrokerError::Backend(_) | BrokerError::Storage(_) | BrokerError::Configuration(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only transient step failures are worth invoking again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStep
    }
}

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
