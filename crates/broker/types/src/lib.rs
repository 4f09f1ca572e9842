//! Domain types for the service broker core
//!
//! This crate holds everything a service module and the workflow engine
//! share, with no runtime behavior attached:
//!
//! - [`payload`]: plain/secure parameter and detail payloads and their shapes
//! - [`Instance`] and its lifecycle [`InstanceStatus`]
//! - [`Binding`] and the consumer-facing [`Credentials`]
//! - [`Plan`], the immutable catalog entry selecting a workflow
//! - [`BrokerError`], the error taxonomy shared across the workspace

#![deny(unsafe_code)]

pub mod binding;
pub mod error;
pub mod ids;
pub mod instance;
pub mod payload;
pub mod plan;

pub use binding::{idempotency_key, Binding, Credentials};
pub use error::{BrokerError, ErrorKind, Result, StepError, ValidationError};
pub use ids::{BindingId, InstanceId, PlanId, ServiceId};
pub use instance::{Instance, InstanceStatus, Operation, PendingUpdate, WorkflowCursor};
pub use payload::{
    BindingDetails, BindingInput, BindingParameters, BindingState, FieldKind, FieldSpec,
    InstanceDetails, InstanceState, Payload, Plain, Provisioning, ProvisioningParameters, Role,
    Secure, SecureBindingDetails, SecureBindingParameters, SecureInstanceDetails,
    SecureProvisioningParameters, Sensitivity, ServiceShapes, Shape, ShapePair, Split,
};
pub use plan::Plan;
