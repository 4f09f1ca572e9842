//! The ServiceManager contract
//!
//! One implementation exists per backing service. The broker holds only
//! `Arc<dyn ServiceManager>` and reaches every service-specific behavior
//! through this trait:
//!
//! - empty payload constructors, so untyped input can be parsed into the
//!   right concrete shape without knowing which service is in play
//! - pure, deterministic validation of provisioning, updating and binding
//!   parameters
//! - the provisioner, updater and deprovisioner workflow for a plan
//! - synchronous bind/unbind and the credential projection
//!
//! Workflow getters assume their input was validated already and do not
//! validate again. Plan lookup failures and validation failures are
//! reported as distinct error kinds.

use crate::workflow::{Deprovisioner, Provisioner, Updater, Workflow};
use async_trait::async_trait;
use broker_types::{
    Binding, BindingDetails, BindingInput, BindingParameters, BindingState, Credentials,
    Instance, InstanceDetails, InstanceState, Operation, Plan, Provisioning,
    ProvisioningParameters, Result, SecureBindingDetails, SecureBindingParameters,
    SecureInstanceDetails, SecureProvisioningParameters, ServiceId, ServiceShapes, Split,
    ValidationError,
};
use serde_json::Value;
use std::sync::Arc;

/// Lifecycle contract implemented by every service module
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Service this manager is responsible for
    fn service_id(&self) -> &ServiceId;

    /// Plans this service offers
    fn plans(&self) -> Vec<Plan>;

    /// Shapes of every payload the service deals with
    fn shapes(&self) -> &ServiceShapes;

    // ── Empty payloads ───────────────────────────────────────────────

    fn empty_provisioning_parameters(&self) -> ProvisioningParameters {
        ProvisioningParameters::empty(Arc::clone(&self.shapes().provisioning.plain))
    }

    fn empty_secure_provisioning_parameters(&self) -> SecureProvisioningParameters {
        SecureProvisioningParameters::empty(Arc::clone(&self.shapes().provisioning.secure))
    }

    fn empty_instance_details(&self) -> InstanceDetails {
        InstanceDetails::empty(Arc::clone(&self.shapes().instance_details.plain))
    }

    fn empty_secure_instance_details(&self) -> SecureInstanceDetails {
        SecureInstanceDetails::empty(Arc::clone(&self.shapes().instance_details.secure))
    }

    fn empty_binding_parameters(&self) -> BindingParameters {
        BindingParameters::empty(Arc::clone(&self.shapes().binding_parameters.plain))
    }

    fn empty_secure_binding_parameters(&self) -> SecureBindingParameters {
        SecureBindingParameters::empty(Arc::clone(&self.shapes().binding_parameters.secure))
    }

    fn empty_binding_details(&self) -> BindingDetails {
        BindingDetails::empty(Arc::clone(&self.shapes().binding_details.plain))
    }

    fn empty_secure_binding_details(&self) -> SecureBindingDetails {
        SecureBindingDetails::empty(Arc::clone(&self.shapes().binding_details.secure))
    }

    // ── Provisioning ─────────────────────────────────────────────────

    /// Reject parameters that are missing, malformed or not permitted by
    /// the plan. Must not touch the network.
    fn validate_provisioning_parameters(
        &self,
        plan: &Plan,
        parameters: &Split<Provisioning>,
    ) -> std::result::Result<(), ValidationError>;

    /// Steps that provision an instance of `plan`
    fn provisioner(&self, plan: &Plan) -> Result<Provisioner>;

    // ── Updating ─────────────────────────────────────────────────────

    /// Validate `instance.pending_update` against the instance as it
    /// currently is.
    fn validate_updating_parameters(
        &self,
        instance: &Instance,
    ) -> std::result::Result<(), ValidationError>;

    /// Steps that update an instance to `plan`
    fn updater(&self, plan: &Plan) -> Result<Updater>;

    // ── Binding ──────────────────────────────────────────────────────

    fn validate_binding_parameters(
        &self,
        parameters: &Split<BindingInput>,
    ) -> std::result::Result<(), ValidationError>;

    /// Grant access to a ready instance.
    ///
    /// Retrying with equal parameters must return the same details without
    /// creating a second backend resource.
    async fn bind(
        &self,
        instance: &Instance,
        parameters: &Split<BindingInput>,
    ) -> Result<Split<BindingState>>;

    /// Assemble consumer credentials from stored details. Pure.
    fn credentials(&self, instance: &Instance, binding: &Binding) -> Result<Credentials>;

    /// Revoke access. A binding already gone from the backend is not an
    /// error.
    async fn unbind(&self, instance: &Instance, binding: &Binding) -> Result<()>;

    // ── Deprovisioning ───────────────────────────────────────────────

    /// Steps that deprovision an instance of `plan`
    fn deprovisioner(&self, plan: &Plan) -> Result<Deprovisioner>;

    // ── Provided helpers ─────────────────────────────────────────────

    /// Workflow for an operation on `plan`.
    fn workflow(&self, plan: &Plan, operation: Operation) -> Result<Workflow> {
        match operation {
            Operation::Provision => self.provisioner(plan),
            Operation::Update => self.updater(plan),
            Operation::Deprovision => self.deprovisioner(plan),
        }
    }

    /// Parse untyped provisioning input through the empty payloads.
    fn parse_provisioning_parameters(
        &self,
        plain: Value,
        secure: Value,
    ) -> std::result::Result<Split<Provisioning>, ValidationError> {
        let mut plain_params = self.empty_provisioning_parameters();
        plain_params.merge_json(plain)?;
        let mut secure_params = self.empty_secure_provisioning_parameters();
        secure_params.merge_json(secure)?;
        Split::new(plain_params, secure_params)
    }

    /// Parse untyped binding input through the empty payloads.
    fn parse_binding_parameters(
        &self,
        plain: Value,
        secure: Value,
    ) -> std::result::Result<Split<BindingInput>, ValidationError> {
        let mut plain_params = self.empty_binding_parameters();
        plain_params.merge_json(plain)?;
        let mut secure_params = self.empty_secure_binding_parameters();
        secure_params.merge_json(secure)?;
        Split::new(plain_params, secure_params)
    }

    /// Empty details for a new instance.
    fn empty_details(&self) -> Split<InstanceState> {
        Split::empty(&self.shapes().instance_details)
    }

    /// Empty details for a new binding.
    fn empty_binding_state(&self) -> Split<BindingState> {
        Split::empty(&self.shapes().binding_details)
    }
}
