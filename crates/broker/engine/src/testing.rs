//! Fixtures shared by the engine's unit tests.

use crate::manager::ServiceManager;
use crate::step::{step_fn, Step, StepOutcome};
use crate::workflow::{Deprovisioner, Provisioner, Updater, Workflow};
use async_trait::async_trait;
use broker_types::{
    Binding, BindingInput, BindingState, BrokerError, Credentials, Instance, Plan, Provisioning,
    Result, ServiceId, ServiceShapes, Shape, ShapePair, Split, StepError, ValidationError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn open_shapes() -> ShapePair {
    ShapePair {
        plain: Arc::new(Shape::open()),
        secure: Arc::new(Shape::open()),
    }
}

pub fn make_instance(service: &str, plan: &str) -> Instance {
    let service = ServiceId::new(service);
    Instance::new(
        service.clone(),
        Plan::new(service, plan, plan),
        Split::empty(&open_shapes()),
        Split::empty(&open_shapes()),
    )
}

/// A step that records its name in the plain details and counts calls.
pub fn recording_step(name: &'static str, calls: Arc<AtomicUsize>) -> Arc<dyn Step> {
    step_fn(name, move |mut instance: Instance| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            instance
                .details
                .set_plain(name, true)
                .map_err(|e| StepError::terminal(e.to_string()))?;
            Ok(StepOutcome::done(instance))
        }
    })
}

/// A step that fails transiently the first `failures` times it runs.
pub fn flaky_step(name: &'static str, failures: usize, calls: Arc<AtomicUsize>) -> Arc<dyn Step> {
    step_fn(name, move |instance: Instance| {
        let calls = Arc::clone(&calls);
        async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < failures {
                return Err(StepError::transient(format!("attempt {} throttled", attempt + 1)));
            }
            Ok(StepOutcome::done(instance))
        }
    })
}

/// A step whose external operation never finishes.
pub fn pending_step(name: &'static str, calls: Arc<AtomicUsize>) -> Arc<dyn Step> {
    step_fn(name, move |instance: Instance| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::pending(instance))
        }
    })
}

/// A step that always fails terminally.
pub fn broken_step(name: &'static str) -> Arc<dyn Step> {
    step_fn(name, |_instance: Instance| async move {
        Err::<StepOutcome, _>(StepError::terminal("quota exceeded"))
    })
}

/// Manager with open shapes and caller-supplied workflows.
pub struct ScriptedManager {
    service_id: ServiceId,
    plans: Vec<Plan>,
    shapes: ServiceShapes,
    provisioner: Workflow,
    updater: Workflow,
    deprovisioner: Workflow,
    pub binds: AtomicUsize,
    pub unbinds: AtomicUsize,
}

impl ScriptedManager {
    pub fn new(service: &str) -> Self {
        let service_id = ServiceId::new(service);
        Self {
            plans: vec![Plan::new(service_id.clone(), "basic", "basic")],
            service_id,
            shapes: ServiceShapes {
                provisioning: open_shapes(),
                instance_details: open_shapes(),
                binding_parameters: open_shapes(),
                binding_details: open_shapes(),
            },
            provisioner: Workflow::provisioner(),
            updater: Workflow::updater(),
            deprovisioner: Workflow::deprovisioner(),
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
        }
    }

    pub fn with_provisioner(mut self, workflow: Workflow) -> Self {
        self.provisioner = workflow;
        self
    }

    pub fn with_updater(mut self, workflow: Workflow) -> Self {
        self.updater = workflow;
        self
    }

    pub fn with_deprovisioner(mut self, workflow: Workflow) -> Self {
        self.deprovisioner = workflow;
        self
    }
}

#[async_trait]
impl ServiceManager for ScriptedManager {
    fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    fn plans(&self) -> Vec<Plan> {
        self.plans.clone()
    }

    fn shapes(&self) -> &ServiceShapes {
        &self.shapes
    }

    fn validate_provisioning_parameters(
        &self,
        _plan: &Plan,
        parameters: &Split<Provisioning>,
    ) -> std::result::Result<(), ValidationError> {
        if parameters.plain().get_str("location") == Some("nowhere") {
            return Err(ValidationError::field("location", "unsupported"));
        }
        Ok(())
    }

    fn provisioner(&self, _plan: &Plan) -> Result<Provisioner> {
        Ok(self.provisioner.clone())
    }

    fn validate_updating_parameters(
        &self,
        instance: &Instance,
    ) -> std::result::Result<(), ValidationError> {
        match &instance.pending_update {
            Some(update) if update.parameters.plain().contains("location") => {
                Err(ValidationError::field("location", "cannot be changed"))
            }
            _ => Ok(()),
        }
    }

    fn updater(&self, _plan: &Plan) -> Result<Updater> {
        Ok(self.updater.clone())
    }

    fn validate_binding_parameters(
        &self,
        _parameters: &Split<BindingInput>,
    ) -> std::result::Result<(), ValidationError> {
        Ok(())
    }

    async fn bind(
        &self,
        instance: &Instance,
        parameters: &Split<BindingInput>,
    ) -> Result<Split<BindingState>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let key = broker_types::idempotency_key(&instance.id, parameters);
        let mut details = self.empty_binding_state();
        details.set_plain("login", format!("user_{}", &key[..8]))?;
        details.set_secure("password", "hunter2hunter2")?;
        Ok(details)
    }

    fn credentials(&self, _instance: &Instance, binding: &Binding) -> Result<Credentials> {
        let username = binding
            .details
            .plain()
            .get_str("login")
            .ok_or_else(|| BrokerError::data_consistency("binding has no login"))?;
        Ok(Credentials::new().with("username", username))
    }

    async fn unbind(&self, _instance: &Instance, _binding: &Binding) -> Result<()> {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deprovisioner(&self, _plan: &Plan) -> Result<Deprovisioner> {
        Ok(self.deprovisioner.clone())
    }
}
