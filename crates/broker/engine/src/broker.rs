//! Broker facade: the entry points a front end calls
//!
//! Every asynchronous operation is gated here: untyped input is parsed
//! through the module's empty payloads and validated before an instance is
//! created or transitioned. A rejected request leaves no partial state.
//! Work itself is left to the [`Driver`].

use crate::config::BrokerConfig;
use crate::driver::Driver;
use crate::locks::{InstanceLocks, KeyLocks};
use crate::manager::ServiceManager;
use crate::registry::ModuleRegistry;
use crate::store::BrokerStore;
use broker_types::{
    idempotency_key, Binding, BindingId, BrokerError, Credentials, Instance, InstanceId,
    InstanceStatus, Operation, PendingUpdate, Plan, PlanId, Result, ServiceId,
};
use serde_json::Value;
use std::sync::Arc;

/// Front door of the broker core
pub struct Broker {
    registry: Arc<ModuleRegistry>,
    store: Arc<dyn BrokerStore>,
    locks: InstanceLocks,
    bind_locks: KeyLocks,
    driver: Arc<Driver>,
}

impl Broker {
    pub fn new(
        registry: ModuleRegistry,
        store: Arc<dyn BrokerStore>,
        config: &BrokerConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let locks = InstanceLocks::new();
        let driver = Arc::new(Driver::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            locks.clone(),
            config,
        ));
        Self {
            registry,
            store,
            locks,
            bind_locks: KeyLocks::new(),
            driver,
        }
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Every plan on offer
    pub fn catalog(&self) -> Vec<Plan> {
        self.registry.catalog()
    }

    pub async fn instance(&self, id: InstanceId) -> Result<Instance> {
        self.store
            .get_instance(&id)
            .await?
            .ok_or(BrokerError::InstanceNotFound(id))
    }

    pub async fn binding(&self, id: BindingId) -> Result<Binding> {
        self.store
            .get_binding(&id)
            .await?
            .ok_or(BrokerError::BindingNotFound(id))
    }

    pub async fn bindings(&self, instance_id: InstanceId) -> Result<Vec<Binding>> {
        self.store.list_bindings_for_instance(&instance_id).await
    }

    fn manager_for(&self, instance: &Instance) -> Result<Arc<dyn ServiceManager>> {
        self.registry.manager(&instance.service_id)
    }

    // ── Asynchronous operations ──────────────────────────────────────

    /// Accept a provisioning request.
    ///
    /// The new instance is stored in `provisioning` with its cursor at the
    /// first step; nothing has run yet.
    pub async fn provision(
        &self,
        service_id: &ServiceId,
        plan_id: &PlanId,
        parameters: Value,
        secure_parameters: Value,
    ) -> Result<Instance> {
        let manager = self.registry.manager(service_id)?;
        let plan = self.registry.plan(service_id, plan_id)?;

        let parameters = manager.parse_provisioning_parameters(parameters, secure_parameters)?;
        parameters.check_required()?;
        manager.validate_provisioning_parameters(&plan, &parameters)?;
        manager.provisioner(&plan)?.validate()?;

        let instance = Instance::new(
            service_id.clone(),
            plan,
            parameters,
            manager.empty_details(),
        );
        self.store.upsert_instance(instance.clone()).await?;

        tracing::info!(instance_id = %instance.id, service_id = %service_id, plan_id = %plan_id, "Provisioning accepted");
        Ok(instance)
    }

    /// Accept an update of a ready instance.
    ///
    /// `plan_id` selects a new plan; `None` keeps the current one. The
    /// parameters are a partial overlay of the current ones; a key given as
    /// `null` is removed.
    pub async fn update(
        &self,
        id: InstanceId,
        plan_id: Option<&PlanId>,
        parameters: Value,
        secure_parameters: Value,
    ) -> Result<Instance> {
        let _lease = self.locks.try_acquire(id)?;
        let instance = self.instance(id).await?;
        let manager = self.manager_for(&instance)?;

        let plan = match plan_id {
            Some(plan_id) => self.registry.plan(&instance.service_id, plan_id)?,
            None => instance.plan.clone(),
        };
        let cleared: Vec<String> = cleared_keys(&parameters)
            .chain(cleared_keys(&secure_parameters))
            .collect();
        let parameters = manager.parse_provisioning_parameters(parameters, secure_parameters)?;
        let update = PendingUpdate::new(plan.clone(), parameters).clearing(cleared);
        update.apply_to(&instance.parameters)?.check_required()?;

        let mut candidate = instance.clone();
        candidate.begin_update(update)?;
        manager.validate_updating_parameters(&candidate)?;
        manager.updater(&plan)?.validate()?;

        self.store.upsert_instance(candidate.clone()).await?;
        tracing::info!(instance_id = %id, plan_id = %plan.id, "Update accepted");
        Ok(candidate)
    }

    /// Accept a deprovisioning request.
    ///
    /// Permitted from `ready`, from `failed` and from an abandoned
    /// `provisioning`.
    pub async fn deprovision(&self, id: InstanceId) -> Result<Instance> {
        let _lease = self.locks.try_acquire(id)?;
        let mut instance = self.instance(id).await?;
        let manager = self.manager_for(&instance)?;
        manager.deprovisioner(&instance.plan)?.validate()?;

        instance.begin_deprovision()?;
        self.store.upsert_instance(instance.clone()).await?;
        tracing::info!(instance_id = %id, "Deprovisioning accepted");
        Ok(instance)
    }

    /// Operator retry of a failed workflow. Resumes after the last step
    /// that completed.
    pub async fn retry(&self, id: InstanceId) -> Result<Operation> {
        let _lease = self.locks.try_acquire(id)?;
        let mut instance = self.instance(id).await?;
        let operation = instance.retry()?;
        self.store.upsert_instance(instance).await?;
        tracing::info!(instance_id = %id, operation = %operation, "Retry accepted");
        Ok(operation)
    }

    // ── Synchronous operations ───────────────────────────────────────

    /// Bind to a ready instance.
    ///
    /// A repeated request with equal parameters returns the binding
    /// created by the first one. Binds queue only behind requests with the
    /// same idempotency key, so distinct binds on one instance run
    /// concurrently with each other and with its workflows.
    pub async fn bind(
        &self,
        instance_id: InstanceId,
        parameters: Value,
        secure_parameters: Value,
    ) -> Result<Binding> {
        let instance = self.instance(instance_id).await?;
        if instance.status != InstanceStatus::Ready {
            return Err(BrokerError::InvalidTransition {
                instance_id,
                from: instance.status.to_string(),
                to: "bind".to_string(),
            });
        }
        let manager = self.manager_for(&instance)?;

        let parameters = manager.parse_binding_parameters(parameters, secure_parameters)?;
        parameters.check_required()?;
        manager.validate_binding_parameters(&parameters)?;

        let key = idempotency_key(&instance_id, &parameters);
        let _guard = self.bind_locks.lock(&key).await;
        if let Some(existing) = self.store.find_binding_by_key(&key).await? {
            tracing::debug!(instance_id = %instance_id, binding_id = %existing.id, "Bind repeated, returning existing binding");
            return Ok(existing);
        }

        let details = manager.bind(&instance, &parameters).await?;
        let binding = Binding::new(instance_id, parameters, details);
        self.store.upsert_binding(binding.clone()).await?;

        tracing::info!(instance_id = %instance_id, binding_id = %binding.id, "Bound");
        Ok(binding)
    }

    /// Remove a binding. Backend revocation happens before the record is
    /// dropped, so a failed unbind can be repeated.
    pub async fn unbind(&self, binding_id: BindingId) -> Result<()> {
        let binding = self.binding(binding_id).await?;
        let _guard = self.bind_locks.lock(&binding.idempotency_key).await;
        // Reload: a queued unbind may already have removed it.
        let binding = self.binding(binding_id).await?;
        let instance = self.instance(binding.instance_id).await?;
        let manager = self.manager_for(&instance)?;

        manager.unbind(&instance, &binding).await?;
        self.store.delete_binding(&binding_id).await?;

        tracing::info!(instance_id = %instance.id, binding_id = %binding_id, "Unbound");
        Ok(())
    }

    /// Project the consumer credentials of a binding.
    pub async fn credentials(&self, binding_id: BindingId) -> Result<Credentials> {
        let binding = self.binding(binding_id).await?;
        let instance = self.instance(binding.instance_id).await?;
        self.manager_for(&instance)?.credentials(&instance, &binding)
    }
}

/// Top-level keys a patch sets to `null`.
fn cleared_keys(patch: &Value) -> impl Iterator<Item = String> + '_ {
    patch
        .as_object()
        .into_iter()
        .flat_map(|fields| fields.iter())
        .filter(|(_, value)| value.is_null())
        .map(|(key, _)| key.clone())
}
