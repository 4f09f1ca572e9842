//! Module registry: maps services to their managers
//!
//! Modules are registered once at startup. Lookups distinguish an unknown
//! service from an unknown plan of a known service.

use crate::manager::ServiceManager;
use broker_types::{BrokerError, Plan, PlanId, Result, ServiceId};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of service modules
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    managers: HashMap<ServiceId, Arc<dyn ServiceManager>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. A service may be registered only once.
    pub fn register(&mut self, manager: Arc<dyn ServiceManager>) -> Result<()> {
        let service_id = manager.service_id().clone();
        if self.managers.contains_key(&service_id) {
            return Err(BrokerError::Configuration(format!(
                "{} registered twice",
                service_id
            )));
        }

        let mut seen = Vec::new();
        for plan in manager.plans() {
            if plan.service_id != service_id {
                return Err(BrokerError::Configuration(format!(
                    "{} lists {} owned by {}",
                    service_id, plan.id, plan.service_id
                )));
            }
            if seen.contains(&plan.id) {
                return Err(BrokerError::Configuration(format!(
                    "{} lists {} twice",
                    service_id, plan.id
                )));
            }
            seen.push(plan.id);
        }

        tracing::info!(service_id = %service_id, plans = seen.len(), "Service module registered");
        self.managers.insert(service_id, manager);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, manager: Arc<dyn ServiceManager>) -> Result<Self> {
        self.register(manager)?;
        Ok(self)
    }

    /// Manager of a service
    pub fn manager(&self, service_id: &ServiceId) -> Result<Arc<dyn ServiceManager>> {
        self.managers
            .get(service_id)
            .cloned()
            .ok_or_else(|| BrokerError::ServiceNotFound(service_id.clone()))
    }

    /// Look up a plan of a registered service
    pub fn plan(&self, service_id: &ServiceId, plan_id: &PlanId) -> Result<Plan> {
        let manager = self.manager(service_id)?;
        manager
            .plans()
            .into_iter()
            .find(|plan| &plan.id == plan_id)
            .ok_or_else(|| BrokerError::plan_not_found(service_id, plan_id))
    }

    /// Every plan of every registered service, ordered by service
    pub fn catalog(&self) -> Vec<Plan> {
        let mut services = self.services();
        services.sort();
        services
            .iter()
            .filter_map(|id| self.managers.get(id))
            .flat_map(|manager| manager.plans())
            .collect()
    }

    pub fn services(&self) -> Vec<ServiceId> {
        self.managers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("services", &self.services())
            .finish()
    }
}
