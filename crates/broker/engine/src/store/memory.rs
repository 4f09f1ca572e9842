//! In-memory storage implementation

use super::traits::*;
use async_trait::async_trait;
use broker_types::{Binding, BindingId, Instance, InstanceId, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    instances: Arc<RwLock<HashMap<InstanceId, Instance>>>,
    bindings: Arc<RwLock<HashMap<BindingId, Binding>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn get_instance(&self, id: &InstanceId) -> Result<Option<Instance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).cloned())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let instances = self.instances.read().await;
        Ok(instances.values().cloned().collect())
    }

    async fn list_in_flight(&self) -> Result<Vec<Instance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.in_flight().is_some())
            .cloned()
            .collect())
    }

    async fn upsert_instance(&self, instance: Instance) -> Result<()> {
        let mut instances = self.instances.write().await;
        instances.insert(instance.id, instance);
        Ok(())
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<bool> {
        let mut instances = self.instances.write().await;
        Ok(instances.remove(id).is_some())
    }
}

#[async_trait]
impl BindingStore for InMemoryStore {
    async fn get_binding(&self, id: &BindingId) -> Result<Option<Binding>> {
        let bindings = self.bindings.read().await;
        Ok(bindings.get(id).cloned())
    }

    async fn find_binding_by_key(&self, idempotency_key: &str) -> Result<Option<Binding>> {
        let bindings = self.bindings.read().await;
        Ok(bindings
            .values()
            .find(|b| b.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn list_bindings_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<Binding>> {
        let bindings = self.bindings.read().await;
        Ok(bindings
            .values()
            .filter(|b| &b.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn upsert_binding(&self, binding: Binding) -> Result<()> {
        let mut bindings = self.bindings.write().await;
        bindings.insert(binding.id, binding);
        Ok(())
    }

    async fn delete_binding(&self, id: &BindingId) -> Result<bool> {
        let mut bindings = self.bindings.write().await;
        Ok(bindings.remove(id).is_some())
    }
}
