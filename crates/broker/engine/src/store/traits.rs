//! Storage trait definitions

use async_trait::async_trait;
use broker_types::{Binding, BindingId, Instance, InstanceId, Result};

/// Combined storage trait
pub trait BrokerStore: InstanceStore + BindingStore + Send + Sync {}

impl<T> BrokerStore for T where T: InstanceStore + BindingStore + Send + Sync {}

/// Storage for instances
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Get an instance by ID
    async fn get_instance(&self, id: &InstanceId) -> Result<Option<Instance>>;

    /// List all instances
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Instances with a workflow in flight
    async fn list_in_flight(&self) -> Result<Vec<Instance>>;

    /// Create or update an instance
    async fn upsert_instance(&self, instance: Instance) -> Result<()>;

    /// Delete an instance by ID
    async fn delete_instance(&self, id: &InstanceId) -> Result<bool>;
}

/// Storage for bindings
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Get a binding by ID
    async fn get_binding(&self, id: &BindingId) -> Result<Option<Binding>>;

    /// Find the binding created by an equal bind request
    async fn find_binding_by_key(&self, idempotency_key: &str) -> Result<Option<Binding>>;

    /// List bindings of one instance
    async fn list_bindings_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<Binding>>;

    /// Create or update a binding
    async fn upsert_binding(&self, binding: Binding) -> Result<()>;

    /// Delete a binding by ID
    async fn delete_binding(&self, id: &BindingId) -> Result<bool>;
}
