//! Shared setup for the fake-db integration tests.

#![allow(dead_code)]

use broker_engine::{Broker, BrokerConfig, InMemoryStore, ModuleRegistry};
use broker_fake::{FakeDbManager, InMemoryControlPlane};
use broker_types::{Instance, PlanId, ServiceId};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct TestEnv {
    pub plane: Arc<InMemoryControlPlane>,
    pub manager: Arc<FakeDbManager>,
    pub store: Arc<InMemoryStore>,
    pub broker: Broker,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_plane(InMemoryControlPlane::new())
    }

    pub fn with_plane(plane: InMemoryControlPlane) -> Self {
        let plane = Arc::new(plane);
        let manager = Arc::new(FakeDbManager::new(plane.clone()));
        let store = Arc::new(InMemoryStore::new());
        let broker = broker_over(manager.clone(), store.clone());
        Self {
            plane,
            manager,
            store,
            broker,
        }
    }

    /// A second broker over the same module and store, as after a restart.
    pub fn restarted(&self) -> Broker {
        broker_over(self.manager.clone(), self.store.clone())
    }

    pub async fn provision(&self, plan: &str, plain: Value) -> Instance {
        self.broker
            .provision(&service(), &PlanId::new(plan), plain, json!({}))
            .await
            .unwrap()
    }

    pub async fn ready_instance(&self, plan: &str) -> Instance {
        let instance = self.provision(plan, json!({"location": "eastus"})).await;
        self.broker.driver().drive(instance.id).await.unwrap()
    }
}

fn broker_over(manager: Arc<FakeDbManager>, store: Arc<InMemoryStore>) -> Broker {
    let registry = ModuleRegistry::new().with(manager).unwrap();
    Broker::new(registry, store, &BrokerConfig::immediate())
}

pub fn service() -> ServiceId {
    ServiceId::new("fake-db")
}
