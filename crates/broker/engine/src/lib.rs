//! Service broker engine
//!
//! Runs the asynchronous lifecycle of managed-service instances as ordered,
//! idempotent, resumable steps, and hosts the synchronous bind/unbind path.
//!
//! - [`ServiceManager`]: the contract every service module implements
//! - [`Workflow`] and [`Step`]: the units a module hands to the engine
//! - [`WorkflowRunner`]: one step invocation with outcome folding
//! - [`Driver`]: persistence, retries, per-instance exclusivity, polling
//! - [`Broker`]: the validated entry points a front end calls

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod driver;
pub mod locks;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod step;
pub mod store;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::Broker;
pub use config::{BrokerConfig, LoggingConfig, RunnerConfig, SchedulerConfig};
pub use driver::Driver;
pub use locks::{InstanceLease, InstanceLocks, KeyGuard, KeyLocks};
pub use manager::ServiceManager;
pub use registry::ModuleRegistry;
pub use retry::RetryPolicy;
pub use runner::{Advance, WorkflowRunner};
pub use step::{step_fn, FnStep, Step, StepOutcome, StepStatus};
pub use store::{BindingStore, BrokerStore, InMemoryStore, InstanceStore};
pub use workflow::{Deprovisioner, Provisioner, Updater, Workflow};
