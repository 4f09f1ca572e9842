//! Workflows: ordered lists of steps for one lifecycle operation
//!
//! A module builds one workflow per (plan, operation). The driver never
//! holds a workflow across invocations: it asks the module again each time
//! and resumes at the step index persisted on the instance.

use crate::step::Step;
use broker_types::{BrokerError, Operation, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// An ordered sequence of named steps
#[derive(Clone)]
pub struct Workflow {
    operation: Operation,
    steps: Vec<Arc<dyn Step>>,
}

/// Steps that provision an instance
pub type Provisioner = Workflow;
/// Steps that update an instance
pub type Updater = Workflow;
/// Steps that deprovision an instance
pub type Deprovisioner = Workflow;

impl Workflow {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    pub fn provisioner() -> Provisioner {
        Self::new(Operation::Provision)
    }

    pub fn updater() -> Updater {
        Self::new(Operation::Update)
    }

    pub fn deprovisioner() -> Deprovisioner {
        Self::new(Operation::Deprovision)
    }

    /// Append a step.
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Append an already shared step.
    pub fn shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Step names must be unique; they identify progress in logs.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(BrokerError::Configuration(format!(
                    "duplicate step '{}' in {} workflow",
                    step.name(),
                    self.operation
                )));
            }
        }
        Ok(())
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Step>> {
        self.steps.get(index)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("operation", &self.operation)
            .field("steps", &self.step_names())
            .finish()
    }
}
