//! Workflow runner: one step invocation at a time
//!
//! `advance` is the unit of work the driver schedules. It resolves the
//! workflow for the instance's in-flight operation, runs the step at the
//! cursor under a timeout and folds the outcome back into the instance:
//!
//! - on success only `details` and `status_reason` are taken from the
//!   instance the step returned; the cursor then moves past the step
//! - a transient failure or a timeout hands back the instance unchanged
//! - a terminal failure marks the instance failed at the last completed step
//!
//! Completion happens inside the invocation that finishes the last step.

use crate::registry::ModuleRegistry;
use crate::step::StepStatus;
use broker_types::{
    BrokerError, Instance, Operation, Plan, Result, StepError, WorkflowCursor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Result of one invocation
#[derive(Debug)]
pub enum Advance {
    /// A step finished and more remain
    Progressed(Instance),
    /// The step reported external work still in progress
    Pending(Instance),
    /// The last step finished and the operation is complete
    Completed(Instance),
    /// The step failed transiently; the instance is as it was before the call
    Retry {
        instance: Instance,
        step: String,
        error: StepError,
    },
    /// The step failed terminally; the instance is now failed
    Failed {
        instance: Instance,
        step: String,
        error: StepError,
    },
}

impl Advance {
    pub fn instance(&self) -> &Instance {
        match self {
            Advance::Progressed(instance)
            | Advance::Pending(instance)
            | Advance::Completed(instance) => instance,
            Advance::Retry { instance, .. } | Advance::Failed { instance, .. } => instance,
        }
    }

    pub fn into_instance(self) -> Instance {
        match self {
            Advance::Progressed(instance)
            | Advance::Pending(instance)
            | Advance::Completed(instance) => instance,
            Advance::Retry { instance, .. } | Advance::Failed { instance, .. } => instance,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Advance::Completed(_))
    }
}

/// Executes single workflow steps for instances of registered services
#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    registry: Arc<ModuleRegistry>,
    step_timeout: Duration,
}

impl WorkflowRunner {
    pub fn new(registry: Arc<ModuleRegistry>, step_timeout: Duration) -> Self {
        Self {
            registry,
            step_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Plan whose workflow drives the in-flight operation. An update runs
    /// the workflow of the plan it moves to.
    fn workflow_plan(instance: &Instance, operation: Operation) -> &Plan {
        match (&instance.pending_update, operation) {
            (Some(update), Operation::Update) => &update.plan,
            _ => &instance.plan,
        }
    }

    /// Invoke the next step of the instance's in-flight workflow once.
    ///
    /// Errors are reserved for problems outside the step itself: no
    /// workflow in flight, an unknown service, or a module that cannot
    /// build its workflow.
    #[instrument(skip(self, instance), fields(instance_id = %instance.id, service_id = %instance.service_id))]
    pub async fn advance(&self, mut instance: Instance) -> Result<Advance> {
        let operation = instance
            .in_flight()
            .ok_or_else(|| BrokerError::InvalidTransition {
                instance_id: instance.id,
                from: instance.status.to_string(),
                to: "advance".to_string(),
            })?;

        let manager = self.registry.manager(&instance.service_id)?;
        let workflow = manager.workflow(Self::workflow_plan(&instance, operation), operation)?;
        workflow.validate()?;

        if instance.cursor.map(|c| c.operation) != Some(operation) {
            instance.cursor = Some(WorkflowCursor::start(operation));
        }
        let index = instance.next_step().unwrap_or(0);

        let Some(step) = workflow.get(index) else {
            instance.complete()?;
            tracing::info!(operation = %operation, status = %instance.status, "Workflow completed");
            return Ok(Advance::Completed(instance));
        };
        let step_name = step.name().to_string();

        let result = match tokio::time::timeout(self.step_timeout, step.execute(&instance)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::transient(format!(
                "timed out after {}s",
                self.step_timeout.as_secs_f64()
            ))),
        };

        match result {
            Ok(outcome) => {
                instance.details = outcome.instance.details;
                instance.status_reason = outcome.instance.status_reason;

                if outcome.status == StepStatus::Pending {
                    tracing::debug!(step = %step_name, index, "Step pending");
                    return Ok(Advance::Pending(instance));
                }

                instance.advance_cursor();
                tracing::debug!(step = %step_name, index, "Step done");

                if index + 1 >= workflow.len() {
                    instance.complete()?;
                    tracing::info!(operation = %operation, status = %instance.status, "Workflow completed");
                    Ok(Advance::Completed(instance))
                } else {
                    Ok(Advance::Progressed(instance))
                }
            }
            Err(error @ StepError::Transient(_)) => {
                tracing::warn!(step = %step_name, index, error = %error, "Step failed transiently");
                Ok(Advance::Retry {
                    instance,
                    step: step_name,
                    error,
                })
            }
            Err(error @ StepError::Terminal(_)) => {
                instance.fail(format!("step '{}': {}", step_name, error.reason()))?;
                tracing::error!(step = %step_name, index, error = %error, "Step failed terminally");
                Ok(Advance::Failed {
                    instance,
                    step: step_name,
                    error,
                })
            }
        }
    }
}
