//! Steps: the atomic units of asynchronous work
//!
//! A step inspects an instance and returns an updated copy. Steps must be
//! idempotent: the driver may invoke the same step again after a crash, a
//! timeout or a transient failure, so each implementation checks whether its
//! work is already done before acting.
//!
//! The runner keeps only the `details` and `status_reason` of the instance a
//! step returns. Lifecycle bookkeeping (status, cursor, parameters) belongs
//! to the runner.

use async_trait::async_trait;
use broker_types::{Instance, StepError};
use std::future::Future;
use std::sync::Arc;

/// Whether a step finished its work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Advance to the next step
    Done,
    /// External work still in progress; invoke this step again later
    Pending,
}

/// Successful result of a step invocation
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub instance: Instance,
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn done(instance: Instance) -> Self {
        Self {
            instance,
            status: StepStatus::Done,
        }
    }

    pub fn pending(instance: Instance) -> Self {
        Self {
            instance,
            status: StepStatus::Pending,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == StepStatus::Done
    }
}

/// A named, idempotent unit of workflow execution
#[async_trait]
pub trait Step: Send + Sync {
    /// Name, unique within its workflow
    fn name(&self) -> &str;

    /// Run the step once.
    ///
    /// On error the driver keeps the instance exactly as it was passed in.
    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError>;
}

/// Adapts an async closure into a [`Step`]
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Instance) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutcome, StepError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        (self.f)(instance.clone()).await
    }
}

/// Shorthand for a shared closure step.
pub fn step_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Step>
where
    F: Fn(Instance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutcome, StepError>> + Send + 'static,
{
    Arc::new(FnStep::new(name, f))
}

#[cfg(test)]
mod tests {
    use crate::testing::make_instance;
    use super::*;

    #[tokio::test]
    async fn test_fn_step_records_detail() {
        let step = step_fn("record", |mut instance: Instance| async move {
            instance
                .details
                .set_plain("server_name", "srv-1")
                .map_err(|e| StepError::terminal(e.to_string()))?;
            Ok(StepOutcome::done(instance))
        });

        let instance = make_instance("svc", "basic");
        let outcome = step.execute(&instance).await.unwrap();
        assert_eq!(step.name(), "record");
        assert!(outcome.is_done());
        assert_eq!(
            outcome.instance.details.plain().get_str("server_name"),
            Some("srv-1")
        );
        assert!(instance.details.is_empty());
    }

    #[tokio::test]
    async fn test_fn_step_error_passes_through() {
        let step = step_fn("flaky", |_instance: Instance| async move {
            Err::<StepOutcome, _>(StepError::transient("throttled"))
        });
        let err = step
            .execute(&make_instance("svc", "basic"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
