//! Driver: persists progress and schedules step invocations
//!
//! The driver owns the only path by which workflow state changes. Every
//! invocation happens under the instance's lease and its result is stored
//! before the next one starts, so a crash resumes at the persisted cursor.

use crate::config::{BrokerConfig, SchedulerConfig};
use crate::locks::InstanceLocks;
use crate::registry::ModuleRegistry;
use crate::retry::RetryPolicy;
use crate::runner::{Advance, WorkflowRunner};
use crate::store::BrokerStore;
use broker_types::{BrokerError, Instance, InstanceId, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Drives in-flight instances through their workflows
pub struct Driver {
    runner: WorkflowRunner,
    store: Arc<dyn BrokerStore>,
    locks: InstanceLocks,
    retry: RetryPolicy,
    scheduler: SchedulerConfig,
    pending_poll_interval: Duration,
    max_pending_polls: u32,
}

impl Driver {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        store: Arc<dyn BrokerStore>,
        locks: InstanceLocks,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            runner: WorkflowRunner::new(registry, config.runner.step_timeout()),
            store,
            locks,
            retry: config.retry.clone(),
            scheduler: config.scheduler.clone(),
            pending_poll_interval: config.runner.pending_poll_interval(),
            max_pending_polls: config.runner.max_pending_polls.max(1),
        }
    }

    pub fn locks(&self) -> &InstanceLocks {
        &self.locks
    }

    async fn load(&self, id: InstanceId) -> Result<Instance> {
        self.store
            .get_instance(&id)
            .await?
            .ok_or(BrokerError::InstanceNotFound(id))
    }

    /// Store the result of an invocation. A deleted instance is removed
    /// along with its bindings.
    async fn persist(&self, instance: &Instance) -> Result<()> {
        if instance.is_deleted() {
            for binding in self.store.list_bindings_for_instance(&instance.id).await? {
                self.store.delete_binding(&binding.id).await?;
            }
            self.store.delete_instance(&instance.id).await?;
            tracing::info!(instance_id = %instance.id, "Instance deleted");
            return Ok(());
        }
        self.store.upsert_instance(instance.clone()).await
    }

    /// Run exactly one step invocation and persist its result.
    ///
    /// Transient failures are reported as [`Advance::Retry`] without
    /// touching the stored instance; retry scheduling is left to the
    /// caller.
    pub async fn step_once(&self, id: InstanceId) -> Result<Advance> {
        let _lease = self.locks.try_acquire(id)?;
        let instance = self.load(id).await?;
        let advance = self.runner.advance(instance).await?;
        if !matches!(advance, Advance::Retry { .. }) {
            self.persist(advance.instance()).await?;
        }
        Ok(advance)
    }

    /// Drive an instance until its in-flight operation completes or fails.
    ///
    /// Transient failures are retried with backoff. Once a step exhausts
    /// its attempts the instance is marked failed and `RetriesExhausted`
    /// is returned; a terminal step failure is returned as `TerminalStep`.
    /// A step that stays pending for `max_pending_polls` polls in a row is
    /// left in flight and returned as is.
    pub async fn drive(&self, id: InstanceId) -> Result<Instance> {
        let (_open, shutdown) = watch::channel(false);
        self.drive_until(id, shutdown).await
    }

    /// [`drive`](Self::drive) that stops invoking steps once `shutdown`
    /// flips to true. The instance is then returned still in flight at its
    /// persisted cursor.
    pub async fn drive_until(
        &self,
        id: InstanceId,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Instance> {
        let _lease = self.locks.try_acquire(id)?;
        let mut instance = self.load(id).await?;
        let mut attempts = 0u32;
        let mut polls = 0u32;

        loop {
            if *shutdown.borrow() {
                tracing::debug!(instance_id = %id, "Shutdown requested, leaving workflow in flight");
                return Ok(instance);
            }
            match self.runner.advance(instance).await? {
                Advance::Progressed(next) => {
                    self.persist(&next).await?;
                    attempts = 0;
                    polls = 0;
                    instance = next;
                }
                Advance::Pending(next) => {
                    self.persist(&next).await?;
                    attempts = 0;
                    polls += 1;
                    if polls >= self.max_pending_polls {
                        tracing::debug!(instance_id = %id, polls, "Step still pending, yielding to the next sweep");
                        return Ok(next);
                    }
                    instance = next;
                    if !pause(self.pending_poll_interval, &mut shutdown).await {
                        return Ok(instance);
                    }
                }
                Advance::Completed(done) => {
                    self.persist(&done).await?;
                    return Ok(done);
                }
                Advance::Retry {
                    instance: unchanged,
                    step,
                    error,
                } => {
                    attempts += 1;
                    if !self.retry.should_retry(attempts) {
                        let mut failed = unchanged;
                        failed.fail(format!(
                            "step '{}' still failing after {} attempts: {}",
                            step,
                            attempts,
                            error.reason()
                        ))?;
                        self.persist(&failed).await?;
                        tracing::error!(instance_id = %id, step = %step, attempts, "Retries exhausted");
                        return Err(BrokerError::RetriesExhausted {
                            step,
                            attempts,
                            reason: error.reason().to_string(),
                        });
                    }
                    let delay = self.retry.backoff(attempts);
                    tracing::debug!(instance_id = %id, step = %step, attempts, delay_ms = delay.as_millis() as u64, "Retrying step");
                    instance = unchanged;
                    if !pause(delay, &mut shutdown).await {
                        return Ok(instance);
                    }
                }
                Advance::Failed {
                    instance: failed,
                    step,
                    error,
                } => {
                    self.persist(&failed).await?;
                    return Err(BrokerError::from_step(step, error));
                }
            }
        }
    }

    /// Drive every in-flight instance once, at most `max_concurrent_workflows`
    /// at a time. Returns how many reached completion.
    pub async fn sweep(&self) -> Result<usize> {
        let (_open, shutdown) = watch::channel(false);
        self.sweep_until(shutdown).await
    }

    /// [`sweep`](Self::sweep) whose drives stop once `shutdown` flips to true.
    pub async fn sweep_until(&self, shutdown: watch::Receiver<bool>) -> Result<usize> {
        let in_flight = self.store.list_in_flight().await?;
        if in_flight.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = in_flight.len(), "Sweeping in-flight instances");

        let completed = AtomicUsize::new(0);
        futures::stream::iter(in_flight)
            .for_each_concurrent(self.scheduler.max_concurrent_workflows.max(1), |instance| {
                let completed = &completed;
                let shutdown = shutdown.clone();
                async move {
                    match self.drive_until(instance.id, shutdown).await {
                        Ok(done) if done.in_flight().is_none() => {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            tracing::debug!(instance_id = %instance.id, "Workflow still in flight");
                        }
                        Err(BrokerError::InstanceBusy(_)) => {
                            tracing::debug!(instance_id = %instance.id, "Instance busy, skipping");
                        }
                        Err(e) => {
                            tracing::warn!(instance_id = %instance.id, error = %e, "Workflow did not complete");
                        }
                    }
                }
            })
            .await;
        Ok(completed.into_inner())
    }

    /// Sweep on an interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.scheduler.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_secs = self.scheduler.poll_interval_secs,
            max_concurrent = self.scheduler.max_concurrent_workflows,
            "Driver started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_until(shutdown.clone()).await {
                        tracing::error!(error = %e, "Sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Driver stopped");
    }
}

/// Sleep for `delay` unless shutdown is signalled first. Returns whether to
/// keep going; a dropped sender counts as shutdown.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
