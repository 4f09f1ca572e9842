//! Service instances and their lifecycle
//!
//! ```text
//! provisioning ──► ready ──► updating ──► ready
//!      │             │
//!      │             └─────► deprovisioning ──► deleted
//!      ▼
//!   failed { operation, last_completed_step }
//! ```
//!
//! Any in-flight status can move to `failed`. A failed instance stays
//! failed until an operator retries the failed operation or starts a
//! deprovision.

use crate::error::{BrokerError, Result, ValidationError};
use crate::payload::{InstanceState, Provisioning, Split};
use crate::{InstanceId, Plan, ServiceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ── Operations and status ────────────────────────────────────────────

/// An asynchronous lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Provision,
    Update,
    Deprovision,
}

impl Operation {
    /// Status an instance holds while this operation is in flight.
    pub fn in_flight_status(&self) -> InstanceStatus {
        match self {
            Operation::Provision => InstanceStatus::Provisioning,
            Operation::Update => InstanceStatus::Updating,
            Operation::Deprovision => InstanceStatus::Deprovisioning,
        }
    }

    /// Status reached once every step succeeded.
    pub fn completed_status(&self) -> InstanceStatus {
        match self {
            Operation::Provision | Operation::Update => InstanceStatus::Ready,
            Operation::Deprovision => InstanceStatus::Deleted,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Provision => write!(f, "provision"),
            Operation::Update => write!(f, "update"),
            Operation::Deprovision => write!(f, "deprovision"),
        }
    }
}

/// Instance lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstanceStatus {
    Provisioning,
    Ready,
    Updating,
    Deprovisioning,
    Deleted,
    Failed {
        /// Operation that failed
        operation: Operation,
        /// Index of the last step that completed, if any did
        last_completed_step: Option<usize>,
        /// Failure reason
        reason: String,
    },
}

impl InstanceStatus {
    /// Operation currently in flight, if any.
    pub fn in_flight(&self) -> Option<Operation> {
        match self {
            InstanceStatus::Provisioning => Some(Operation::Provision),
            InstanceStatus::Updating => Some(Operation::Update),
            InstanceStatus::Deprovisioning => Some(Operation::Deprovision),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, InstanceStatus::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Updating => "updating",
            InstanceStatus::Deprovisioning => "deprovisioning",
            InstanceStatus::Deleted => "deleted",
            InstanceStatus::Failed { .. } => "failed",
        }
    }

    /// Whether the lifecycle permits moving to `next`.
    pub fn can_transition_to(&self, next: &InstanceStatus) -> bool {
        use InstanceStatus::*;
        match (self, next) {
            (Provisioning, Ready | Failed { .. } | Deprovisioning) => true,
            (Ready, Updating | Deprovisioning) => true,
            (Updating, Ready | Failed { .. }) => true,
            (Deprovisioning, Deleted | Failed { .. }) => true,
            (Failed { .. }, Deprovisioning) => true,
            (Failed { operation, .. }, next) => next.in_flight() == Some(*operation),
            _ => false,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Failed {
                operation,
                last_completed_step,
                ..
            } => match last_completed_step {
                Some(step) => write!(f, "failed({}, after step {})", operation, step),
                None => write!(f, "failed({}, before first step)", operation),
            },
            other => f.write_str(other.name()),
        }
    }
}

/// Resume point of the in-flight workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCursor {
    pub operation: Operation,
    /// Index of the next step to invoke
    pub next_step: usize,
}

impl WorkflowCursor {
    pub fn start(operation: Operation) -> Self {
        Self {
            operation,
            next_step: 0,
        }
    }

    pub fn last_completed(&self) -> Option<usize> {
        self.next_step.checked_sub(1)
    }
}

/// Parameters of an accepted update, applied when the updater completes
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    /// Target plan (the current plan when the plan is unchanged)
    pub plan: Plan,
    /// Changed values, overlaid onto the current parameters on completion
    pub parameters: Split<Provisioning>,
    /// Keys removed from the current parameters on completion
    pub cleared: BTreeSet<String>,
}

impl PendingUpdate {
    pub fn new(plan: Plan, parameters: Split<Provisioning>) -> Self {
        Self {
            plan,
            parameters,
            cleared: BTreeSet::new(),
        }
    }

    pub fn clearing<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.cleared.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Parameters as they will be once this update completes.
    pub fn apply_to(
        &self,
        current: &Split<Provisioning>,
    ) -> std::result::Result<Split<Provisioning>, ValidationError> {
        let mut merged = current.overlay(&self.parameters)?;
        for key in &self.cleared {
            merged.remove(key);
        }
        Ok(merged)
    }
}

// ── Instance ─────────────────────────────────────────────────────────

/// A provisioned (or provisioning) unit of a backing service
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Unique instance identifier
    pub id: InstanceId,

    /// Service this instance belongs to
    pub service_id: ServiceId,

    /// Current plan
    pub plan: Plan,

    /// Current provisioning parameters
    pub parameters: Split<Provisioning>,

    /// Update accepted but not yet completed
    pub pending_update: Option<PendingUpdate>,

    /// Service-specific state recorded by workflow steps
    pub details: Split<InstanceState>,

    /// Lifecycle status
    pub status: InstanceStatus,

    /// Resume point of the in-flight workflow
    pub cursor: Option<WorkflowCursor>,

    /// Last progress or failure message
    pub status_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// A new instance about to be provisioned.
    pub fn new(
        service_id: ServiceId,
        plan: Plan,
        parameters: Split<Provisioning>,
        details: Split<InstanceState>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::generate(),
            service_id,
            plan,
            parameters,
            pending_update: None,
            details,
            status: InstanceStatus::Provisioning,
            cursor: Some(WorkflowCursor::start(Operation::Provision)),
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: InstanceStatus) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(BrokerError::InvalidTransition {
                instance_id: self.id,
                from: self.status.to_string(),
                to: next.name().to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Operation whose workflow is in flight.
    pub fn in_flight(&self) -> Option<Operation> {
        self.status.in_flight()
    }

    /// Index of the next step to run, when a workflow is in flight.
    pub fn next_step(&self) -> Option<usize> {
        match (self.in_flight(), self.cursor) {
            (Some(op), Some(cursor)) if cursor.operation == op => Some(cursor.next_step),
            (Some(_), _) => Some(0),
            (None, _) => None,
        }
    }

    /// Accept an update; the instance must be ready.
    pub fn begin_update(&mut self, update: PendingUpdate) -> Result<()> {
        self.transition(InstanceStatus::Updating)?;
        self.pending_update = Some(update);
        self.cursor = Some(WorkflowCursor::start(Operation::Update));
        self.status_reason = None;
        Ok(())
    }

    /// Start deprovisioning from ready, failed, or abandoned provisioning.
    pub fn begin_deprovision(&mut self) -> Result<()> {
        self.transition(InstanceStatus::Deprovisioning)?;
        self.pending_update = None;
        self.cursor = Some(WorkflowCursor::start(Operation::Deprovision));
        self.status_reason = None;
        Ok(())
    }

    /// Operator-driven retry of a failed workflow, resuming after the last
    /// completed step.
    pub fn retry(&mut self) -> Result<Operation> {
        let (operation, resume_at) = match &self.status {
            InstanceStatus::Failed {
                operation,
                last_completed_step,
                ..
            } => (*operation, last_completed_step.map_or(0, |s| s + 1)),
            other => {
                return Err(BrokerError::InvalidTransition {
                    instance_id: self.id,
                    from: other.to_string(),
                    to: "retry".to_string(),
                })
            }
        };
        self.transition(operation.in_flight_status())?;
        self.cursor = Some(WorkflowCursor {
            operation,
            next_step: resume_at,
        });
        self.status_reason = None;
        Ok(operation)
    }

    /// Record that the step at the cursor completed.
    pub fn advance_cursor(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.next_step += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Finish the in-flight workflow.
    ///
    /// A completed update folds its pending parameters and plan into the
    /// instance.
    pub fn complete(&mut self) -> Result<Operation> {
        let operation = self.in_flight().ok_or_else(|| BrokerError::InvalidTransition {
            instance_id: self.id,
            from: self.status.to_string(),
            to: "completed".to_string(),
        })?;
        let merged = match &self.pending_update {
            Some(update) if operation == Operation::Update => {
                Some((update.apply_to(&self.parameters)?, update.plan.clone()))
            }
            _ => None,
        };
        self.transition(operation.completed_status())?;
        if let Some((parameters, plan)) = merged {
            self.parameters = parameters;
            self.plan = plan;
        }
        self.pending_update = None;
        self.cursor = None;
        self.status_reason = None;
        Ok(operation)
    }

    /// Mark the in-flight workflow as terminally failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        let operation = self.in_flight().ok_or_else(|| BrokerError::InvalidTransition {
            instance_id: self.id,
            from: self.status.to_string(),
            to: "failed".to_string(),
        })?;
        let reason = reason.into();
        let last_completed_step = self
            .cursor
            .filter(|c| c.operation == operation)
            .and_then(|c| c.last_completed());
        self.transition(InstanceStatus::Failed {
            operation,
            last_completed_step,
            reason: reason.clone(),
        })?;
        self.status_reason = Some(reason);
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.status == InstanceStatus::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ShapePair, Split};

    fn make_instance() -> Instance {
        let service = ServiceId::new("fake-db");
        let shapes = ShapePair::default();
        Instance::new(
            service.clone(),
            Plan::new(service, "basic", "Basic"),
            Split::empty(&shapes),
            Split::empty(&shapes),
        )
    }

    fn pending(instance: &Instance) -> PendingUpdate {
        PendingUpdate::new(instance.plan.clone(), Split::empty(&ShapePair::default()))
    }

    #[test]
    fn test_new_instance_is_provisioning() {
        let instance = make_instance();
        assert_eq!(instance.status, InstanceStatus::Provisioning);
        assert_eq!(instance.next_step(), Some(0));
    }

    #[test]
    fn test_provision_completes_to_ready() {
        let mut instance = make_instance();
        instance.advance_cursor();
        assert_eq!(instance.complete().unwrap(), Operation::Provision);
        assert_eq!(instance.status, InstanceStatus::Ready);
        assert!(instance.cursor.is_none());
        assert_eq!(instance.next_step(), None);
    }

    #[test]
    fn test_update_cycle() {
        let mut instance = make_instance();
        instance.complete().unwrap();
        let update = pending(&instance);
        instance.begin_update(update).unwrap();
        assert_eq!(instance.status, InstanceStatus::Updating);
        assert_eq!(instance.next_step(), Some(0));
        instance.complete().unwrap();
        assert_eq!(instance.status, InstanceStatus::Ready);
        assert!(instance.pending_update.is_none());
    }

    #[test]
    fn test_update_clears_and_patches_parameters() {
        let service = ServiceId::new("fake-db");
        let shapes = ShapePair {
            plain: std::sync::Arc::new(crate::payload::Shape::open()),
            secure: std::sync::Arc::new(crate::payload::Shape::open()),
        };
        let mut current = Split::empty(&shapes);
        current.set_plain("sku", "S1").unwrap();
        current.set_plain("firewall_start_ip", "10.0.0.1").unwrap();
        let mut instance = Instance::new(
            service.clone(),
            Plan::new(service, "standard", "Standard"),
            current,
            Split::empty(&shapes),
        );
        instance.complete().unwrap();

        let mut patch = Split::empty(&shapes);
        patch.set_plain("sku", "S2").unwrap();
        let update = PendingUpdate::new(instance.plan.clone(), patch).clearing(["firewall_start_ip"]);
        instance.begin_update(update).unwrap();
        instance.complete().unwrap();

        assert_eq!(instance.parameters.plain().get_str("sku"), Some("S2"));
        assert!(!instance.parameters.plain().contains("firewall_start_ip"));
    }

    #[test]
    fn test_update_requires_ready() {
        let mut instance = make_instance();
        let update = pending(&instance);
        let err = instance.begin_update(update).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidTransition { .. }));
        assert_eq!(instance.status, InstanceStatus::Provisioning);
    }

    #[test]
    fn test_failure_records_last_completed_step() {
        let mut instance = make_instance();
        instance.advance_cursor();
        instance.advance_cursor();
        instance.fail("quota exceeded").unwrap();
        assert_eq!(
            instance.status,
            InstanceStatus::Failed {
                operation: Operation::Provision,
                last_completed_step: Some(1),
                reason: "quota exceeded".to_string(),
            }
        );
        assert_eq!(instance.next_step(), None);
    }

    #[test]
    fn test_failed_instance_does_not_revert() {
        let mut instance = make_instance();
        instance.fail("boom").unwrap();
        assert!(!instance.status.can_transition_to(&InstanceStatus::Ready));
        assert!(instance.complete().is_err());
        assert!(instance.status.is_failed());
    }

    #[test]
    fn test_retry_resumes_after_last_completed_step() {
        let mut instance = make_instance();
        instance.advance_cursor();
        instance.fail("boom").unwrap();
        assert_eq!(instance.retry().unwrap(), Operation::Provision);
        assert_eq!(instance.status, InstanceStatus::Provisioning);
        assert_eq!(instance.next_step(), Some(1));
    }

    #[test]
    fn test_retry_requires_failed() {
        let mut instance = make_instance();
        assert!(instance.retry().is_err());
    }

    #[test]
    fn test_deprovision_from_failed() {
        let mut instance = make_instance();
        instance.fail("boom").unwrap();
        instance.begin_deprovision().unwrap();
        assert_eq!(instance.next_step(), Some(0));
        instance.complete().unwrap();
        assert!(instance.is_deleted());
        assert!(!instance.status.can_transition_to(&InstanceStatus::Provisioning));
    }

    #[test]
    fn test_status_display() {
        let status = InstanceStatus::Failed {
            operation: Operation::Update,
            last_completed_step: None,
            reason: "x".into(),
        };
        assert_eq!(status.to_string(), "failed(update, before first step)");
        assert_eq!(InstanceStatus::Ready.to_string(), "ready");
    }
}
