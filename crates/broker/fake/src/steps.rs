//! Workflow steps of the fake-db service
//!
//! Every step reads what earlier steps recorded in the instance details and
//! checks the control plane before acting, so invoking a step twice leaves
//! the backend and the details as a single invocation would.

use crate::client::{ControlPlane, FirewallRule, ServerChanges, ServerSpec, ServerState};
use crate::plans::PlanRules;
use async_trait::async_trait;
use broker_engine::{Step, StepOutcome};
use broker_types::{Instance, Plan, Provisioning, Split, StepError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const PREFLIGHT: &str = "preflight";
pub const CREATE_SERVER: &str = "create_server";
pub const CREATE_DATABASE: &str = "create_database";
pub const CONFIGURE_FIREWALL: &str = "configure_firewall";
pub const UPDATE_SERVER: &str = "update_server";
pub const DELETE_DATABASE: &str = "delete_database";
pub const DELETE_SERVER: &str = "delete_server";

/// Name of the firewall rule the module manages
pub const FIREWALL_RULE: &str = "broker-managed";

pub(crate) fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

// ── Helpers ──────────────────────────────────────────────────────────

fn detail<'a>(instance: &'a Instance, key: &str) -> Result<&'a str, StepError> {
    instance
        .details
        .plain()
        .get_str(key)
        .ok_or_else(|| StepError::terminal(format!("instance details have no {}", key)))
}

fn set_detail(instance: &mut Instance, key: &str, value: impl Into<Value>) -> Result<(), StepError> {
    instance
        .details
        .set_plain(key, value)
        .map_err(|e| StepError::terminal(e.to_string()))
}

fn set_secure_detail(
    instance: &mut Instance,
    key: &str,
    value: impl Into<Value>,
) -> Result<(), StepError> {
    instance
        .details
        .set_secure(key, value)
        .map_err(|e| StepError::terminal(e.to_string()))
}

/// Plan the running workflow targets.
fn target_plan(instance: &Instance) -> &Plan {
    instance
        .pending_update
        .as_ref()
        .map(|update| &update.plan)
        .unwrap_or(&instance.plan)
}

fn rules(plan: &Plan) -> Result<PlanRules, StepError> {
    PlanRules::for_plan(plan.id.as_str())
        .ok_or_else(|| StepError::terminal(format!("no rules for {}", plan.id)))
}

/// Parameters as they will be once the running workflow completes.
fn effective_parameters(instance: &Instance) -> Result<Split<Provisioning>, StepError> {
    match &instance.pending_update {
        Some(update) => update
            .apply_to(&instance.parameters)
            .map_err(|e| StepError::terminal(e.to_string())),
        None => Ok(instance.parameters.clone()),
    }
}

fn tags(parameters: &Split<Provisioning>) -> Map<String, Value> {
    parameters
        .plain()
        .get("tags")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

// ── Provisioning ─────────────────────────────────────────────────────

/// Chooses resource names and the administrator password, and checks the
/// server name is not held by someone else.
pub struct Preflight {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for Preflight {
    fn name(&self) -> &str {
        PREFLIGHT
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        let mut instance = instance.clone();
        let short = instance.id.short();

        if instance.details.plain().get_str("server_name").is_none() {
            set_detail(&mut instance, "server_name", format!("fakedb-{}", short))?;
            set_detail(&mut instance, "database_name", format!("db_{}", short))?;
        }
        if instance.details.secure().get_str("admin_password").is_none() {
            let password = instance
                .parameters
                .secure()
                .get_str("admin_password")
                .map(str::to_string)
                .unwrap_or_else(generate_password);
            set_secure_detail(&mut instance, "admin_password", password)?;
        }

        let server_name = detail(&instance, "server_name")?.to_string();
        if let Some(server) = self.plane.get_server(&server_name).await? {
            if server.owner != instance.id {
                return Err(StepError::terminal(format!(
                    "server name '{}' is taken",
                    server_name
                )));
            }
        }

        instance.status_reason = Some("preflight checks passed".to_string());
        Ok(StepOutcome::done(instance))
    }
}

/// Creates the server and waits until it is ready.
pub struct CreateServer {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for CreateServer {
    fn name(&self) -> &str {
        CREATE_SERVER
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        let mut instance = instance.clone();
        let server_name = detail(&instance, "server_name")?.to_string();

        let server = match self.plane.get_server(&server_name).await? {
            Some(server) => server,
            None => {
                let parameters = &instance.parameters;
                let location = parameters
                    .plain()
                    .get_str("location")
                    .ok_or_else(|| StepError::terminal("location is not set"))?;
                let sku = match parameters.plain().get_str("sku") {
                    Some(sku) => sku.to_string(),
                    None => rules(&instance.plan)?.default_sku().to_string(),
                };
                let admin_password = instance
                    .details
                    .secure()
                    .get_str("admin_password")
                    .ok_or_else(|| StepError::terminal("administrator password is not set"))?;

                let spec = ServerSpec {
                    name: server_name.clone(),
                    owner: instance.id,
                    location: location.to_string(),
                    sku,
                    admin_password: admin_password.to_string(),
                    tags: tags(parameters),
                };
                tracing::info!(instance_id = %instance.id, server = %server_name, "Creating server");
                self.plane.create_server(spec).await?
            }
        };

        if server.owner != instance.id {
            return Err(StepError::terminal(format!(
                "server name '{}' is taken",
                server_name
            )));
        }

        if server.state == ServerState::Creating {
            instance.status_reason = Some(format!("server {} is being created", server_name));
            return Ok(StepOutcome::pending(instance));
        }

        set_detail(&mut instance, "fqdn", server.fqdn)?;
        instance.status_reason = Some(format!("server {} is ready", server_name));
        Ok(StepOutcome::done(instance))
    }
}

/// Creates the application database.
pub struct CreateDatabase {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for CreateDatabase {
    fn name(&self) -> &str {
        CREATE_DATABASE
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        let server_name = detail(instance, "server_name")?;
        let database_name = detail(instance, "database_name")?;

        self.plane.create_database(server_name, database_name).await?;

        let mut instance = instance.clone();
        instance.status_reason = Some(format!("database {} is ready", database_name));
        Ok(StepOutcome::done(instance))
    }
}

/// Points the managed firewall rule at the requested address range.
pub struct ConfigureFirewall {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for ConfigureFirewall {
    fn name(&self) -> &str {
        CONFIGURE_FIREWALL
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        let server_name = detail(instance, "server_name")?;
        let parameters = effective_parameters(instance)?;
        let start_ip = parameters
            .plain()
            .get_str("firewall_start_ip")
            .unwrap_or("0.0.0.0");
        let end_ip = parameters
            .plain()
            .get_str("firewall_end_ip")
            .unwrap_or(start_ip);

        self.plane
            .set_firewall_rule(
                server_name,
                FirewallRule {
                    name: FIREWALL_RULE.to_string(),
                    start_ip: start_ip.to_string(),
                    end_ip: end_ip.to_string(),
                },
            )
            .await?;

        Ok(StepOutcome::done(instance.clone()))
    }
}

// ── Updating ─────────────────────────────────────────────────────────

/// Applies SKU, tag and password changes to the server.
pub struct UpdateServer {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for UpdateServer {
    fn name(&self) -> &str {
        UPDATE_SERVER
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        let mut instance = instance.clone();
        let server_name = detail(&instance, "server_name")?.to_string();
        let parameters = effective_parameters(&instance)?;
        let rules = rules(target_plan(&instance))?;

        let sku = match parameters.plain().get_str("sku") {
            Some(sku) => sku.to_string(),
            None => rules.default_sku().to_string(),
        };
        let admin_password = instance
            .pending_update
            .as_ref()
            .and_then(|update| update.parameters.secure().get_str("admin_password"))
            .map(str::to_string);

        self.plane
            .update_server(
                &server_name,
                ServerChanges {
                    sku: Some(sku),
                    admin_password: admin_password.clone(),
                    tags: Some(tags(&parameters)),
                },
            )
            .await?;

        if let Some(password) = admin_password {
            set_secure_detail(&mut instance, "admin_password", password)?;
        }
        instance.status_reason = Some(format!("server {} updated", server_name));
        Ok(StepOutcome::done(instance))
    }
}

// ── Deprovisioning ───────────────────────────────────────────────────

/// Drops the application database if the server still has it.
pub struct DeleteDatabase {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for DeleteDatabase {
    fn name(&self) -> &str {
        DELETE_DATABASE
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        let plain = instance.details.plain();
        if let (Some(server_name), Some(database_name)) =
            (plain.get_str("server_name"), plain.get_str("database_name"))
        {
            match self.plane.delete_database(server_name, database_name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(StepOutcome::done(instance.clone()))
    }
}

/// Deletes the server with everything left on it.
pub struct DeleteServer {
    pub plane: Arc<dyn ControlPlane>,
}

#[async_trait]
impl Step for DeleteServer {
    fn name(&self) -> &str {
        DELETE_SERVER
    }

    async fn execute(&self, instance: &Instance) -> Result<StepOutcome, StepError> {
        if let Some(server_name) = instance.details.plain().get_str("server_name") {
            if self.plane.delete_server(server_name).await? {
                tracing::info!(instance_id = %instance.id, server = %server_name, "Server deleted");
            }
        }
        Ok(StepOutcome::done(instance.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryControlPlane;
    use crate::plans;
    use broker_engine::ServiceManager;
    use broker_types::{PendingUpdate, PlanId};
    use serde_json::json;

    fn fixture() -> (Arc<InMemoryControlPlane>, crate::FakeDbManager) {
        let plane = Arc::new(InMemoryControlPlane::new());
        let manager = crate::FakeDbManager::new(plane.clone());
        (plane, manager)
    }

    fn new_instance(manager: &crate::FakeDbManager, plan: &str) -> Instance {
        let plan = manager
            .plans()
            .into_iter()
            .find(|p| p.id == PlanId::new(plan))
            .unwrap();
        let parameters = manager
            .parse_provisioning_parameters(
                json!({"location": "eastus", "firewall_start_ip": "10.0.0.1"}),
                json!({}),
            )
            .unwrap();
        Instance::new(plans::service_id(), plan, parameters, manager.empty_details())
    }

    async fn run_twice(step: &dyn Step, instance: Instance) -> (Instance, Instance) {
        let once = step.execute(&instance).await.unwrap().instance;
        let twice = step.execute(&once).await.unwrap().instance;
        (once, twice)
    }

    #[tokio::test]
    async fn test_preflight_is_idempotent() {
        let (plane, manager) = fixture();
        let step = Preflight { plane };
        let (once, twice) = run_twice(&step, new_instance(&manager, "basic")).await;

        assert_eq!(once.details, twice.details);
        let password = once.details.secure().get_str("admin_password").unwrap();
        assert_eq!(password.len(), 24);
        assert!(once
            .details
            .plain()
            .get_str("server_name")
            .unwrap()
            .starts_with("fakedb-"));
    }

    #[tokio::test]
    async fn test_preflight_keeps_supplied_password() {
        let (plane, manager) = fixture();
        let mut instance = new_instance(&manager, "basic");
        instance
            .parameters
            .set_secure("admin_password", "correct-horse-battery")
            .unwrap();

        let outcome = Preflight { plane }.execute(&instance).await.unwrap();
        assert_eq!(
            outcome.instance.details.secure().get_str("admin_password"),
            Some("correct-horse-battery")
        );
    }

    #[tokio::test]
    async fn test_create_server_is_idempotent() {
        let (plane, manager) = fixture();
        let instance = Preflight {
            plane: plane.clone(),
        }
        .execute(&new_instance(&manager, "basic"))
        .await
        .unwrap()
        .instance;

        let step = CreateServer {
            plane: plane.clone(),
        };
        let (once, twice) = run_twice(&step, instance).await;
        assert_eq!(once.details, twice.details);
        assert!(once.details.plain().get_str("fqdn").is_some());
        assert_eq!(plane.calls("create_server"), 1);
        assert_eq!(plane.server_count(), 1);
    }

    #[tokio::test]
    async fn test_create_server_pending_until_ready() {
        let plane = Arc::new(InMemoryControlPlane::new().with_ready_after_polls(2));
        let manager = crate::FakeDbManager::new(plane.clone());
        let instance = Preflight {
            plane: plane.clone(),
        }
        .execute(&new_instance(&manager, "basic"))
        .await
        .unwrap()
        .instance;
        let step = CreateServer {
            plane: plane.clone(),
        };

        let first = step.execute(&instance).await.unwrap();
        assert!(!first.is_done());
        assert!(first.instance.details.plain().get_str("fqdn").is_none());

        let mut outcome = first;
        for _ in 0..3 {
            if outcome.is_done() {
                break;
            }
            outcome = step.execute(&outcome.instance).await.unwrap();
        }
        assert!(outcome.is_done());
        assert_eq!(plane.calls("create_server"), 1);
    }

    #[tokio::test]
    async fn test_remaining_steps_are_idempotent() {
        let (plane, manager) = fixture();
        let mut instance = new_instance(&manager, "standard");
        for step in [
            &Preflight {
                plane: plane.clone(),
            } as &dyn Step,
            &CreateServer {
                plane: plane.clone(),
            },
        ] {
            instance = step.execute(&instance).await.unwrap().instance;
        }
        let server = instance.details.plain().get_str("server_name").unwrap().to_string();

        let (once, twice) = run_twice(
            &CreateDatabase {
                plane: plane.clone(),
            },
            instance.clone(),
        )
        .await;
        assert_eq!(once.details, twice.details);

        run_twice(
            &ConfigureFirewall {
                plane: plane.clone(),
            },
            instance.clone(),
        )
        .await;
        let rules = plane.firewall_rules(&server).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].start_ip, "10.0.0.1");
        assert_eq!(rules[0].end_ip, "10.0.0.1");

        run_twice(
            &DeleteDatabase {
                plane: plane.clone(),
            },
            instance.clone(),
        )
        .await;
        run_twice(
            &DeleteServer {
                plane: plane.clone(),
            },
            instance,
        )
        .await;
        assert_eq!(plane.server_count(), 0);
    }

    #[tokio::test]
    async fn test_update_server_applies_pending_values() {
        let (plane, manager) = fixture();
        let mut instance = new_instance(&manager, "basic");
        for step in [
            &Preflight {
                plane: plane.clone(),
            } as &dyn Step,
            &CreateServer {
                plane: plane.clone(),
            },
        ] {
            instance = step.execute(&instance).await.unwrap().instance;
        }
        instance.complete().unwrap();

        let parameters = manager
            .parse_provisioning_parameters(
                json!({"sku": "B2", "tags": {"env": "prod"}}),
                json!({"admin_password": "another-long-secret"}),
            )
            .unwrap();
        instance
            .begin_update(PendingUpdate::new(instance.plan.clone(), parameters))
            .unwrap();

        let step = UpdateServer {
            plane: plane.clone(),
        };
        let (once, twice) = run_twice(&step, instance).await;
        assert_eq!(once.details, twice.details);
        assert_eq!(
            once.details.secure().get_str("admin_password"),
            Some("another-long-secret")
        );

        let server_name = once.details.plain().get_str("server_name").unwrap();
        let server = plane.get_server(server_name).await.unwrap().unwrap();
        assert_eq!(server.sku, "B2");
        assert_eq!(server.tags.get("env"), Some(&json!("prod")));
    }

    #[tokio::test]
    async fn test_deprovision_steps_tolerate_missing_resources() {
        let (plane, manager) = fixture();
        let instance = new_instance(&manager, "basic");
        DeleteDatabase {
            plane: plane.clone(),
        }
        .execute(&instance)
        .await
        .unwrap();
        DeleteServer { plane }.execute(&instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_throttling_is_transient() {
        let (plane, manager) = fixture();
        let instance = Preflight {
            plane: plane.clone(),
        }
        .execute(&new_instance(&manager, "basic"))
        .await
        .unwrap()
        .instance;

        plane.fail_next("create_server", 1);
        let err = CreateServer { plane }.execute(&instance).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
