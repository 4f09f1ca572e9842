//! ServiceManager implementation of the fake-db service

use crate::client::{ControlPlane, Login};
use crate::plans::{self, PlanRules, LOCATIONS, MIN_PASSWORD_LEN};
use crate::steps::{
    generate_password, ConfigureFirewall, CreateDatabase, CreateServer, DeleteDatabase,
    DeleteServer, Preflight, UpdateServer,
};
use async_trait::async_trait;
use broker_engine::{Deprovisioner, Provisioner, ServiceManager, Updater, Workflow};
use broker_types::{
    idempotency_key, Binding, BindingInput, BindingState, BrokerError, Credentials, Instance,
    Plan, Provisioning, Result, ServiceId, ServiceShapes, Split, ValidationError,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Port the fake servers listen on
pub const PORT: u16 = 5432;

/// Roles a binding may request
pub const ROLES: &[&str] = &["reader", "owner"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProvisioningFields {
    location: Option<String>,
    sku: Option<String>,
    tags: Map<String, Value>,
    firewall_start_ip: Option<String>,
    firewall_end_ip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecureProvisioningFields {
    admin_password: Option<String>,
}

/// Reference module managing fake database servers
pub struct FakeDbManager {
    service_id: ServiceId,
    shapes: ServiceShapes,
    plane: Arc<dyn ControlPlane>,
}

impl FakeDbManager {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            service_id: plans::service_id(),
            shapes: plans::shapes(),
            plane,
        }
    }

    fn rules(&self, plan: &Plan) -> Result<PlanRules> {
        PlanRules::for_plan(plan.id.as_str())
            .ok_or_else(|| BrokerError::plan_not_found(&self.service_id, &plan.id))
    }

    fn decode(
        parameters: &Split<Provisioning>,
    ) -> std::result::Result<(ProvisioningFields, SecureProvisioningFields), ValidationError> {
        Ok((parameters.plain().decode()?, parameters.secure().decode()?))
    }

    /// Rules shared by provisioning and updating. `fields` holds only the
    /// values being set.
    fn check_fields(
        rules: &PlanRules,
        fields: &ProvisioningFields,
        secure: &SecureProvisioningFields,
    ) -> std::result::Result<(), ValidationError> {
        if let Some(location) = &fields.location {
            if !LOCATIONS.contains(&location.as_str()) {
                return Err(ValidationError::field(
                    "location",
                    format!("must be one of {:?}", LOCATIONS),
                ));
            }
        }
        if let Some(sku) = &fields.sku {
            if !rules.skus.contains(&sku.as_str()) {
                return Err(ValidationError::field(
                    "sku",
                    format!("must be one of {:?} for this plan", rules.skus),
                ));
            }
        }
        if let Some(password) = &secure.admin_password {
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(ValidationError::field(
                    "admin_password",
                    format!("must be at least {} characters", MIN_PASSWORD_LEN),
                ));
            }
        }

        let firewall_set = fields.firewall_start_ip.is_some() || fields.firewall_end_ip.is_some();
        if firewall_set && !rules.firewall {
            return Err(ValidationError::general(
                "firewall settings require a plan with a managed firewall",
            ));
        }
        for (field, value) in [
            ("firewall_start_ip", &fields.firewall_start_ip),
            ("firewall_end_ip", &fields.firewall_end_ip),
        ] {
            if let Some(ip) = value {
                ip.parse::<Ipv4Addr>()
                    .map_err(|_| ValidationError::field(field, "must be an IPv4 address"))?;
            }
        }
        Ok(())
    }

    fn check_firewall_range(start: Option<&str>, end: Option<&str>) -> std::result::Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (start, end) {
            let start: Ipv4Addr = start
                .parse()
                .map_err(|_| ValidationError::field("firewall_start_ip", "must be an IPv4 address"))?;
            let end: Ipv4Addr = end
                .parse()
                .map_err(|_| ValidationError::field("firewall_end_ip", "must be an IPv4 address"))?;
            if start > end {
                return Err(ValidationError::field(
                    "firewall_end_ip",
                    "must not precede firewall_start_ip",
                ));
            }
        }
        Ok(())
    }

    fn login_name(instance: &Instance, parameters: &Split<BindingInput>) -> String {
        format!("login_{}", &idempotency_key(&instance.id, parameters)[..16])
    }

    fn server_name(instance: &Instance) -> Result<&str> {
        instance
            .details
            .plain()
            .get_str("server_name")
            .ok_or_else(|| BrokerError::data_consistency(format!("{} has no server_name", instance.id)))
    }
}

#[async_trait]
impl ServiceManager for FakeDbManager {
    fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    fn plans(&self) -> Vec<Plan> {
        plans::catalog()
    }

    fn shapes(&self) -> &ServiceShapes {
        &self.shapes
    }

    fn validate_provisioning_parameters(
        &self,
        plan: &Plan,
        parameters: &Split<Provisioning>,
    ) -> std::result::Result<(), ValidationError> {
        let rules = PlanRules::for_plan(plan.id.as_str())
            .ok_or_else(|| ValidationError::general(format!("{} is not offered", plan.id)))?;
        parameters.check_required()?;

        let (fields, secure) = Self::decode(parameters)?;
        Self::check_fields(&rules, &fields, &secure)?;
        Self::check_firewall_range(
            fields.firewall_start_ip.as_deref(),
            fields.firewall_end_ip.as_deref(),
        )
    }

    fn provisioner(&self, plan: &Plan) -> Result<Provisioner> {
        let rules = self.rules(plan)?;
        let mut workflow = Workflow::provisioner()
            .step(Preflight {
                plane: Arc::clone(&self.plane),
            })
            .step(CreateServer {
                plane: Arc::clone(&self.plane),
            })
            .step(CreateDatabase {
                plane: Arc::clone(&self.plane),
            });
        if rules.firewall {
            workflow = workflow.step(ConfigureFirewall {
                plane: Arc::clone(&self.plane),
            });
        }
        Ok(workflow)
    }

    fn validate_updating_parameters(
        &self,
        instance: &Instance,
    ) -> std::result::Result<(), ValidationError> {
        let Some(update) = &instance.pending_update else {
            return Ok(());
        };
        let rules = PlanRules::for_plan(update.plan.id.as_str())
            .ok_or_else(|| ValidationError::general(format!("{} is not offered", update.plan.id)))?;

        let (fields, secure) = Self::decode(&update.parameters)?;
        if update.cleared.contains("location") {
            return Err(ValidationError::field("location", "cannot be changed"));
        }
        if let Some(location) = &fields.location {
            if Some(location.as_str()) != instance.parameters.plain().get_str("location") {
                return Err(ValidationError::field("location", "cannot be changed"));
            }
        }
        Self::check_fields(&rules, &fields, &secure)?;

        let merged = update.apply_to(&instance.parameters)?;
        let (merged_fields, _) = Self::decode(&merged)?;
        if fields.sku.is_none() {
            if let Some(current) = &merged_fields.sku {
                if !rules.skus.contains(&current.as_str()) {
                    return Err(ValidationError::field(
                        "sku",
                        format!("{} is not available on {}; choose one of {:?}", current, update.plan.id, rules.skus),
                    ));
                }
            }
        }
        if !rules.firewall
            && (merged_fields.firewall_start_ip.is_some() || merged_fields.firewall_end_ip.is_some())
        {
            return Err(ValidationError::general(
                "firewall settings require a plan with a managed firewall",
            ));
        }
        Self::check_firewall_range(
            merged_fields.firewall_start_ip.as_deref(),
            merged_fields.firewall_end_ip.as_deref(),
        )
    }

    fn updater(&self, plan: &Plan) -> Result<Updater> {
        let rules = self.rules(plan)?;
        let mut workflow = Workflow::updater().step(UpdateServer {
            plane: Arc::clone(&self.plane),
        });
        if rules.firewall {
            workflow = workflow.step(ConfigureFirewall {
                plane: Arc::clone(&self.plane),
            });
        }
        Ok(workflow)
    }

    fn validate_binding_parameters(
        &self,
        parameters: &Split<BindingInput>,
    ) -> std::result::Result<(), ValidationError> {
        match parameters.plain().get("role") {
            None => Ok(()),
            Some(Value::String(role)) if ROLES.contains(&role.as_str()) => Ok(()),
            Some(_) => Err(ValidationError::field(
                "role",
                format!("must be one of {:?}", ROLES),
            )),
        }
    }

    async fn bind(
        &self,
        instance: &Instance,
        parameters: &Split<BindingInput>,
    ) -> Result<Split<BindingState>> {
        let server_name = Self::server_name(instance)?;
        let role = parameters.plain().get_str("role").unwrap_or(ROLES[0]);

        let login = self
            .plane
            .create_login(
                server_name,
                Login {
                    name: Self::login_name(instance, parameters),
                    password: generate_password(),
                    role: role.to_string(),
                },
            )
            .await?;
        tracing::info!(instance_id = %instance.id, login = %login.name, role = %login.role, "Login ready");

        let mut details = self.empty_binding_state();
        details.set_plain("login_name", login.name)?;
        details.set_secure("password", login.password)?;
        Ok(details)
    }

    fn credentials(&self, instance: &Instance, binding: &Binding) -> Result<Credentials> {
        let require = |value: Option<&str>, what: &str| -> Result<String> {
            value.map(str::to_string).ok_or_else(|| {
                BrokerError::data_consistency(format!("{} is missing {}", binding.id, what))
            })
        };

        let host = require(instance.details.plain().get_str("fqdn"), "fqdn")?;
        let database = require(
            instance.details.plain().get_str("database_name"),
            "database_name",
        )?;
        let username = require(binding.details.plain().get_str("login_name"), "login_name")?;
        let password = require(binding.details.secure().get_str("password"), "password")?;

        let uri = format!(
            "fakedb://{}:{}@{}:{}/{}",
            username, password, host, PORT, database
        );
        Ok(Credentials::new()
            .with("host", host)
            .with("port", PORT)
            .with("database", database)
            .with("username", username)
            .with("password", password)
            .with("uri", uri))
    }

    async fn unbind(&self, instance: &Instance, binding: &Binding) -> Result<()> {
        let server_name = Self::server_name(instance)?;
        let Some(login) = binding.details.plain().get_str("login_name") else {
            return Ok(());
        };

        match self.plane.delete_login(server_name, login).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(instance_id = %instance.id, login = %login, "Login already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn deprovisioner(&self, plan: &Plan) -> Result<Deprovisioner> {
        self.rules(plan)?;
        Ok(Workflow::deprovisioner()
            .step(DeleteDatabase {
                plane: Arc::clone(&self.plane),
            })
            .step(DeleteServer {
                plane: Arc::clone(&self.plane),
            }))
    }
}
