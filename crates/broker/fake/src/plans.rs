//! Catalog and payload shapes of the fake-db service

use broker_types::{FieldKind, Plan, ServiceId, ServiceShapes, Shape, ShapePair};
use std::sync::Arc;

pub const SERVICE_ID: &str = "fake-db";

pub const BASIC: &str = "basic";
pub const STANDARD: &str = "standard";

/// Locations every plan may be deployed to
pub const LOCATIONS: &[&str] = &["eastus", "westus", "westeurope", "southeastasia"];

/// Minimum length of an administrator password
pub const MIN_PASSWORD_LEN: usize = 12;

/// Plan-specific rules the module enforces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRules {
    /// SKUs the plan accepts; the first is the default
    pub skus: &'static [&'static str],
    /// Whether the plan manages a firewall rule
    pub firewall: bool,
}

impl PlanRules {
    pub fn for_plan(plan_id: &str) -> Option<Self> {
        match plan_id {
            BASIC => Some(Self {
                skus: &["B1", "B2"],
                firewall: false,
            }),
            STANDARD => Some(Self {
                skus: &["S1", "S2", "S3"],
                firewall: true,
            }),
            _ => None,
        }
    }

    pub fn default_sku(&self) -> &'static str {
        self.skus[0]
    }
}

pub fn service_id() -> ServiceId {
    ServiceId::new(SERVICE_ID)
}

pub fn catalog() -> Vec<Plan> {
    let service = service_id();
    vec![
        Plan::new(service.clone(), BASIC, "Basic")
            .with_description("Single server with one database")
            .with_metadata("tier", "basic"),
        Plan::new(service, STANDARD, "Standard")
            .with_description("Single server with one database and a managed firewall rule")
            .with_metadata("tier", "standard"),
    ]
}

/// Every shape the module declares.
pub fn shapes() -> ServiceShapes {
    ServiceShapes {
        provisioning: ShapePair {
            plain: Arc::new(
                Shape::new()
                    .required("location", FieldKind::String)
                    .optional("sku", FieldKind::String)
                    .optional("tags", FieldKind::Object)
                    .optional("firewall_start_ip", FieldKind::String)
                    .optional("firewall_end_ip", FieldKind::String),
            ),
            secure: Arc::new(Shape::new().optional("admin_password", FieldKind::String)),
        },
        instance_details: ShapePair {
            plain: Arc::new(
                Shape::new()
                    .optional("server_name", FieldKind::String)
                    .optional("database_name", FieldKind::String)
                    .optional("fqdn", FieldKind::String),
            ),
            secure: Arc::new(Shape::new().optional("admin_password", FieldKind::String)),
        },
        binding_parameters: ShapePair {
            plain: Arc::new(Shape::new().optional("role", FieldKind::String)),
            secure: Arc::new(Shape::new()),
        },
        binding_details: ShapePair {
            plain: Arc::new(Shape::new().optional("login_name", FieldKind::String)),
            secure: Arc::new(Shape::new().optional("password", FieldKind::String)),
        },
    }
}
