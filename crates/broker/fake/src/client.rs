//! Fake vendor control plane
//!
//! Stands in for the cloud API a real module would call. Creation calls are
//! create-or-return by name, and servers can take several polls to become
//! ready, so the module's steps see the same shapes of behavior a real
//! backend shows. Tests inject transient faults per operation and read the
//! per-operation call counters.

use crate::error::ControlPlaneError;
use async_trait::async_trait;
use broker_types::InstanceId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Provisioning state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Creating,
    Ready,
}

/// A database server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    /// Instance that created the server
    pub owner: InstanceId,
    pub location: String,
    pub sku: String,
    pub fqdn: String,
    pub admin_password: String,
    pub tags: Map<String, Value>,
    pub state: ServerState,
}

/// Requested server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    pub name: String,
    pub owner: InstanceId,
    pub location: String,
    pub sku: String,
    pub admin_password: String,
    pub tags: Map<String, Value>,
}

/// Mutable server settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerChanges {
    pub sku: Option<String>,
    pub admin_password: Option<String>,
    pub tags: Option<Map<String, Value>>,
}

/// An allowed client address range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub start_ip: String,
    pub end_ip: String,
}

/// A database login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub name: String,
    pub password: String,
    pub role: String,
}

/// Operations a fake-db module needs from its vendor
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_server(&self, name: &str) -> ControlPlaneResult<Option<Server>>;

    /// Start creating a server, or return the one already named `spec.name`.
    async fn create_server(&self, spec: ServerSpec) -> ControlPlaneResult<Server>;

    async fn update_server(&self, name: &str, changes: ServerChanges) -> ControlPlaneResult<Server>;

    /// Delete a server with everything on it. Returns false if it was absent.
    async fn delete_server(&self, name: &str) -> ControlPlaneResult<bool>;

    async fn database_exists(&self, server: &str, database: &str) -> ControlPlaneResult<bool>;

    /// Create a database unless it exists.
    async fn create_database(&self, server: &str, database: &str) -> ControlPlaneResult<()>;

    async fn delete_database(&self, server: &str, database: &str) -> ControlPlaneResult<bool>;

    /// Create or replace a firewall rule.
    async fn set_firewall_rule(&self, server: &str, rule: FirewallRule) -> ControlPlaneResult<()>;

    async fn firewall_rules(&self, server: &str) -> ControlPlaneResult<Vec<FirewallRule>>;

    /// Create a login, or return the one already named `login.name`.
    async fn create_login(&self, server: &str, login: Login) -> ControlPlaneResult<Login>;

    /// Fails with `NotFound` when the login does not exist.
    async fn delete_login(&self, server: &str, name: &str) -> ControlPlaneResult<()>;

    async fn logins(&self, server: &str) -> ControlPlaneResult<Vec<Login>>;
}

#[derive(Debug, Clone)]
struct ServerRecord {
    server: Server,
    polls_until_ready: u32,
    databases: Vec<String>,
    firewall: Vec<FirewallRule>,
    logins: Vec<Login>,
}

/// In-memory control plane for tests and the demo daemon
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    servers: DashMap<String, ServerRecord>,
    faults: DashMap<&'static str, u32>,
    calls: DashMap<&'static str, u32>,
    ready_after_polls: AtomicU32,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// New servers turn `ready` on the `polls`-th read after creation.
    pub fn with_ready_after_polls(self, polls: u32) -> Self {
        self.ready_after_polls.store(polls, Ordering::SeqCst);
        self
    }

    /// Make the next `count` calls of `operation` fail with `Throttled`.
    pub fn fail_next(&self, operation: &'static str, count: u32) {
        *self.faults.entry(operation).or_insert(0) += count;
    }

    /// Successful calls of `operation` so far.
    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.get(operation).map(|c| *c).unwrap_or(0)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Remove a login behind the broker's back.
    pub fn remove_login_out_of_band(&self, server: &str, name: &str) -> bool {
        match self.servers.get_mut(server) {
            Some(mut record) => {
                let before = record.logins.len();
                record.logins.retain(|l| l.name != name);
                record.logins.len() != before
            }
            None => false,
        }
    }

    /// Consume an injected fault or count the call.
    fn enter(&self, operation: &'static str) -> ControlPlaneResult<()> {
        if let Some(mut remaining) = self.faults.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                tracing::debug!(operation, remaining = *remaining, "Injected fault");
                return Err(ControlPlaneError::Throttled {
                    operation: operation.to_string(),
                });
            }
        }
        *self.calls.entry(operation).or_insert(0) += 1;
        Ok(())
    }

    fn with_server<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ServerRecord) -> ControlPlaneResult<T>,
    ) -> ControlPlaneResult<T> {
        let mut record = self
            .servers
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::not_found("server", name))?;
        f(&mut record)
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn get_server(&self, name: &str) -> ControlPlaneResult<Option<Server>> {
        self.enter("get_server")?;
        Ok(self.servers.get_mut(name).map(|mut record| {
            if record.server.state == ServerState::Creating {
                record.polls_until_ready = record.polls_until_ready.saturating_sub(1);
                if record.polls_until_ready == 0 {
                    record.server.state = ServerState::Ready;
                }
            }
            record.server.clone()
        }))
    }

    async fn create_server(&self, spec: ServerSpec) -> ControlPlaneResult<Server> {
        self.enter("create_server")?;
        let entry = self.servers.entry(spec.name.clone()).or_insert_with(|| {
            let polls = self.ready_after_polls.load(Ordering::SeqCst);
            ServerRecord {
                server: Server {
                    fqdn: format!("{}.fakedb.example.net", spec.name),
                    name: spec.name.clone(),
                    owner: spec.owner,
                    location: spec.location.clone(),
                    sku: spec.sku.clone(),
                    admin_password: spec.admin_password.clone(),
                    tags: spec.tags.clone(),
                    state: if polls == 0 {
                        ServerState::Ready
                    } else {
                        ServerState::Creating
                    },
                },
                polls_until_ready: polls,
                databases: Vec::new(),
                firewall: Vec::new(),
                logins: Vec::new(),
            }
        });
        if entry.server.owner != spec.owner {
            return Err(ControlPlaneError::Conflict {
                kind: "server",
                name: spec.name,
            });
        }
        Ok(entry.server.clone())
    }

    async fn update_server(&self, name: &str, changes: ServerChanges) -> ControlPlaneResult<Server> {
        self.enter("update_server")?;
        self.with_server(name, |record| {
            if let Some(sku) = changes.sku {
                record.server.sku = sku;
            }
            if let Some(password) = changes.admin_password {
                record.server.admin_password = password;
            }
            if let Some(tags) = changes.tags {
                record.server.tags = tags;
            }
            Ok(record.server.clone())
        })
    }

    async fn delete_server(&self, name: &str) -> ControlPlaneResult<bool> {
        self.enter("delete_server")?;
        Ok(self.servers.remove(name).is_some())
    }

    async fn database_exists(&self, server: &str, database: &str) -> ControlPlaneResult<bool> {
        self.enter("database_exists")?;
        self.with_server(server, |record| Ok(record.databases.iter().any(|d| d == database)))
    }

    async fn create_database(&self, server: &str, database: &str) -> ControlPlaneResult<()> {
        self.enter("create_database")?;
        self.with_server(server, |record| {
            if !record.databases.iter().any(|d| d == database) {
                record.databases.push(database.to_string());
            }
            Ok(())
        })
    }

    async fn delete_database(&self, server: &str, database: &str) -> ControlPlaneResult<bool> {
        self.enter("delete_database")?;
        self.with_server(server, |record| {
            let before = record.databases.len();
            record.databases.retain(|d| d != database);
            Ok(record.databases.len() != before)
        })
    }

    async fn set_firewall_rule(&self, server: &str, rule: FirewallRule) -> ControlPlaneResult<()> {
        self.enter("set_firewall_rule")?;
        self.with_server(server, |record| {
            record.firewall.retain(|r| r.name != rule.name);
            record.firewall.push(rule);
            Ok(())
        })
    }

    async fn firewall_rules(&self, server: &str) -> ControlPlaneResult<Vec<FirewallRule>> {
        self.enter("firewall_rules")?;
        self.with_server(server, |record| Ok(record.firewall.clone()))
    }

    async fn create_login(&self, server: &str, login: Login) -> ControlPlaneResult<Login> {
        self.enter("create_login")?;
        self.with_server(server, |record| {
            if let Some(existing) = record.logins.iter().find(|l| l.name == login.name) {
                return Ok(existing.clone());
            }
            record.logins.push(login.clone());
            Ok(login)
        })
    }

    async fn delete_login(&self, server: &str, name: &str) -> ControlPlaneResult<()> {
        self.enter("delete_login")?;
        self.with_server(server, |record| {
            let before = record.logins.len();
            record.logins.retain(|l| l.name != name);
            if record.logins.len() == before {
                return Err(ControlPlaneError::not_found("login", name));
            }
            Ok(())
        })
    }

    async fn logins(&self, server: &str) -> ControlPlaneResult<Vec<Login>> {
        self.enter("logins")?;
        self.with_server(server, |record| Ok(record.logins.clone()))
    }
}
