//! Catalog plans
//!
//! A plan is an immutable catalog entry. The broker treats it as a lookup
//! key that selects which workflow a module produces.

use crate::{PlanId, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named configuration tier of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier, unique within its service
    pub id: PlanId,

    /// Owning service
    pub service_id: ServiceId,

    /// Display name
    pub name: String,

    /// Human readable description
    #[serde(default)]
    pub description: String,

    /// Free-form catalog metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Plan {
    pub fn new(service_id: ServiceId, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PlanId::new(id),
            service_id,
            name: name.into(),
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
