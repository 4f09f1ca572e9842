//! Bindings and the credentials projected from them

use crate::payload::{BindingInput, BindingState, Split};
use crate::{BindingId, InstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A credential-granting relationship between a consumer and an instance
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Unique binding identifier
    pub id: BindingId,

    /// Instance the binding grants access to
    pub instance_id: InstanceId,

    /// Parameters of the bind request
    pub parameters: Split<BindingInput>,

    /// Output of the bind
    pub details: Split<BindingState>,

    /// Deduplication key of the bind request, see [`idempotency_key`]
    pub idempotency_key: String,

    pub created_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(
        instance_id: InstanceId,
        parameters: Split<BindingInput>,
        details: Split<BindingState>,
    ) -> Self {
        let idempotency_key = idempotency_key(&instance_id, &parameters);
        Self {
            id: BindingId::generate(),
            instance_id,
            parameters,
            details,
            idempotency_key,
            created_at: Utc::now(),
        }
    }
}

/// Deduplication key of a bind request.
///
/// Two bind requests against the same instance with equal parameters (both
/// halves) produce the same key, so modules can implement create-or-return
/// semantics by naming backend resources after it.
pub fn idempotency_key(instance_id: &InstanceId, parameters: &Split<BindingInput>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(instance_id.as_uuid().as_bytes());
    hasher.update(parameters.fingerprint().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Consumer-facing credentials; shape is service-specific
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, Value>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}
