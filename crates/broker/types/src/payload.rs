//! Split parameter and detail payloads
//!
//! Every parameter or detail structure a service module deals with comes in
//! two halves: a plain half that may be logged and persisted in clear, and a
//! secure half that must never be. [`Payload`] is a JSON object tagged with
//! a role marker and a sensitivity marker; [`Split`] pairs the two halves of
//! one role so that they always travel together.
//!
//! Modules describe the fields they accept with a [`Shape`]. An empty payload
//! carries its shape, which lets service-agnostic callers deserialize
//! untyped JSON into the right concrete payload through [`Payload::merge_json`]
//! without knowing which service is in play.

use crate::error::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// ── Markers ──────────────────────────────────────────────────────────

/// Lifecycle role a payload plays.
pub trait Role: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Sensitivity of a payload half.
pub trait Sensitivity: Send + Sync + 'static {
    /// Values must be redacted from logs and never persisted in clear.
    const SECURE: bool;
}

/// Input to provisioning and updating.
#[derive(Debug)]
pub enum Provisioning {}

/// State recorded on an instance by its workflow steps.
#[derive(Debug)]
pub enum InstanceState {}

/// Input to a bind request.
#[derive(Debug)]
pub enum BindingInput {}

/// Output of a successful bind.
#[derive(Debug)]
pub enum BindingState {}

impl Role for Provisioning {
    const NAME: &'static str = "provisioning_parameters";
}

impl Role for InstanceState {
    const NAME: &'static str = "instance_details";
}

impl Role for BindingInput {
    const NAME: &'static str = "binding_parameters";
}

impl Role for BindingState {
    const NAME: &'static str = "binding_details";
}

/// May be logged and persisted in clear.
#[derive(Debug)]
pub enum Plain {}

/// Must be encrypted at rest and redacted from output.
#[derive(Debug)]
pub enum Secure {}

impl Sensitivity for Plain {
    const SECURE: bool = false;
}

impl Sensitivity for Secure {
    const SECURE: bool = true;
}

pub type ProvisioningParameters = Payload<Provisioning, Plain>;
pub type SecureProvisioningParameters = Payload<Provisioning, Secure>;
pub type InstanceDetails = Payload<InstanceState, Plain>;
pub type SecureInstanceDetails = Payload<InstanceState, Secure>;
pub type BindingParameters = Payload<BindingInput, Plain>;
pub type SecureBindingParameters = Payload<BindingInput, Secure>;
pub type BindingDetails = Payload<BindingState, Plain>;
pub type SecureBindingDetails = Payload<BindingState, Secure>;

// ── Shapes ───────────────────────────────────────────────────────────

/// JSON kind a field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// The set of fields one payload half may hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    fields: Vec<FieldSpec>,
    /// Accept undeclared keys (with any kind)
    #[serde(default)]
    open: bool,
}

impl Shape {
    /// A shape accepting no fields at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A shape accepting any key.
    pub fn open() -> Self {
        Self {
            fields: Vec::new(),
            open: true,
        }
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(name.into(), kind, false);
        self
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(name.into(), kind, true);
        self
    }

    fn push(&mut self, name: String, kind: FieldKind, required: bool) {
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldSpec {
            name,
            kind,
            required,
        });
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Check a single key/value pair against the declaration.
    pub fn check(&self, name: &str, value: &Value) -> Result<(), ValidationError> {
        match self.field(name) {
            Some(spec) if value.is_null() && !spec.required => Ok(()),
            Some(spec) if !spec.kind.accepts(value) => Err(ValidationError::field(
                name,
                format!("expected {}", spec.kind),
            )),
            Some(_) => Ok(()),
            None if self.open => Ok(()),
            None => Err(ValidationError::field(name, "is not a recognized field")),
        }
    }

    fn overlaps(&self, other: &Shape) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| other.field(&f.name).is_some())
            .map(|f| f.name.as_str())
    }
}

/// Plain and secure shapes of one role.
#[derive(Debug, Clone, Default)]
pub struct ShapePair {
    pub plain: Arc<Shape>,
    pub secure: Arc<Shape>,
}

impl ShapePair {
    /// Pair two shapes. A field may be declared on one side only.
    pub fn new(plain: Shape, secure: Shape) -> Result<Self, ValidationError> {
        if let Some(name) = plain.overlaps(&secure) {
            return Err(ValidationError::field(
                name,
                "declared as both plain and secure",
            ));
        }
        Ok(Self {
            plain: Arc::new(plain),
            secure: Arc::new(secure),
        })
    }
}

/// Every shape a service module declares.
#[derive(Debug, Clone, Default)]
pub struct ServiceShapes {
    pub provisioning: ShapePair,
    pub instance_details: ShapePair,
    pub binding_parameters: ShapePair,
    pub binding_details: ShapePair,
}

// ── Payload ──────────────────────────────────────────────────────────

/// A JSON object holding one half of a role's data.
pub struct Payload<R, S> {
    shape: Arc<Shape>,
    values: Map<String, Value>,
    _marker: PhantomData<fn() -> (R, S)>,
}

impl<R: Role, S: Sensitivity> Payload<R, S> {
    /// An empty, zero-valued payload of the given shape.
    pub fn empty(shape: Arc<Shape>) -> Self {
        Self {
            shape,
            values: Map::new(),
            _marker: PhantomData,
        }
    }

    /// Parse untyped JSON into a payload of the given shape.
    pub fn from_json(shape: Arc<Shape>, value: Value) -> Result<Self, ValidationError> {
        let mut payload = Self::empty(shape);
        payload.merge_json(value)?;
        Ok(payload)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Set a declared field. Null clears it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ValidationError> {
        let key = key.into();
        let value = value.into();
        self.shape.check(&key, &value)?;
        if value.is_null() {
            self.values.remove(&key);
        } else {
            self.values.insert(key, value);
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Merge an untyped JSON object into the payload, field by field.
    ///
    /// `null` is treated as an empty object.
    pub fn merge_json(&mut self, value: Value) -> Result<(), ValidationError> {
        let map = match value {
            Value::Null => return Ok(()),
            Value::Object(map) => map,
            _ => {
                return Err(ValidationError::general(format!(
                    "{} must be a JSON object",
                    R::NAME
                )))
            }
        };
        for (key, value) in map {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Every required field of the shape is present.
    pub fn check_required(&self) -> Result<(), ValidationError> {
        for spec in self.shape.fields() {
            if spec.required && !self.values.contains_key(&spec.name) {
                return Err(ValidationError::missing(spec.name.clone()));
            }
        }
        Ok(())
    }

    /// Deserialize into a module's typed representation.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| ValidationError::general(format!("{}: {}", R::NAME, e)))
    }

    /// Canonical (key-sorted) JSON text of the values.
    fn canonical(&self) -> String {
        Value::Object(self.values.clone()).to_string()
    }
}

impl<R: Role> Payload<R, Plain> {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl<R: Role> Payload<R, Secure> {
    /// Raw access to secret values. Callers own the consequences.
    pub fn expose(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl<R, S> Clone for Payload<R, S> {
    fn clone(&self) -> Self {
        Self {
            shape: Arc::clone(&self.shape),
            values: self.values.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R, S> PartialEq for Payload<R, S> {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl<R: Role, S: Sensitivity> fmt::Debug for Payload<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if S::SECURE {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl<R: Role> Serialize for Payload<R, Plain> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        self.values.serialize(serializer)
    }
}

// ── Split ────────────────────────────────────────────────────────────

/// The plain and secure halves of one role, always handled together.
pub struct Split<R> {
    plain: Payload<R, Plain>,
    secure: Payload<R, Secure>,
}

impl<R: Role> Split<R> {
    /// Pair two halves. A key set on both sides is rejected.
    pub fn new(
        plain: Payload<R, Plain>,
        secure: Payload<R, Secure>,
    ) -> Result<Self, ValidationError> {
        if let Some(key) = plain.keys().find(|k| secure.contains(k)) {
            return Err(ValidationError::field(
                key,
                "set in both plain and secure parameters",
            ));
        }
        Ok(Self { plain, secure })
    }

    /// Empty halves of the given shapes.
    pub fn empty(shapes: &ShapePair) -> Self {
        Self {
            plain: Payload::empty(Arc::clone(&shapes.plain)),
            secure: Payload::empty(Arc::clone(&shapes.secure)),
        }
    }

    /// Parse untyped JSON for both halves.
    pub fn from_json(shapes: &ShapePair, plain: Value, secure: Value) -> Result<Self, ValidationError> {
        Self::new(
            Payload::from_json(Arc::clone(&shapes.plain), plain)?,
            Payload::from_json(Arc::clone(&shapes.secure), secure)?,
        )
    }

    pub fn plain(&self) -> &Payload<R, Plain> {
        &self.plain
    }

    pub fn secure(&self) -> &Payload<R, Secure> {
        &self.secure
    }

    pub fn into_parts(self) -> (Payload<R, Plain>, Payload<R, Secure>) {
        (self.plain, self.secure)
    }

    pub fn set_plain(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ValidationError> {
        let key = key.into();
        if self.secure.contains(&key) {
            return Err(ValidationError::field(key, "already set as a secure value"));
        }
        self.plain.set(key, value)
    }

    pub fn set_secure(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ValidationError> {
        let key = key.into();
        if self.plain.contains(&key) {
            return Err(ValidationError::field(key, "already set as a plain value"));
        }
        self.secure.set(key, value)
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.secure.is_empty()
    }

    /// Apply `patch` on top of these values; keys in the patch win.
    ///
    /// A key moving between halves is rejected.
    pub fn overlay(&self, patch: &Split<R>) -> Result<Split<R>, ValidationError> {
        let mut merged = self.clone();
        for (key, value) in &patch.plain.values {
            merged.set_plain(key.clone(), value.clone())?;
        }
        for (key, value) in &patch.secure.values {
            merged.set_secure(key.clone(), value.clone())?;
        }
        Ok(merged)
    }

    /// Remove a key from whichever half holds it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.plain.remove(key).or_else(|| self.secure.remove(key))
    }

    pub fn check_required(&self) -> Result<(), ValidationError> {
        self.plain.check_required()?;
        self.secure.check_required()
    }

    /// Deterministic digest of both halves, independent of insertion order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(R::NAME.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.plain.canonical().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.secure.canonical().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

impl<R> Clone for Split<R> {
    fn clone(&self) -> Self {
        Self {
            plain: self.plain.clone(),
            secure: self.secure.clone(),
        }
    }
}

impl<R> PartialEq for Split<R> {
    fn eq(&self, other: &Self) -> bool {
        self.plain == other.plain && self.secure == other.secure
    }
}

impl<R: Role> fmt::Debug for Split<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(R::NAME)
            .field("plain", &self.plain)
            .field("secure", &self.secure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn provisioning_shapes() -> ShapePair {
        ShapePair::new(
            Shape::new()
                .required("location", FieldKind::String)
                .optional("sku", FieldKind::String)
                .optional("tags", FieldKind::Object),
            Shape::new().optional("admin_password", FieldKind::String),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_payload_has_shape() {
        let shapes = provisioning_shapes();
        let params = ProvisioningParameters::empty(shapes.plain.clone());
        assert!(params.is_empty());
        assert!(params.shape().field("location").unwrap().required);
    }

    #[test]
    fn test_merge_json_accepts_declared_fields() {
        let shapes = provisioning_shapes();
        let mut params = ProvisioningParameters::empty(shapes.plain.clone());
        params
            .merge_json(json!({"location": "eastus", "tags": {"team": "data"}}))
            .unwrap();
        assert_eq!(params.get_str("location"), Some("eastus"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_merge_json_rejects_unknown_field() {
        let shapes = provisioning_shapes();
        let mut params = ProvisioningParameters::empty(shapes.plain.clone());
        let err = params.merge_json(json!({"colour": "blue"})).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("colour"));
    }

    #[test]
    fn test_merge_json_rejects_wrong_kind() {
        let shapes = provisioning_shapes();
        let mut params = ProvisioningParameters::empty(shapes.plain.clone());
        let err = params.merge_json(json!({"location": 5})).unwrap_err();
        assert_eq!(err.message, "expected string");
    }

    #[test]
    fn test_merge_json_rejects_non_object() {
        let shapes = provisioning_shapes();
        let mut params = ProvisioningParameters::empty(shapes.plain.clone());
        assert!(params.merge_json(json!(["eastus"])).is_err());
        assert!(params.merge_json(Value::Null).is_ok());
    }

    #[test]
    fn test_open_shape_accepts_anything() {
        let mut details = InstanceDetails::empty(Arc::new(Shape::open()));
        details.set("anything", 42).unwrap();
        assert_eq!(details.get("anything"), Some(&json!(42)));
    }

    #[test]
    fn test_check_required() {
        let shapes = provisioning_shapes();
        let split = Split::<Provisioning>::empty(&shapes);
        let err = split.check_required().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("location"));
    }

    #[test]
    fn test_secure_debug_is_redacted() {
        let shapes = provisioning_shapes();
        let secure = SecureProvisioningParameters::from_json(
            shapes.secure.clone(),
            json!({"admin_password": "hunter2hunter2"}),
        )
        .unwrap();
        let rendered = format!("{:?}", secure);
        assert!(rendered.contains("admin_password"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_plain_serializes_values_only() {
        let shapes = provisioning_shapes();
        let plain =
            ProvisioningParameters::from_json(shapes.plain.clone(), json!({"location": "westus"}))
                .unwrap();
        assert_eq!(serde_json::to_value(&plain).unwrap(), json!({"location": "westus"}));
    }

    #[test]
    fn test_split_rejects_duplicated_key() {
        let plain = ProvisioningParameters::from_json(Arc::new(Shape::open()), json!({"k": "v"}))
            .unwrap();
        let secure =
            SecureProvisioningParameters::from_json(Arc::new(Shape::open()), json!({"k": "v"}))
                .unwrap();
        let err = Split::new(plain, secure).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("k"));
    }

    #[test]
    fn test_split_setters_guard_other_half() {
        let mut split = Split::<InstanceState>::empty(&ShapePair {
            plain: Arc::new(Shape::open()),
            secure: Arc::new(Shape::open()),
        });
        split.set_plain("server", "s1").unwrap();
        assert!(split.set_secure("server", "s1").is_err());
        split.set_secure("password", "p").unwrap();
        assert!(split.set_plain("password", "p").is_err());
    }

    #[test]
    fn test_overlay_patches_values() {
        let shapes = provisioning_shapes();
        let current = Split::<Provisioning>::from_json(
            &shapes,
            json!({"location": "eastus", "sku": "small"}),
            json!({"admin_password": "aaaaaaaaaaaa"}),
        )
        .unwrap();
        let patch =
            Split::<Provisioning>::from_json(&shapes, json!({"sku": "large"}), Value::Null)
                .unwrap();
        let merged = current.overlay(&patch).unwrap();
        assert_eq!(merged.plain().get_str("location"), Some("eastus"));
        assert_eq!(merged.plain().get_str("sku"), Some("large"));
        assert_eq!(
            merged.secure().get_str("admin_password"),
            Some("aaaaaaaaaaaa")
        );
    }

    #[test]
    fn test_shape_pair_rejects_overlap() {
        let result = ShapePair::new(
            Shape::new().optional("password", FieldKind::String),
            Shape::new().optional("password", FieldKind::String),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_into_typed_struct() {
        #[derive(Deserialize)]
        struct Typed {
            location: String,
            sku: Option<String>,
        }
        let shapes = provisioning_shapes();
        let plain =
            ProvisioningParameters::from_json(shapes.plain.clone(), json!({"location": "eastus"}))
                .unwrap();
        let typed: Typed = plain.decode().unwrap();
        assert_eq!(typed.location, "eastus");
        assert!(typed.sku.is_none());
    }

    #[test]
    fn test_fingerprint_changes_with_secure_half() {
        let shapes = provisioning_shapes();
        let a = Split::<Provisioning>::from_json(
            &shapes,
            json!({"location": "eastus"}),
            json!({"admin_password": "aaaaaaaaaaaa"}),
        )
        .unwrap();
        let b = Split::<Provisioning>::from_json(
            &shapes,
            json!({"location": "eastus"}),
            json!({"admin_password": "bbbbbbbbbbbb"}),
        )
        .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,12}", 0..8)
        ) {
            let shapes = ShapePair {
                plain: Arc::new(Shape::open()),
                secure: Arc::new(Shape::new()),
            };
            let mut forward = Split::<BindingInput>::empty(&shapes);
            for (k, v) in entries.iter() {
                forward.set_plain(k.clone(), v.clone()).unwrap();
            }
            let mut backward = Split::<BindingInput>::empty(&shapes);
            for (k, v) in entries.iter().rev() {
                backward.set_plain(k.clone(), v.clone()).unwrap();
            }
            prop_assert_eq!(forward.fingerprint(), backward.fingerprint());
        }
    }
}
