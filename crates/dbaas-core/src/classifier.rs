//! Classifier model — the identity used to address a logical database.
//!
//! A classifier is a set of string keys mapped to scalar values. The
//! well-known keys (`namespace`, `microserviceName`, `scope`, `tenantId`)
//! are lifted into named fields; everything else lives in an ordered
//! extension map so that unknown keys survive a round trip.
//!
//! Identity is the sorted key/value list, never the order keys arrived in.
//! [`Classifier::normalize`] produces that sorted form and
//! [`OrderedClassifier`]'s `Display` renders the canonical key used by the
//! state store's classifier index.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

pub const KEY_NAMESPACE: &str = "namespace";
pub const KEY_MICROSERVICE_NAME: &str = "microserviceName";
pub const KEY_SCOPE: &str = "scope";
pub const KEY_TENANT_ID: &str = "tenantId";

/// Legacy marker keys carried by pre-scope classifiers.
pub const LEGACY_SERVICE_KEYS: [&str; 2] = ["isServiceDb", "isService"];

pub const SCOPE_SERVICE: &str = "service";
pub const SCOPE_TENANT: &str = "tenant";

/// Why a classifier was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierViolation {
    #[error("classifier is missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("classifier key `{0}` must not be empty")]
    EmptyValue(&'static str),

    #[error("classifier scope `{0}` must be `service` or `tenant`")]
    UnknownScope(String),

    #[error("classifier key `{0}` must hold a scalar value")]
    NonScalar(String),
}

/// Classifier value object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classifier {
    pub namespace: Option<String>,
    pub microservice_name: Option<String>,
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
    /// Forward-compatible keys, kept sorted.
    pub extensions: BTreeMap<String, Value>,
}

impl Classifier {
    /// Service-scoped classifier for `microservice` in `namespace`.
    pub fn service(namespace: &str, microservice: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            microservice_name: Some(microservice.to_string()),
            scope: Some(SCOPE_SERVICE.to_string()),
            ..Self::default()
        }
    }

    /// Tenant-scoped classifier.
    pub fn tenant(namespace: &str, microservice: &str, tenant_id: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            microservice_name: Some(microservice.to_string()),
            scope: Some(SCOPE_TENANT.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            ..Self::default()
        }
    }

    /// Add an extension key.
    pub fn with_extension(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }

    /// Copy of this classifier addressed to another namespace.
    pub fn with_namespace(&self, namespace: &str) -> Self {
        let mut copy = self.clone();
        copy.namespace = Some(namespace.to_string());
        copy
    }

    /// Check the current classifier shape.
    ///
    /// `namespace`, `microserviceName` and `scope` are required; a tenant
    /// scope also requires `tenantId`. Extension values must be scalars.
    pub fn validate(&self) -> Result<(), ClassifierViolation> {
        require(&self.namespace, KEY_NAMESPACE)?;
        require(&self.microservice_name, KEY_MICROSERVICE_NAME)?;
        let scope = require(&self.scope, KEY_SCOPE)?;
        match scope {
            SCOPE_SERVICE => {}
            SCOPE_TENANT => {
                require(&self.tenant_id, KEY_TENANT_ID)?;
            }
            other => return Err(ClassifierViolation::UnknownScope(other.to_string())),
        }
        self.check_scalars()
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Whether this classifier has the pre-scope shape.
    pub fn is_legacy(&self) -> bool {
        self.scope.is_none()
    }

    /// Permissive check applied to legacy classifiers during migration
    /// lookups: only `namespace` plus one of `microserviceName`/`tenantId`.
    pub fn validate_legacy(&self) -> Result<(), ClassifierViolation> {
        require(&self.namespace, KEY_NAMESPACE)?;
        if self.microservice_name.is_none() && self.tenant_id.is_none() {
            return Err(ClassifierViolation::MissingKey(KEY_MICROSERVICE_NAME));
        }
        Ok(())
    }

    /// Convert a legacy classifier into the current shape.
    ///
    /// Returns `None` when the classifier already carries a scope or does
    /// not pass [`Classifier::validate_legacy`].
    pub fn to_current(&self) -> Option<Classifier> {
        if !self.is_legacy() || self.validate_legacy().is_err() {
            return None;
        }
        let mut current = self.clone();
        let service_flag = LEGACY_SERVICE_KEYS
            .iter()
            .find_map(|k| current.extensions.remove(*k))
            .and_then(|v| v.as_bool());
        for key in LEGACY_SERVICE_KEYS {
            current.extensions.remove(key);
        }
        let tenant = current.tenant_id.is_some() && service_flag != Some(true);
        current.scope = Some(if tenant { SCOPE_TENANT } else { SCOPE_SERVICE }.to_string());
        if !tenant {
            current.tenant_id = None;
        }
        current.microservice_name.as_ref()?;
        Some(current)
    }

    /// Legacy shape that a pre-scope client would have stored for this
    /// classifier. `None` for classifiers that are already legacy.
    pub fn legacy_equivalent(&self) -> Option<Classifier> {
        let scope = self.scope.as_deref()?;
        let mut legacy = self.clone();
        legacy.scope = None;
        legacy
            .extensions
            .insert(LEGACY_SERVICE_KEYS[0].to_string(), Value::Bool(scope == SCOPE_SERVICE));
        Some(legacy)
    }

    /// Sorted key/value form used for persistence, comparison and hashing.
    pub fn normalize(&self) -> OrderedClassifier {
        let mut map = self.extensions.clone();
        let named = [
            (KEY_NAMESPACE, &self.namespace),
            (KEY_MICROSERVICE_NAME, &self.microservice_name),
            (KEY_SCOPE, &self.scope),
            (KEY_TENANT_ID, &self.tenant_id),
        ];
        for (key, value) in named {
            if let Some(v) = value {
                map.insert(key.to_string(), Value::String(v.clone()));
            }
        }
        OrderedClassifier(map)
    }

    /// Canonical string key, stable across processes.
    pub fn canonical_key(&self) -> String {
        self.normalize().to_string()
    }

    fn check_scalars(&self) -> Result<(), ClassifierViolation> {
        match self
            .extensions
            .iter()
            .find(|(_, v)| v.is_array() || v.is_object())
        {
            Some((key, _)) => Err(ClassifierViolation::NonScalar(key.clone())),
            None => Ok(()),
        }
    }
}

fn require<'a>(
    value: &'a Option<String>,
    key: &'static str,
) -> Result<&'a str, ClassifierViolation> {
    match value.as_deref() {
        None => Err(ClassifierViolation::MissingKey(key)),
        Some(v) if v.trim().is_empty() => Err(ClassifierViolation::EmptyValue(key)),
        Some(v) => Ok(v),
    }
}

impl Hash for Classifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl From<OrderedClassifier> for Classifier {
    fn from(ordered: OrderedClassifier) -> Self {
        let mut extensions = ordered.0;
        let mut take = |key: &str| match extensions.remove(key) {
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                // Non-string well-known keys stay visible to validation.
                extensions.insert(key.to_string(), other);
                None
            }
            None => None,
        };
        let namespace = take(KEY_NAMESPACE);
        let microservice_name = take(KEY_MICROSERVICE_NAME);
        let scope = take(KEY_SCOPE);
        let tenant_id = take(KEY_TENANT_ID);
        Self {
            namespace,
            microservice_name,
            scope,
            tenant_id,
            extensions,
        }
    }
}

impl Serialize for Classifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.normalize().0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Classifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Value>::deserialize(deserializer)
            .map(|map| Classifier::from(OrderedClassifier(map)))
    }
}

/// Classifier as a sorted key/value list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedClassifier(pub BTreeMap<String, Value>);

impl OrderedClassifier {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for OrderedClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", Value::String(key.clone()), value)?;
        }
        f.write_str("}")
    }
}
