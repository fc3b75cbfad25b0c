//! Shape shared by every declarative resource.
//!
//! A resource is an [`Object<S>`]: metadata owned by the store, a client
//! written `spec`, and a `status` owned by the reconcilers and the webhook.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::condition::Status;
use super::index::IndexField;

/// Every resource type the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Email,
    EmailTemplate,
    User,
    Contact,
    ContactGroup,
    ContactGroupMembership,
    ContactGroupMembershipRemoval,
}

impl ResourceKind {
    pub const ALL: [Self; 7] = [
        Self::Email,
        Self::EmailTemplate,
        Self::User,
        Self::Contact,
        Self::ContactGroup,
        Self::ContactGroupMembership,
        Self::ContactGroupMembershipRemoval,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::EmailTemplate => "EmailTemplate",
            Self::User => "User",
            Self::Contact => "Contact",
            Self::ContactGroup => "ContactGroup",
            Self::ContactGroupMembership => "ContactGroupMembership",
            Self::ContactGroupMembershipRemoval => "ContactGroupMembershipRemoval",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Reference from one resource to another; an absent namespace means
/// "same namespace as the referencing resource".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Resolve against the namespace of the referencing resource.
    pub fn resolve(&self, default_namespace: &str) -> ObjectKey {
        ObjectKey::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.clone(),
        )
    }
}

/// Store-owned metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Immutable, assigned on create. Used as the provider idempotency key.
    #[serde(default)]
    pub uid: Uuid,
    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,
    /// Optimistic concurrency token.
    #[serde(default)]
    pub resource_version: u64,
    /// Deletion hooks; the object is removed once a deletion is requested and
    /// this list is empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub const fn is_deleting(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` when the finalizer was not present yet.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` when the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }
}

/// Desired-state payload of a concrete resource type.
///
/// Each implementation fixes its [`ResourceKind`] and the values it
/// contributes to the store's field indexes, so index extraction never has
/// to inspect the runtime type of an object.
pub trait Spec:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ResourceKind;

    /// Values this object publishes under `field`.
    fn index_values(object: &Object<Self>, field: IndexField) -> Vec<String> {
        match field {
            IndexField::ProviderId => object.status.provider_id_index(),
            _ => Vec::new(),
        }
    }
}

/// A declarative resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "S: Spec")]
pub struct Object<S> {
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: Status,
}

impl<S: Spec> Object<S> {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: S) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: Status::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub const fn kind(&self) -> ResourceKind {
        S::KIND
    }

    pub const fn generation(&self) -> i64 {
        self.metadata.generation
    }
}
