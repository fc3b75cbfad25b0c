//! Observability records emitted once per status transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::condition::Reason;
use super::resource::{Object, ResourceKind, Spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
}

/// The resource an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
    pub resource_version: u64,
}

impl Subject {
    pub fn of<S: Spec>(object: &Object<S>) -> Self {
        Self {
            kind: S::KIND,
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone(),
            uid: object.metadata.uid,
            resource_version: object.metadata.resource_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEvent {
    pub subject: Subject,
    pub action: String,
    pub reason: Reason,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub reporting_component: String,
}

impl ObservedEvent {
    pub fn new<S: Spec>(
        object: &Object<S>,
        reason: Reason,
        message: impl Into<String>,
        severity: Severity,
        reporting_component: impl Into<String>,
    ) -> Self {
        Self {
            subject: Subject::of(object),
            action: "Update".to_string(),
            reason,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            reporting_component: reporting_component.into(),
        }
    }
}
