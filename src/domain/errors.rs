//! Domain errors for the Herald convergence engine.

use std::fmt;

use thiserror::Error;

use super::models::ResourceKind;

/// The kind of entity a [`DomainError::NotFound`] refers to.
///
/// Provider entities and declarative resources share one not-found shape so
/// deletion guards and the webhook can treat them uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A declarative resource held by the store.
    Resource(ResourceKind),
    /// A provider-side audience (contact group).
    ProviderAudience,
    /// A provider-side contact, either global or inside an audience.
    ProviderContact,
    /// A provider-side email.
    ProviderEmail,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(kind) => write!(f, "{kind}"),
            Self::ProviderAudience => f.write_str("provider audience"),
            Self::ProviderContact => f.write_str("provider contact"),
            Self::ProviderEmail => f.write_str("provider email"),
        }
    }
}

/// Domain-level errors that can occur in the Herald system.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Waiting for {count} {kind} deletions")]
    WaitingForDependents { count: usize, kind: ResourceKind },

    #[error("Waiting for email provider confirmation webhook: {0}")]
    AwaitingConfirmation(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a not-found error on a declarative resource.
    pub fn resource_not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: EntityKind::Resource(kind),
            name: name.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the failure is expected to clear on its own.
    ///
    /// Bad requests, validation and template errors need a spec change
    /// before another attempt can succeed.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::BadRequest(_) | Self::Validation(_) | Self::Template(_) | Self::Serialization(_)
        )
    }

    /// Signals that are part of normal convergence rather than failures.
    pub const fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::WaitingForDependents { .. } | Self::AwaitingConfirmation(_)
        )
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
