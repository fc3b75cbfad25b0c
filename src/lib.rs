//! Herald - email and contact convergence engine
//!
//! Herald keeps declarative Email, Contact and ContactGroup resources in sync
//! with an email-delivery provider and an optional audience provider, and
//! folds provider webhook notifications back into resource status.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): resource models, conditions and port traits
//! - **Adapters** (`adapters`): provider HTTP clients and the in-memory store
//! - **Service Layer** (`services`): reconcilers, controllers and the webhook receiver
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Config, LoggingConfig, Object, ObjectKey, ResourceKind};
pub use domain::ports::{AudienceProvider, EmailProvider, EventRecorder, ResourceStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ControllerManager, Reconciler, WebhookServer};
