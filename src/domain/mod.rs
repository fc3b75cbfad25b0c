//! Domain layer for Herald
//!
//! Resource models, conditions, errors and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{DomainError, DomainResult, EntityKind};
