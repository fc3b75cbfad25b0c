//! Infrastructure adapters for external systems.

pub mod loops;
pub mod memory;
pub mod resend;
