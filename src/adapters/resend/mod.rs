//! Resend email-delivery adapter.

pub mod client;
pub mod errors;
pub mod models;
pub mod time;

pub use client::{ResendClient, ResendClientConfig, IDEMPOTENCY_HEADER};
pub use errors::ResendError;
