//! Webhook receiver for provider event notifications.
//!
//! Pipeline: verify the signature (401), parse delivery then contact events
//! (400), correlate by provider id (404 for delivery events, 200 no-op for
//! contact events), then compare-and-swap the mapped condition.

pub mod events;
pub mod handler;
pub mod server;
pub mod signature;

pub use events::{ContactEvent, ContactEventType, DeliveryEvent, DeliveryEventType, WebhookEvent};
pub use handler::{Outcome, WebhookHandler, WEBHOOK_COMPONENT};
pub use server::{router, WebhookServer, WebhookState};
pub use signature::{SignatureError, SignatureVerifier};
