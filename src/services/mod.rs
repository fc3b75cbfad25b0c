//! Service layer: rendering, provider wrappers, reconcilers, controllers and
//! the webhook receiver.

pub mod controller;
pub mod index;
pub mod provider_service;
pub mod reconcilers;
pub mod template;
pub mod webhook;

pub use controller::{Controller, ControllerManager, WorkQueue};
pub use index::CorrelationIndex;
pub use provider_service::ProviderService;
pub use reconcilers::{Action, Context, Reconciler};
pub use template::TemplateRenderer;
pub use webhook::WebhookServer;
