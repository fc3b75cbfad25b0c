//! In-process adapters: declarative store, event sink and mock providers.

pub mod manifest;
pub mod providers;
pub mod recorder;
pub mod store;

pub use manifest::{load_manifests, Manifest};
pub use providers::{MockAudienceProvider, MockEmailProvider, MockOperation};
pub use recorder::InMemoryEventRecorder;
pub use store::InMemoryStore;
