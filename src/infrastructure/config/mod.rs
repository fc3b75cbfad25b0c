//! Configuration loading for herald.
//!
//! Defaults, `herald.yaml`, `herald.local.yaml` and `HERALD_*` environment
//! variables are merged with figment, then checked by [`ConfigLoader::validate`].

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
