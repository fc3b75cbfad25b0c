use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("Invalid email_provider.timeout_secs: {0}. Must be between 1 and 15")]
    InvalidTimeout(u64),

    #[error("Invalid email_provider.requests_per_second: {0}. Must be at least 1")]
    InvalidRateLimit(u32),

    #[error("Invalid controller.workers: {0}. Must be between 1 and 64")]
    InvalidWorkers(usize),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid webhook.port: {0}. Must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("Invalid webhook.path: {0}. Must start with '/'")]
    InvalidPath(String),

    #[error("Invalid webhook.signing_secret: expected whsec_<base64>")]
    InvalidSigningSecret,

    #[error("Invalid audience_provider.newsletter_group: {0}. Expected namespace/name")]
    InvalidNewsletterGroup(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. herald.yaml
    /// 3. herald.local.yaml (optional overrides)
    /// 4. Environment variables (HERALD_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("herald.yaml"))
            .merge(Yaml::file("herald.local.yaml"))
            .merge(Env::prefixed("HERALD_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file; environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("HERALD_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise from the default locations.
    pub fn load_optional(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let email = &config.email_provider;
        if email.api_key.is_empty() {
            return Err(ConfigError::EmptyField("email_provider.api_key"));
        }
        if email.from.is_empty() {
            return Err(ConfigError::EmptyField("email_provider.from"));
        }
        if email.reply_to.is_empty() {
            return Err(ConfigError::EmptyField("email_provider.reply_to"));
        }
        if !(1..=15).contains(&email.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(email.timeout_secs));
        }
        if email.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(email.requests_per_second));
        }

        let audience = &config.audience_provider;
        if audience.enabled {
            if audience.api_key.is_empty() {
                return Err(ConfigError::EmptyField("audience_provider.api_key"));
            }
            if audience.newsletter_list_id.is_empty() {
                return Err(ConfigError::EmptyField("audience_provider.newsletter_list_id"));
            }
            if !(1..=15).contains(&audience.timeout_secs) {
                return Err(ConfigError::InvalidTimeout(audience.timeout_secs));
            }
        }
        if let Some(group) = &audience.newsletter_group {
            let valid = match group.split_once('/') {
                Some((namespace, name)) => !namespace.is_empty() && !name.is_empty(),
                None => !group.is_empty(),
            };
            if !valid {
                return Err(ConfigError::InvalidNewsletterGroup(group.clone()));
            }
        }

        let controller = &config.controller;
        if !(1..=64).contains(&controller.workers) {
            return Err(ConfigError::InvalidWorkers(controller.workers));
        }
        if controller.initial_backoff_ms >= controller.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                controller.initial_backoff_ms,
                controller.max_backoff_ms,
            ));
        }

        let webhook = &config.webhook;
        if !(1..=65535).contains(&webhook.port) {
            return Err(ConfigError::InvalidPort(webhook.port));
        }
        if !webhook.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(webhook.path.clone()));
        }
        if !webhook.signing_secret.is_empty() {
            let decoded = webhook
                .signing_secret
                .strip_prefix("whsec_")
                .and_then(|encoded| STANDARD.decode(encoded).ok());
            if decoded.map_or(true, |key| key.is_empty()) {
                return Err(ConfigError::InvalidSigningSecret);
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
