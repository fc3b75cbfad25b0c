//! Implementation of the `herald config` command.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::config::redact;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    pub valid: bool,
    pub config: Config,
}

impl ConfigOutput {
    /// Wrap `config` with every secret masked.
    pub fn redacted(mut config: Config) -> Self {
        config.email_provider.api_key = redact(&config.email_provider.api_key).to_string();
        config.audience_provider.api_key = redact(&config.audience_provider.api_key).to_string();
        config.webhook.signing_secret = redact(&config.webhook.signing_secret).to_string();
        Self {
            valid: true,
            config,
        }
    }

    fn rows(&self) -> Vec<[String; 3]> {
        let c = &self.config;
        let row = |section: &str, key: &str, value: String| {
            [section.to_string(), key.to_string(), value]
        };
        vec![
            row("email_provider", "api_key", c.email_provider.api_key.clone()),
            row("email_provider", "base_url", c.email_provider.base_url.clone()),
            row("email_provider", "from", c.email_provider.from.clone()),
            row("email_provider", "reply_to", c.email_provider.reply_to.clone()),
            row("email_provider", "timeout_secs", c.email_provider.timeout_secs.to_string()),
            row(
                "email_provider",
                "requests_per_second",
                c.email_provider.requests_per_second.to_string(),
            ),
            row("audience_provider", "enabled", c.audience_provider.enabled.to_string()),
            row("audience_provider", "api_key", c.audience_provider.api_key.clone()),
            row("audience_provider", "base_url", c.audience_provider.base_url.clone()),
            row(
                "audience_provider",
                "newsletter_list_id",
                c.audience_provider.newsletter_list_id.clone(),
            ),
            row(
                "audience_provider",
                "newsletter_group",
                c.audience_provider.newsletter_group.clone().unwrap_or_default(),
            ),
            row("email", "wait_low_priority_secs", c.email.wait_low_priority_secs.to_string()),
            row(
                "email",
                "wait_normal_priority_secs",
                c.email.wait_normal_priority_secs.to_string(),
            ),
            row("email", "wait_high_priority_secs", c.email.wait_high_priority_secs.to_string()),
            row("controller", "workers", c.controller.workers.to_string()),
            row("controller", "initial_backoff_ms", c.controller.initial_backoff_ms.to_string()),
            row("controller", "max_backoff_ms", c.controller.max_backoff_ms.to_string()),
            row("webhook", "bind_address", c.webhook.bind_address.clone()),
            row("webhook", "port", c.webhook.port.to_string()),
            row("webhook", "path", c.webhook.path.clone()),
            row("webhook", "signing_secret", c.webhook.signing_secret.clone()),
            row("webhook", "tolerance_secs", c.webhook.tolerance_secs.to_string()),
            row("logging", "level", c.logging.level.clone()),
            row("logging", "format", c.logging.format.clone()),
            row(
                "logging",
                "log_dir",
                c.logging
                    .log_dir
                    .as_ref()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_default(),
            ),
            row("logging", "rotation", c.logging.rotation.clone()),
        ]
    }
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["section", "key", "value"]);
        for row in self.rows() {
            table.add_row(row.to_vec());
        }
        format!("Configuration is valid.\n{table}")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(_args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_optional(config_path)?;
    output(&ConfigOutput::redacted(config), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_redacted() {
        let mut config = Config::default();
        config.email_provider.api_key = "re_live_secret".into();
        config.webhook.signing_secret = "whsec_c2VjcmV0".into();

        let out = ConfigOutput::redacted(config);
        let json = out.to_json().to_string();
        let human = out.to_human();

        assert!(!json.contains("re_live_secret"));
        assert!(!human.contains("whsec_c2VjcmV0"));
        assert!(human.contains("<redacted>"));
        assert_eq!(out.config.audience_provider.api_key, "<unset>");
    }
}
