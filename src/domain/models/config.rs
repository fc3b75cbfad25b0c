use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::email::EmailPriority;
use super::resource::ObjectKey;

/// Main configuration structure for Herald
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Email-delivery provider (Resend)
    #[serde(default)]
    pub email_provider: EmailProviderConfig,

    /// Audience provider (Loops), optional second contact provider
    #[serde(default)]
    pub audience_provider: AudienceProviderConfig,

    /// Email reconciliation settings
    #[serde(default)]
    pub email: EmailConfig,

    /// Controller runtime settings
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Webhook receiver settings
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Email-delivery provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmailProviderConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_resend_base_url")]
    pub base_url: String,

    /// Default From address
    #[serde(default)]
    pub from: String,

    /// Default Reply-To address
    #[serde(default)]
    pub reply_to: String,

    /// Client timeout for every provider call (1-15)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-side request rate limit
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_resend_base_url() -> String {
    "https://api.resend.com".to_string()
}

const fn default_timeout_secs() -> u64 {
    15
}

const fn default_requests_per_second() -> u32 {
    2
}

impl Default for EmailProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_resend_base_url(),
            from: String::new(),
            reply_to: String::new(),
            timeout_secs: default_timeout_secs(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl fmt::Debug for EmailProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("from", &self.from)
            .field("reply_to", &self.reply_to)
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}

/// Audience provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AudienceProviderConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_loops_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Mailing list that newsletter contacts are subscribed to
    #[serde(default)]
    pub newsletter_list_id: String,

    /// `namespace/name` of the ContactGroup whose members get the newsletter
    #[serde(default)]
    pub newsletter_group: Option<String>,

    /// Source tag attached to created contacts
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_loops_base_url() -> String {
    "https://app.loops.so".to_string()
}

fn default_source() -> String {
    "herald".to_string()
}

impl AudienceProviderConfig {
    /// Parsed `newsletter_group`; a bare name means the empty namespace.
    pub fn newsletter_group_key(&self) -> Option<ObjectKey> {
        self.newsletter_group.as_deref().map(|raw| match raw.split_once('/') {
            Some((namespace, name)) => ObjectKey::new(namespace, name),
            None => ObjectKey::new("", raw),
        })
    }
}

impl Default for AudienceProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: default_loops_base_url(),
            timeout_secs: default_timeout_secs(),
            newsletter_list_id: String::new(),
            newsletter_group: None,
            source: default_source(),
        }
    }
}

impl fmt::Debug for AudienceProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudienceProviderConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("newsletter_list_id", &self.newsletter_list_id)
            .field("newsletter_group", &self.newsletter_group)
            .field("source", &self.source)
            .finish()
    }
}

/// Requeue delays applied after a failed send, by priority
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmailConfig {
    #[serde(default = "default_wait_low")]
    pub wait_low_priority_secs: u64,

    #[serde(default = "default_wait_normal")]
    pub wait_normal_priority_secs: u64,

    #[serde(default = "default_wait_high")]
    pub wait_high_priority_secs: u64,
}

const fn default_wait_low() -> u64 {
    600
}

const fn default_wait_normal() -> u64 {
    60
}

const fn default_wait_high() -> u64 {
    10
}

impl EmailConfig {
    pub const fn wait_for(&self, priority: EmailPriority) -> Duration {
        Duration::from_secs(match priority {
            EmailPriority::Low => self.wait_low_priority_secs,
            EmailPriority::Normal => self.wait_normal_priority_secs,
            EmailPriority::High => self.wait_high_priority_secs,
        })
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            wait_low_priority_secs: default_wait_low(),
            wait_normal_priority_secs: default_wait_normal(),
            wait_high_priority_secs: default_wait_high(),
        }
    }
}

/// Controller runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerConfig {
    /// Workers per controller (1-64)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Initial backoff after a failed reconcile, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_workers() -> usize {
    4
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    300_000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Webhook receiver configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port (1-65535)
    #[serde(default = "default_port")]
    pub port: u32,

    #[serde(default = "default_path")]
    pub path: String,

    /// Shared signing secret, `whsec_<base64>`
    #[serde(default)]
    pub signing_secret: String,

    /// Accepted clock skew for signed timestamps
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u32 {
    8090
}

fn default_path() -> String {
    "/webhooks/resend".to_string()
}

const fn default_tolerance_secs() -> u64 {
    300
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            path: default_path(),
            signing_secret: String::new(),
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("signing_secret", &redact(&self.signing_secret))
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            enable_stdout: true,
        }
    }
}

/// Mask a secret for display, keeping only whether it is set.
pub fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}
