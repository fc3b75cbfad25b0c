//! Provider API request and response payloads.
//!
//! These structs map to the provider's REST JSON bodies and never leave the
//! adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SendEmailRequest<'a> {
    pub from: &'a str,
    pub to: &'a [String],
    pub subject: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub html: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub text: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub cc: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub bcc: &'a [String],
    #[serde(skip_serializing_if = "str::is_empty")]
    pub reply_to: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAudienceRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudienceResponse {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "super::time::deserialize_optional")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactRequest<'a> {
    pub email: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub first_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub last_name: &'a str,
    pub unsubscribed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactResponse {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// Error body returned on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub name: String,
}
