//! Inbound event payloads and their status transitions.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::adapters::resend::time::deserialize_optional;
use crate::domain::models::{ConditionStatus, Reason, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeliveryEventType {
    #[serde(rename = "email.sent")]
    Sent,
    #[serde(rename = "email.scheduled")]
    Scheduled,
    #[serde(rename = "email.delivered")]
    Delivered,
    #[serde(rename = "email.delivery_delayed")]
    DeliveryDelayed,
    #[serde(rename = "email.complained")]
    Complained,
    #[serde(rename = "email.bounced")]
    Bounced,
    #[serde(rename = "email.opened")]
    Opened,
    #[serde(rename = "email.clicked")]
    Clicked,
    #[serde(rename = "email.failed")]
    Failed,
}

impl DeliveryEventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "email.sent",
            Self::Scheduled => "email.scheduled",
            Self::Delivered => "email.delivered",
            Self::DeliveryDelayed => "email.delivery_delayed",
            Self::Complained => "email.complained",
            Self::Bounced => "email.bounced",
            Self::Opened => "email.opened",
            Self::Clicked => "email.clicked",
            Self::Failed => "email.failed",
        }
    }

    /// `Delivered` condition written for this event.
    pub const fn delivered_condition(&self) -> (ConditionStatus, Reason) {
        match self {
            Self::Sent | Self::Scheduled | Self::DeliveryDelayed => {
                (ConditionStatus::Unknown, Reason::DeliveryPending)
            }
            Self::Delivered | Self::Opened | Self::Clicked | Self::Complained => {
                (ConditionStatus::True, Reason::Delivered)
            }
            Self::Bounced | Self::Failed => (ConditionStatus::False, Reason::DeliveryFailed),
        }
    }

    pub const fn severity(&self) -> Severity {
        match self {
            Self::Sent | Self::Scheduled | Self::Delivered | Self::Opened | Self::Clicked => {
                Severity::Normal
            }
            Self::DeliveryDelayed | Self::Complained | Self::Bounced | Self::Failed => {
                Severity::Warning
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryData {
    pub email_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
}

/// `email.*` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryEvent {
    #[serde(rename = "type")]
    pub event_type: DeliveryEventType,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub created_at: Option<DateTime<Utc>>,
    pub data: DeliveryData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ContactEventType {
    #[serde(rename = "contact.created")]
    Created,
    #[serde(rename = "contact.updated")]
    Updated,
    #[serde(rename = "contact.deleted")]
    Deleted,
}

impl ContactEventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "contact.created",
            Self::Updated => "contact.updated",
            Self::Deleted => "contact.deleted",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactData {
    pub id: String,
    #[serde(default)]
    pub audience_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub unsubscribed: bool,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `contact.*` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactEvent {
    #[serde(rename = "type")]
    pub event_type: ContactEventType,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub created_at: Option<DateTime<Utc>>,
    pub data: ContactData,
}

#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Delivery(DeliveryEvent),
    Contact(ContactEvent),
}

impl WebhookEvent {
    /// Parse `body`, trying delivery events before contact events.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if let Ok(event) = serde_json::from_slice::<DeliveryEvent>(body) {
            return Some(Self::Delivery(event));
        }
        serde_json::from_slice::<ContactEvent>(body)
            .ok()
            .map(Self::Contact)
    }

    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::Delivery(event) => event.event_type.as_str(),
            Self::Contact(event) => event.event_type.as_str(),
        }
    }
}
