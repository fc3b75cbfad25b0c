//! Outbound email and its read-only collaborators.

use serde::{Deserialize, Serialize};

use super::resource::{Object, ObjectRef, ResourceKind, Spec};

/// Delivery priority. Selects the requeue delay after a failed send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl EmailPriority {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailVariable {
    pub name: String,
    pub value: String,
}

impl EmailVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Either a literal address or a reference to a [`User`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<ObjectRef>,
}

impl EmailRecipient {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            email_address: Some(address.into()),
            user_ref: None,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            email_address: None,
            user_ref: Some(ObjectRef::new(name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSpec {
    pub template_ref: ObjectRef,
    pub recipient: EmailRecipient,
    #[serde(default)]
    pub variables: Vec<EmailVariable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub priority: EmailPriority,
}

impl Spec for EmailSpec {
    const KIND: ResourceKind = ResourceKind::Email;
}

/// Variable declared by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplateSpec {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub html_body: String,
    #[serde(default)]
    pub text_body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<TemplateVariable>,
}

impl Spec for EmailTemplateSpec {
    const KIND: ResourceKind = ResourceKind::EmailTemplate;
}

/// Recipient identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

impl Spec for UserSpec {
    const KIND: ResourceKind = ResourceKind::User;
}

pub type Email = Object<EmailSpec>;
pub type EmailTemplate = Object<EmailTemplateSpec>;
pub type User = Object<UserSpec>;
