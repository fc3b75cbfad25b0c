use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;

/// Everything needed to send one email, independent of the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendEmailInput {
    pub from: String,
    pub reply_to: String,
    /// Forwarded to the provider so retried sends are deduplicated.
    pub idempotency_key: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEmailOutput {
    pub delivery_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContactGroupInput {
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactGroupOutput {
    pub contact_group_id: String,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Contact fields sent to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactInput {
    pub email: String,
    pub given_name: String,
    pub family_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContactGroupMembershipInput {
    pub contact_group_id: String,
    pub contact: ContactInput,
}

/// Identifier of a provider-side contact, global or inside a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactOutput {
    pub contact_id: String,
}

/// Result of a provider delete. `deleted` is `false` when the provider
/// accepted the call but did not remove anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutput {
    pub deleted: bool,
}

/// Port for the email-delivery provider.
///
/// Implementations normalize provider "not found" responses into
/// `DomainError::NotFound`.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(&self, input: SendEmailInput) -> DomainResult<SendEmailOutput>;

    async fn create_contact_group(
        &self,
        input: CreateContactGroupInput,
    ) -> DomainResult<ContactGroupOutput>;

    async fn get_contact_group(&self, contact_group_id: &str) -> DomainResult<ContactGroupOutput>;

    async fn list_contact_groups(&self) -> DomainResult<Vec<ContactGroupOutput>>;

    async fn delete_contact_group(&self, contact_group_id: &str) -> DomainResult<DeleteOutput>;

    async fn create_contact_group_membership(
        &self,
        input: CreateContactGroupMembershipInput,
    ) -> DomainResult<ContactOutput>;

    async fn get_contact_group_membership_by_email(
        &self,
        contact_group_id: &str,
        email: &str,
    ) -> DomainResult<ContactOutput>;

    async fn delete_contact_group_membership(
        &self,
        contact_group_id: &str,
        membership_id: &str,
    ) -> DomainResult<DeleteOutput>;

    async fn create_contact(&self, input: ContactInput) -> DomainResult<ContactOutput>;

    async fn get_contact_by_email(&self, email: &str) -> DomainResult<ContactOutput>;

    async fn update_contact(&self, contact_id: &str, input: ContactInput) -> DomainResult<()>;

    async fn delete_contact(&self, contact_id: &str) -> DomainResult<DeleteOutput>;
}
