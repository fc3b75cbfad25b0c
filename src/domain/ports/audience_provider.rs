use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// A contact as stored on the audience provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudienceContact {
    pub id: String,
    pub email: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub mailing_lists: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudienceContactInput {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Stable identifier the provider can be queried by.
    pub user_id: String,
    pub mailing_lists: BTreeMap<String, bool>,
}

/// Port for the audience provider.
///
/// Contacts are addressed by `user_id`; a duplicate create surfaces as
/// `DomainError::Conflict`, an unknown user id as `DomainError::NotFound`.
#[async_trait]
pub trait AudienceProvider: Send + Sync {
    async fn find_contact_by_user_id(&self, user_id: &str)
        -> DomainResult<Option<AudienceContact>>;

    async fn create_contact(&self, input: AudienceContactInput) -> DomainResult<String>;

    async fn update_contact(&self, input: AudienceContactInput) -> DomainResult<AudienceContact>;

    async fn update_mailing_lists(
        &self,
        user_id: &str,
        mailing_lists: BTreeMap<String, bool>,
    ) -> DomainResult<()>;

    async fn delete_contact(&self, user_id: &str) -> DomainResult<()>;
}
