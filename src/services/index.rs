//! Correlation lookups over the store's field indexes.
//!
//! The store maintains the indexes on every write; this module only turns
//! resource identities into index keys and reads them back.

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    pair_key, ref_key, ContactGroupMembership, ContactGroupMembershipRemoval, IndexField, Object,
    ObjectKey, Spec,
};
use crate::domain::ports::ResourceStore;

/// Read side of the correlation index.
pub struct CorrelationIndex<St> {
    store: Arc<St>,
}

impl<St> Clone for CorrelationIndex<St> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<St: ResourceStore> CorrelationIndex<St> {
    pub fn new(store: Arc<St>) -> Self {
        Self { store }
    }

    /// Resource of type `S` that owns `provider_id`.
    ///
    /// Provider ids are unique per live resource; if the index ever holds
    /// more than one match, the first is returned.
    pub async fn find_by_provider_id<S: Spec>(
        &self,
        provider_id: &str,
    ) -> DomainResult<Option<Object<S>>> {
        if provider_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .store
            .list_by_index::<S>(IndexField::ProviderId, provider_id)
            .await?
            .into_iter()
            .next())
    }

    /// Dependents of type `S` that reference the contact `key`.
    pub async fn referencing_contact<S: Spec>(
        &self,
        key: &ObjectKey,
    ) -> DomainResult<Vec<Object<S>>> {
        self.store
            .list_by_index(IndexField::ContactRef, &ref_key(key))
            .await
    }

    /// Dependents of type `S` that reference the contact group `key`.
    pub async fn referencing_group<S: Spec>(
        &self,
        key: &ObjectKey,
    ) -> DomainResult<Vec<Object<S>>> {
        self.store
            .list_by_index(IndexField::ContactGroupRef, &ref_key(key))
            .await
    }

    /// Dependents of type `S` that reference exactly this `(contact, group)` pair.
    pub async fn referencing_pair<S: Spec>(
        &self,
        contact: &ObjectKey,
        group: &ObjectKey,
    ) -> DomainResult<Vec<Object<S>>> {
        self.store
            .list_by_index(IndexField::ContactAndGroupRef, &pair_key(contact, group))
            .await
    }

    pub async fn memberships_of_contact(
        &self,
        contact: &ObjectKey,
    ) -> DomainResult<Vec<ContactGroupMembership>> {
        self.referencing_contact(contact).await
    }

    pub async fn memberships_of_group(
        &self,
        group: &ObjectKey,
    ) -> DomainResult<Vec<ContactGroupMembership>> {
        self.referencing_group(group).await
    }

    pub async fn removals_of_contact(
        &self,
        contact: &ObjectKey,
    ) -> DomainResult<Vec<ContactGroupMembershipRemoval>> {
        self.referencing_contact(contact).await
    }

    pub async fn removals_of_group(
        &self,
        group: &ObjectKey,
    ) -> DomainResult<Vec<ContactGroupMembershipRemoval>> {
        self.referencing_group(group).await
    }
}
